//! Shared session state for web applications split across runtimes.
//!
//! Several independent runtimes (a legacy scripting runtime, a classic
//! stateful web runtime, a modern web runtime) serve one logical user
//! session by storing its items in a single Redis instance, each addressing
//! it through its own identifier. This crate is the public surface: the
//! process-wide [`StoreContext`] built once at start-up, and the
//! request-scoped [`SessionStore`] facade exposing shared and exclusive
//! reads, writes, lock release, expiry refresh, and deletion.
//!
//! Mutual exclusion is enforced purely through a lock key in the store,
//! never in-process, because multiple server processes serve the same
//! session. Cross-runtime identifier correlation happens through a one-time
//! binding call per browser session; see [`binding`].

pub mod binding;
pub mod config;
pub mod error;
pub mod keys;
pub mod store;

pub use binding::{BINDING_COOKIE_NAME, BindingApi, BindingFlag, HttpBindingApi, SessionBinder};
pub use config::StoreConfig;
pub use error::{Result, SxError};
pub use keys::KeyNamer;
pub use store::{SessionStore, StoreContext};

pub use sx_protocol::{CodecError, ItemCollection, ItemValue, LockToken, SessionItem, SessionKeys, SessionRecord, TypeTag, codec};
pub use sx_runtime::{
	DATA_FIELD, KeyLayout, RedisEngine, ScriptArg, ScriptEngine, ScriptKind, SharedConnection, StoreClient, StoreError, StoreScript, TTL_FIELD,
};
