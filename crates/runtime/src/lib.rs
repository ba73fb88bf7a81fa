//! Store runtime: shared connection lifecycle, bounded retries, and the
//! atomic Lua programs that implement session locking over the store.
//!
//! Nothing here knows about key derivation or session binding; those live in
//! the `sx` facade crate. This crate turns raw store access into typed
//! operations returning [`sx_protocol::SessionRecord`] values.

pub mod client;
pub mod connection;
pub mod error;
pub mod retry;
pub mod scripts;

pub use client::{RedisEngine, ScriptArg, ScriptEngine, StoreClient};
pub use connection::{ReconnectGate, SharedConnection};
pub use error::{Result, StoreError};
pub use retry::retry_for;
pub use scripts::{DATA_FIELD, KeyLayout, ScriptKind, ScriptSet, StoreScript, TTL_FIELD};
