//! Data layer for the shared session store.
//!
//! This crate contains the session value model, the lazily-decoded item
//! collection, and the binary codec for the legacy session-cache format.
//! Types here are pure data: no store access, no I/O. The storage runtime
//! and the public facade are built on top of these types in `sx-runtime`
//! and `sx-rs`.
//!
//! The serialized layout must stay byte-compatible with the legacy format so
//! that other runtimes reading the same store keep working; see [`codec`].

pub mod codec;
pub mod collection;
pub mod error;
pub mod item;
pub mod record;
pub mod value;

pub use codec::SERIAL_REVISION;
pub use collection::ItemCollection;
pub use error::{CodecError, Result};
pub use item::SessionItem;
pub use record::{LockToken, SessionKeys, SessionRecord};
pub use value::{ItemValue, TypeTag};
