//! Error surface for store access.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure while evaluating a store operation.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error(transparent)]
	Redis(#[from] redis::RedisError),

	#[error("session payload could not be processed")]
	Codec(#[from] sx_protocol::CodecError),

	#[error("unexpected reply shape from store script {script:?}")]
	Reply { script: crate::scripts::ScriptKind },
}

impl StoreError {
	/// Connection-level failures that warrant the reconnect heuristic before
	/// the silent in-engine retry.
	pub fn is_connection_error(&self) -> bool {
		match self {
			Self::Redis(err) => {
				err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() || err.is_unrecoverable_error()
			}
			_ => false,
		}
	}

	/// The store evicted the cached script; the full body must be resubmitted.
	pub fn is_script_missing(&self) -> bool {
		match self {
			Self::Redis(err) => err.kind() == redis::ErrorKind::NoScriptError,
			_ => false,
		}
	}
}
