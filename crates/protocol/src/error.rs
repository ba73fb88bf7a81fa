//! Errors raised while encoding or decoding session payloads.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

/// Failure while converting session items to or from the legacy byte format.
#[derive(Debug, Error)]
pub enum CodecError {
	#[error("serialized session payload ended unexpectedly")]
	Truncated,

	#[error("unknown session value type tag {0}")]
	UnknownTag(u8),

	#[error("session value payload does not match its type tag")]
	Malformed,

	#[error("session item name or payload exceeds the legacy format limits")]
	Oversize,

	#[error("could not serialize the value of session item `{item}`")]
	Serialize {
		item: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("could not deserialize the value of session item `{item}`")]
	Deserialize {
		item: String,
		#[source]
		source: serde_json::Error,
	},
}
