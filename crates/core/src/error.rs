//! Error surface of the public facade.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SxError>;

#[derive(Debug, Error)]
pub enum SxError {
	/// Malformed or conflicting deployment settings; fatal at start-up.
	#[error("invalid store configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Store(#[from] sx_runtime::StoreError),

	#[error(transparent)]
	Codec(#[from] sx_protocol::CodecError),

	/// Transport failure while calling the session binding endpoint.
	#[error("session binding call failed")]
	Binding(#[source] reqwest::Error),
}
