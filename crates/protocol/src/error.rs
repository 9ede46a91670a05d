//! Error types for response parsing.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while translating slave output.
///
/// Serialization has no error variant: constructs without a rendering rule pass
/// through as literal text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	/// Output lines did not match any printed shape the parser understands.
	#[error("Malformed response: {0}")]
	MalformedResponse(String),
}

impl Error {
	pub(crate) fn malformed(reason: impl Into<String>) -> Self {
		Error::MalformedResponse(reason.into())
	}
}
