//! Error types for the slave runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a slave process.
#[derive(Debug, Error)]
pub enum Error {
	/// No R executable could be located.
	#[error("R executable not found. Install R or set RSESSION_BIN.")]
	SlaveNotFound,

	/// Failed to launch the slave process.
	#[error("Failed to launch R: {0}")]
	LaunchFailed(String),

	/// The slave did not echo back the line just sent (interactive mode).
	///
	/// The line streams are out of step; the connection refuses further commands.
	#[error("Protocol desync: expected echo of {expected:?}, received {received:?}")]
	ProtocolDesync { expected: String, received: String },

	/// Transport-level error (pipe communication).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Returns true if this error leaves the connection unusable.
	pub fn is_desync(&self) -> bool {
		matches!(self, Error::ProtocolDesync { .. })
	}
}
