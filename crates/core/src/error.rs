//! Error types for rsession.

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What recovery did with a session whose slave halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltOutcome {
	/// The session was closed and its history discarded.
	Failed,
	/// A fresh slave replaced the dead one, with empty state.
	Restarted,
	/// A fresh slave replaced the dead one and history was replayed.
	Reinstated,
}

impl std::fmt::Display for HaltOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			HaltOutcome::Failed => "session closed",
			HaltOutcome::Restarted => "slave restarted",
			HaltOutcome::Reinstated => "slave reinstated",
		})
	}
}

/// Errors that can occur when driving slave sessions.
///
/// Every variant raised for a specific session carries its alias.
#[derive(Debug, Error)]
pub enum Error {
	/// No open session has this alias.
	#[error("Unknown session alias '{alias}'")]
	UnknownSessionAlias { alias: String },

	/// The default session was requested but none is open.
	#[error("No open session")]
	NoOpenSession,

	/// A session with this alias is already open.
	#[error("Session alias '{alias}' is already in use")]
	AliasInUse { alias: String },

	/// The slave halted while evaluating a command.
	///
	/// `errors` holds the error lines the slave printed before halting.
	#[error("Slave '{alias}' halted ({outcome}){}", last_error(errors))]
	SlaveHalted {
		alias: String,
		outcome: HaltOutcome,
		errors: Vec<String>,
	},

	/// Reinstating a halted session was impossible or its replay halted.
	#[error("Cannot reinstate session '{alias}': {reason}")]
	ReinstateFailed { alias: String, reason: String },

	/// The slave's echo did not match the line just sent.
	///
	/// The session is unusable after this error; close it.
	#[error("Protocol desync on '{alias}': expected echo of {expected:?}, received {received:?}")]
	ProtocolDesync {
		alias: String,
		expected: String,
		received: String,
	},

	/// Output could not be parsed into a value.
	#[error("Malformed response from '{alias}': {message}")]
	MalformedResponse { alias: String, message: String },

	/// The halt policy names a handler that was never registered.
	#[error("Halt handler '{handler}' for session '{alias}' is not registered")]
	HaltHandlerMissing { alias: String, handler: String },

	/// No R executable could be located.
	#[error("R executable not found. Install R or set RSESSION_BIN.")]
	SlaveNotFound,

	/// Spawning or handshaking with a slave failed.
	#[error("Failed to launch slave '{alias}': {message}")]
	LaunchFailed { alias: String, message: String },

	/// Invalid or unreadable configuration.
	#[error("Configuration error: {0}")]
	Config(String),

	/// Other runtime failure.
	#[error(transparent)]
	Runtime(rsession_runtime::Error),

	/// I/O error
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

fn last_error(errors: &[String]) -> String {
	errors.last().map(|e| format!(": {e}")).unwrap_or_default()
}

impl Error {
	/// Attaches `alias` to a runtime error.
	pub(crate) fn runtime(alias: &str, err: rsession_runtime::Error) -> Self {
		use rsession_runtime::Error as Runtime;
		match err {
			Runtime::SlaveNotFound => Error::SlaveNotFound,
			Runtime::LaunchFailed(message) => Error::LaunchFailed {
				alias: alias.to_string(),
				message,
			},
			Runtime::ProtocolDesync { expected, received } => Error::ProtocolDesync {
				alias: alias.to_string(),
				expected,
				received,
			},
			Runtime::Io(e) => Error::Io(e),
			other => Error::Runtime(other),
		}
	}

	pub(crate) fn malformed(alias: &str, err: rsession_protocol::Error) -> Self {
		let rsession_protocol::Error::MalformedResponse(message) = err;
		Error::MalformedResponse {
			alias: alias.to_string(),
			message,
		}
	}

	/// Alias of the session the error concerns, if any.
	pub fn alias(&self) -> Option<&str> {
		match self {
			Error::UnknownSessionAlias { alias }
			| Error::AliasInUse { alias }
			| Error::SlaveHalted { alias, .. }
			| Error::ReinstateFailed { alias, .. }
			| Error::ProtocolDesync { alias, .. }
			| Error::MalformedResponse { alias, .. }
			| Error::HaltHandlerMissing { alias, .. }
			| Error::LaunchFailed { alias, .. } => Some(alias),
			_ => None,
		}
	}

	/// Returns the halt outcome if this error reports a halted slave.
	pub fn halt_outcome(&self) -> Option<HaltOutcome> {
		match self {
			Error::SlaveHalted { outcome, .. } => Some(*outcome),
			_ => None,
		}
	}
}
