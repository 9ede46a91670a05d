use std::path::PathBuf;

use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	/// Expression argument could not be decoded.
	#[error("invalid expression: {0}")]
	Expression(String),

	#[error("invalid config {path}: {message}")]
	Config { path: PathBuf, message: String },

	/// A script line failed; earlier lines already ran.
	#[error("{path}:{line}: {source}")]
	Script {
		path: PathBuf,
		line: usize,
		#[source]
		source: rsession::Error,
	},

	#[error(transparent)]
	Session(#[from] rsession::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

fn session_code(err: &rsession::Error) -> ErrorCode {
	use rsession::Error;
	match err {
		Error::SlaveNotFound => ErrorCode::SlaveNotFound,
		Error::LaunchFailed { .. } => ErrorCode::LaunchFailed,
		Error::SlaveHalted { .. } => ErrorCode::SlaveHalted,
		Error::ReinstateFailed { .. } => ErrorCode::ReinstateFailed,
		Error::MalformedResponse { .. } => ErrorCode::MalformedResponse,
		Error::ProtocolDesync { .. } => ErrorCode::ProtocolDesync,
		Error::UnknownSessionAlias { .. }
		| Error::NoOpenSession
		| Error::AliasInUse { .. }
		| Error::HaltHandlerMissing { .. } => ErrorCode::SessionError,
		Error::Config(_) => ErrorCode::InvalidInput,
		Error::Io(_) => ErrorCode::IoError,
		Error::Runtime(_) => ErrorCode::InternalError,
	}
}

impl CliError {
	pub fn code(&self) -> ErrorCode {
		match self {
			CliError::Expression(_) | CliError::Config { .. } | CliError::Json(_) => ErrorCode::InvalidInput,
			CliError::Script { source, .. } | CliError::Session(source) => session_code(source),
			CliError::Io(_) => ErrorCode::IoError,
			CliError::Anyhow(e) if e.downcast_ref::<std::io::Error>().is_some() => ErrorCode::IoError,
			CliError::Anyhow(_) => ErrorCode::InternalError,
		}
	}

	pub fn to_command_error(&self) -> CommandError {
		let details = match self {
			CliError::Script { source, line, .. } => Some(serde_json::json!({
				"line": line,
				"alias": source.alias(),
			})),
			CliError::Session(source) => source.alias().map(|alias| serde_json::json!({ "alias": alias })),
			_ => None,
		};
		CommandError {
			code: self.code(),
			message: self.to_string(),
			details,
		}
	}
}
