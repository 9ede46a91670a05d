//! Result envelope and printing for CLI commands.
//!
//! In text mode a command prints what the slave printed: output lines on
//! stdout, error-channel lines on stderr. The JSON formats wrap everything in
//! one envelope on stdout:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "ok": true,
//!   "command": "query",
//!   "inputs": { "alias": "rsession_0", "expression": "mean(c(1, 2))" },
//!   "data": { "value": { "type": "scalar", "token": "1.5" } },
//!   "timings": { "durationMs": 42 }
//! }
//! ```


use std::io::{self, Write};
use std::time::{Duration, Instant};

use rsession::ParsedValue;
use serde::{Deserialize, Serialize};

/// Bumped on breaking changes to the envelope.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// Slave output as printed
	#[default]
	Text,
	/// Pretty-printed JSON envelope
	Json,
	/// One JSON envelope per line
	Ndjson,
}

impl std::str::FromStr for OutputFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"text" => Ok(OutputFormat::Text),
			"json" => Ok(OutputFormat::Json),
			"ndjson" => Ok(OutputFormat::Ndjson),
			_ => Err(format!("unknown format: {s}")),
		}
	}
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Text => write!(f, "text"),
			OutputFormat::Json => write!(f, "json"),
			OutputFormat::Ndjson => write!(f, "ndjson"),
		}
	}
}

/// Envelope returned by every command.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,
	pub ok: bool,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inputs: Option<CommandInputs>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timings: Option<Timings>,
}

impl<T: Serialize> CommandResult<T> {
	pub fn failure(command: impl Into<String>, error: CommandError) -> Self {
		Self {
			schema_version: Some(SCHEMA_VERSION),
			ok: false,
			command: command.into(),
			inputs: None,
			data: None,
			error: Some(error),
			timings: None,
		}
	}
}

/// Inputs echoed back for traceability.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommandInputs {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub alias: Option<String>,

	/// Serialized command text sent to the slave.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub expression: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Standardized error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// No R executable could be located
	SlaveNotFound,
	/// The slave failed to start or complete its handshake
	LaunchFailed,
	/// The slave halted while evaluating a command
	SlaveHalted,
	/// Replaying history into a fresh slave failed
	ReinstateFailed,
	/// Output did not parse as a value
	MalformedResponse,
	/// Output did not line up with what was sent
	ProtocolDesync,
	/// Alias unknown, closed or already taken
	SessionError,
	/// Invalid expression, argument or config
	InvalidInput,
	IoError,
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::SlaveNotFound => write!(f, "SLAVE_NOT_FOUND"),
			ErrorCode::LaunchFailed => write!(f, "LAUNCH_FAILED"),
			ErrorCode::SlaveHalted => write!(f, "SLAVE_HALTED"),
			ErrorCode::ReinstateFailed => write!(f, "REINSTATE_FAILED"),
			ErrorCode::MalformedResponse => write!(f, "MALFORMED_RESPONSE"),
			ErrorCode::ProtocolDesync => write!(f, "PROTOCOL_DESYNC"),
			ErrorCode::SessionError => write!(f, "SESSION_ERROR"),
			ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
			ErrorCode::IoError => write!(f, "IO_ERROR"),
			ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
		}
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
	pub duration_ms: u64,
}

impl From<Duration> for Timings {
	fn from(duration: Duration) -> Self {
		Timings {
			duration_ms: duration.as_millis() as u64,
		}
	}
}

/// How a command's data prints in text mode.
pub trait TextOutput {
	fn write_text(&self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()>;
}

impl TextOutput for () {
	fn write_text(&self, _out: &mut dyn Write, _err: &mut dyn Write) -> io::Result<()> {
		Ok(())
	}
}

/// Builder for command results; timing starts at construction.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	inputs: Option<CommandInputs>,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			inputs: None,
			data: None,
			error: None,
			start_time: Instant::now(),
		}
	}

	pub fn inputs(mut self, inputs: CommandInputs) -> Self {
		self.inputs = Some(inputs);
		self
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: None,
		});
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			schema_version: Some(SCHEMA_VERSION),
			ok: self.error.is_none() && self.data.is_some(),
			command: self.command,
			inputs: self.inputs,
			data: self.data,
			error: self.error,
			timings: Some(Timings::from(self.start_time.elapsed())),
		}
	}
}

/// Prints a command result to stdout in the specified format.
pub fn print_result<T: Serialize + TextOutput>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Ndjson => {
			if let Ok(json) = serde_json::to_string(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => {
			let mut stdout = io::stdout().lock();
			let mut stderr = io::stderr().lock();
			if let Some(ref data) = result.data {
				let _ = data.write_text(&mut stdout, &mut stderr);
			} else if let Some(ref error) = result.error {
				let _ = writeln!(stderr, "Error [{}]: {}", error.code, error.message);
			}
		}
	}
}

pub fn print_error_stderr(error: &CommandError) {
	eprintln!("Error [{}]: {}", error.code, error.message);
}

/// Renders a parsed value the way a human would read it back.
///
/// Scalars print bare, vectors space-separated, named lists one `name: value`
/// per line and tables as tab-separated rows under a header of column names.
pub fn render_value(value: &ParsedValue) -> String {
	match value {
		ParsedValue::Scalar { token } => token.clone(),
		ParsedValue::Vector { tokens } => tokens.join(" "),
		ParsedValue::NamedList { entries } => entries
			.iter()
			.map(|(name, value)| format!("{name}: {}", render_value(value)))
			.collect::<Vec<_>>()
			.join("\n"),
		ParsedValue::Table {
			row_names,
			col_names,
			cells,
		} => {
			let mut lines = Vec::with_capacity(row_names.len() + 1);
			lines.push(std::iter::once("").chain(col_names.iter().map(String::as_str)).collect::<Vec<_>>().join("\t"));
			for (row, values) in row_names.iter().zip(cells) {
				lines.push(
					std::iter::once(row.as_str())
						.chain(values.iter().map(String::as_str))
						.collect::<Vec<_>>()
						.join("\t"),
				);
			}
			lines.join("\n")
		}
	}
}
