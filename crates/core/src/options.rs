//! Session configuration.
//!
//! [`SessionOptions`] is plain data: it round-trips through JSON so the CLI
//! can load it from config files, and a session keeps the exact options it was
//! opened with so a restart spawns an identical slave.

use std::path::PathBuf;

use rsession_runtime::{Channel, ConnectionConfig, TranscriptMode, TranscriptSpec, default_args};
use serde::{Deserialize, Serialize};

/// Executable used when the options name none; resolved on `PATH` at spawn.
pub const DEFAULT_EXECUTABLE: &str = "R";

/// What happens when a slave halts mid-command.
///
/// Fixed when the session opens. `Invoke` and `InvokeGround` name a handler
/// registered with [`Registry::register_halt_handler`].
///
/// [`Registry::register_halt_handler`]: crate::Registry::register_halt_handler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HaltPolicy {
	/// Terminate the host process.
	Abort,
	/// Fail the call and close the session.
	#[default]
	Fail,
	/// Respawn with the same options and empty state.
	Restart,
	/// Respawn and replay history.
	Reinstate,
	/// Call the handler with the dead slave's streams.
	Invoke(String),
	/// Call the handler without stream access.
	InvokeGround(String),
}

impl std::str::FromStr for HaltPolicy {
	type Err = String;

	/// Parses `abort`, `fail`, `restart`, `reinstate`, `invoke:<handler>` or
	/// `invoke-ground:<handler>`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Some(handler) = s.strip_prefix("invoke:") {
			return Ok(HaltPolicy::Invoke(handler.to_string()));
		}
		if let Some(handler) = s.strip_prefix("invoke-ground:") {
			return Ok(HaltPolicy::InvokeGround(handler.to_string()));
		}
		match s {
			"abort" => Ok(HaltPolicy::Abort),
			"fail" => Ok(HaltPolicy::Fail),
			"restart" => Ok(HaltPolicy::Restart),
			"reinstate" => Ok(HaltPolicy::Reinstate),
			other => Err(format!(
				"unknown halt policy '{other}' (expected abort, fail, restart, reinstate, invoke:<name> or invoke-ground:<name>)"
			)),
		}
	}
}

/// Where a newly opened session goes in the registry order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Placement {
	/// Becomes the default session.
	#[default]
	Head,
	/// Goes to the back; the default is unchanged unless nothing else is open.
	Tail,
}

/// Options for opening a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
	/// Session alias; generated when absent.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub alias: Option<String>,
	/// Path to the R executable.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub executable: Option<PathBuf>,
	/// Arguments appended after the default slave arguments.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub args: Vec<String>,
	/// Whether the slave echoes input back.
	pub interactive: bool,
	/// Channel carrying the echo in interactive mode.
	pub echo: Channel,
	pub halt_policy: HaltPolicy,
	pub transcript: TranscriptSpec,
	pub placement: Placement,
}

impl SessionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn alias(mut self, alias: impl Into<String>) -> Self {
		self.alias = Some(alias.into());
		self
	}

	pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
		self.executable = Some(path.into());
		self
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn interactive(mut self, interactive: bool) -> Self {
		self.interactive = interactive;
		self
	}

	pub fn echo(mut self, channel: Channel) -> Self {
		self.echo = channel;
		self
	}

	pub fn halt_policy(mut self, policy: HaltPolicy) -> Self {
		self.halt_policy = policy;
		self
	}

	pub fn transcript(mut self, transcript: TranscriptSpec) -> Self {
		self.transcript = transcript;
		self
	}

	pub fn placement(mut self, placement: Placement) -> Self {
		self.placement = placement;
		self
	}

	pub(crate) fn program(&self) -> PathBuf {
		self.executable
			.clone()
			.unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE))
	}

	/// Full argument list: slave defaults, `--interactive` if requested, then
	/// the caller's extras.
	pub(crate) fn command_args(&self) -> Vec<String> {
		let mut args = default_args(self.interactive);
		args.extend(self.args.iter().cloned());
		args
	}

	pub(crate) fn connection_config(&self) -> ConnectionConfig {
		ConnectionConfig {
			interactive: self.interactive,
			echo: self.echo,
			transcript: self.transcript.clone(),
		}
	}

	/// Config for a slave replacing a halted one. A `Once` transcript was
	/// already truncated at open, so the replacement appends to it.
	pub(crate) fn respawn_config(&self) -> ConnectionConfig {
		let mut config = self.connection_config();
		if config.transcript.mode == TranscriptMode::Once {
			config.transcript.mode = TranscriptMode::Append;
		}
		config
	}
}

#[cfg(test)]
mod tests {
	use rsession_runtime::{Record, TranscriptMode};

	use super::*;

	#[test]
	fn options_deserialize_from_camel_case_json() {
		let options: SessionOptions = serde_json::from_str(
			r#"{
				"alias": "stats",
				"interactive": true,
				"echo": "error",
				"haltPolicy": { "invoke": "notify" },
				"transcript": { "path": "/tmp/r.log", "mode": "append", "record": "in" },
				"placement": "tail"
			}"#,
		)
		.unwrap();

		assert_eq!(options.alias.as_deref(), Some("stats"));
		assert!(options.interactive);
		assert_eq!(options.echo, Channel::Error);
		assert_eq!(options.halt_policy, HaltPolicy::Invoke("notify".into()));
		assert_eq!(options.transcript.mode, TranscriptMode::Append);
		assert_eq!(options.transcript.record, Record::In);
		assert_eq!(options.placement, Placement::Tail);
	}

	#[test]
	fn unit_policies_are_plain_strings() {
		let options: SessionOptions = serde_json::from_str(r#"{ "haltPolicy": "reinstate" }"#).unwrap();
		assert_eq!(options.halt_policy, HaltPolicy::Reinstate);
		assert_eq!(SessionOptions::default().halt_policy, HaltPolicy::Fail);
	}

	#[test]
	fn respawn_appends_to_once_transcript() {
		let options = SessionOptions::new().transcript(TranscriptSpec {
			path: Some("/tmp/r.log".into()),
			mode: TranscriptMode::Once,
			record: Record::Both,
		});
		assert_eq!(options.connection_config().transcript.mode, TranscriptMode::Once);
		assert_eq!(options.respawn_config().transcript.mode, TranscriptMode::Append);

		let many = SessionOptions::new().transcript(TranscriptSpec {
			mode: TranscriptMode::Many,
			..options.transcript.clone()
		});
		assert_eq!(many.respawn_config().transcript.mode, TranscriptMode::Many);
	}

	#[test]
	fn policy_from_str() {
		assert_eq!("restart".parse::<HaltPolicy>(), Ok(HaltPolicy::Restart));
		assert_eq!(
			"invoke-ground:log".parse::<HaltPolicy>(),
			Ok(HaltPolicy::InvokeGround("log".into()))
		);
		assert!("explode".parse::<HaltPolicy>().is_err());
	}

	#[test]
	fn command_args_put_extras_last() {
		let options = SessionOptions::new().interactive(true).arg("--vanilla");
		let args = options.command_args();
		assert_eq!(args.first().map(String::as_str), Some("--no-readline"));
		assert_eq!(&args[args.len() - 2..], &["--interactive", "--vanilla"]);
		assert_eq!(options.program(), PathBuf::from("R"));
	}
}
