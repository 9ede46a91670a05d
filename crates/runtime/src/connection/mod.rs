//! Sentinel-framed command exchange with one slave.
//!
//! The slave gives no indication of when a command's output is complete, so each
//! command is followed by two injected sentinels whose printed form is known:
//!
//! 1. Write the command
//! 2. (interactive) Read and check the command's echo
//! 3. Write the error sentinel, read stderr until it appears or the slave halts
//! 4. On halt: drain stdout to end-of-stream and report the exchange as halted
//! 5. Otherwise write the output sentinel and read stdout until it appears
//! 6. Record the command in history and the transcript
//!
//! The error channel is settled first because R only prints `Execution halted`
//! there, and a halted slave never answers the output sentinel.

use std::collections::VecDeque;
use std::time::Duration;

use rsession_protocol::sentinel::{
	ERROR_SENTINEL_COMMAND, ERROR_SENTINEL_LINE, HALT_LINE, OUTPUT_SENTINEL_COMMAND,
	OUTPUT_SENTINEL_LINE, QUIT_COMMAND, is_echo_of,
};
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::slave::{self, SlaveProcess, SlaveReader, SlaveWriter};
use crate::transcript::{Transcript, TranscriptSpec};
use crate::transport::{LineReader, LineWriter, is_broken_pipe};

#[cfg(test)]
mod tests;

/// Delay between sending the quit command and closing the pipes.
const QUIT_GRACE: Duration = Duration::from_millis(200);

/// How long a closing slave may take to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// One of the slave's two output streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
	#[default]
	Output,
	Error,
}

/// Per-connection settings.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
	/// The slave echoes each input line back.
	pub interactive: bool,
	/// Stream carrying the echoes when interactive.
	pub echo: Channel,
	pub transcript: TranscriptSpec,
}

/// Lines captured for exactly one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseLines {
	pub output: Vec<String>,
	pub errors: Vec<String>,
}

impl ResponseLines {
	pub fn is_empty(&self) -> bool {
		self.output.is_empty() && self.errors.is_empty()
	}
}

/// Outcome of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
	Completed(ResponseLines),
	/// The slave died while evaluating the command.
	Halted(ResponseLines),
}

impl Exchange {
	pub fn is_halted(&self) -> bool {
		matches!(self, Exchange::Halted(_))
	}

	pub fn lines(&self) -> &ResponseLines {
		match self {
			Exchange::Completed(lines) | Exchange::Halted(lines) => lines,
		}
	}

	pub fn into_lines(self) -> ResponseLines {
		match self {
			Exchange::Completed(lines) | Exchange::Halted(lines) => lines,
		}
	}
}

/// Raw streams of a connection, handed to halt handlers that take ownership of
/// the dead slave.
pub struct ConnectionParts {
	pub stdin: SlaveWriter,
	pub stdout: SlaveReader,
	pub stderr: SlaveReader,
	pub child: Option<Child>,
}

impl std::fmt::Debug for ConnectionParts {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionParts")
			.field("pid", &self.child.as_ref().and_then(Child::id))
			.finish_non_exhaustive()
	}
}

/// A live, framed conversation with one slave.
pub struct Connection {
	stdin: LineWriter,
	stdout: LineReader,
	stderr: LineReader,
	child: Option<Child>,
	interactive: bool,
	echo: Channel,
	/// Command texts, most recent first.
	history: VecDeque<String>,
	transcript: Transcript,
	/// Set once an echo mismatch is seen; the streams can no longer be trusted.
	desync: Option<(String, String)>,
}

impl Connection {
	/// Wraps the streams of `process` without talking to it.
	pub async fn new(process: SlaveProcess, config: ConnectionConfig) -> Self {
		Self {
			stdin: LineWriter::new(process.stdin),
			stdout: LineReader::new(process.stdout, "stdout"),
			stderr: LineReader::new(process.stderr, "stderr"),
			child: process.child,
			interactive: config.interactive,
			echo: config.echo,
			history: VecDeque::new(),
			transcript: Transcript::open(&config.transcript).await,
			desync: None,
		}
	}

	/// Wraps `process` and performs the open handshake.
	pub async fn open(process: SlaveProcess, config: ConnectionConfig) -> Result<Self> {
		let mut connection = Self::new(process, config).await;
		connection.handshake().await?;
		Ok(connection)
	}

	/// Sends both sentinels and discards everything printed before them, such as a
	/// startup banner.
	///
	/// # Errors
	///
	/// Returns `Error::LaunchFailed` if the slave halts or closes its streams
	/// before answering.
	pub async fn handshake(&mut self) -> Result<()> {
		self.send_framing(ERROR_SENTINEL_COMMAND).await?;
		loop {
			match self.stderr.next_payload_line().await? {
				Some(line) if line == ERROR_SENTINEL_LINE => break,
				Some(line) if line == HALT_LINE => {
					return Err(Error::LaunchFailed("slave halted during startup".to_string()));
				}
				Some(line) => debug!(target = "rsession.engine", %line, "discarding startup stderr"),
				None => return Err(Error::LaunchFailed("slave closed stderr during startup".to_string())),
			}
		}

		self.send_framing(OUTPUT_SENTINEL_COMMAND).await?;
		loop {
			match self.stdout.next_payload_line().await? {
				Some(line) if line == OUTPUT_SENTINEL_LINE => break,
				Some(line) => debug!(target = "rsession.engine", %line, "discarding startup stdout"),
				None => return Err(Error::LaunchFailed("slave closed stdout during startup".to_string())),
			}
		}

		debug!(target = "rsession.engine", "handshake complete");
		Ok(())
	}

	/// Runs one command through the slave.
	///
	/// # Errors
	///
	/// Returns `Error::ProtocolDesync` on an echo mismatch (and for every command
	/// after one), or `Error::Io` on a read failure.
	pub async fn exchange(&mut self, command: &str) -> Result<Exchange> {
		if let Some((expected, received)) = &self.desync {
			return Err(Error::ProtocolDesync {
				expected: expected.clone(),
				received: received.clone(),
			});
		}

		debug!(target = "rsession.engine", %command, "sending command");
		match self.stdin.write_line(command).await {
			Ok(()) => {}
			Err(e) if is_broken_pipe(&e) => {
				warn!(target = "rsession.engine", %command, "slave input closed; command dropped");
				return Ok(Exchange::Completed(ResponseLines::default()));
			}
			Err(e) => return Err(e.into()),
		}

		if self.interactive && !self.check_echo(command).await? {
			return self.halted(Vec::new()).await;
		}

		self.send_framing(ERROR_SENTINEL_COMMAND).await?;
		let mut errors = Vec::new();
		loop {
			match self.stderr.next_payload_line().await? {
				Some(line) if line == ERROR_SENTINEL_LINE => break,
				Some(line) if line == HALT_LINE => {
					warn!(target = "rsession.engine", %command, "slave halted");
					return self.halted(errors).await;
				}
				Some(line) => {
					debug!(target = "rsession.slave", %line, "stderr");
					errors.push(line);
				}
				None => {
					warn!(target = "rsession.engine", %command, "slave closed stderr mid-command");
					return self.halted(errors).await;
				}
			}
		}

		self.send_framing(OUTPUT_SENTINEL_COMMAND).await?;
		let mut output = Vec::new();
		loop {
			match self.stdout.next_payload_line().await? {
				Some(line) if line == OUTPUT_SENTINEL_LINE => break,
				Some(line) => output.push(line),
				None => {
					warn!(target = "rsession.engine", %command, "slave closed stdout mid-command");
					return Ok(Exchange::Halted(ResponseLines { output, errors }));
				}
			}
		}

		let response = ResponseLines { output, errors };
		self.history.push_front(command.to_string());
		self.transcript.record(command, &response).await;
		Ok(Exchange::Completed(response))
	}

	/// Reads the echo of the command just written. Returns `false` when the echo
	/// channel ended instead.
	async fn check_echo(&mut self, command: &str) -> Result<bool> {
		let mut sent = command.lines();
		let first = sent.next().unwrap_or_default();
		let reader = self.echo_reader();

		let Some(line) = reader.next_payload_line().await? else {
			return Ok(false);
		};
		if !is_echo_of(&line, first) {
			warn!(target = "rsession.engine", expected = first, received = %line, "echo mismatch");
			let pair = (first.to_string(), line);
			self.desync = Some(pair.clone());
			return Err(Error::ProtocolDesync {
				expected: pair.0,
				received: pair.1,
			});
		}
		for continuation in sent {
			reader.expect_continuation_echo(continuation);
		}
		Ok(true)
	}

	/// Writes a sentinel, registering its echo. A broken pipe here is left for
	/// the read side to report as a halt.
	async fn send_framing(&mut self, command: &str) -> Result<()> {
		if self.interactive {
			self.echo_reader().expect_framing_echo(command);
		}
		match self.stdin.write_line(command).await {
			Ok(()) => Ok(()),
			Err(e) if is_broken_pipe(&e) => {
				debug!(target = "rsession.engine", sentinel = command, "slave input closed");
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn halted(&mut self, errors: Vec<String>) -> Result<Exchange> {
		let output = self.stdout.drain().await?;
		Ok(Exchange::Halted(ResponseLines { output, errors }))
	}

	fn echo_reader(&mut self) -> &mut LineReader {
		match self.echo {
			Channel::Output => &mut self.stdout,
			Channel::Error => &mut self.stderr,
		}
	}

	/// Command texts, most recent first.
	pub fn history(&self) -> &VecDeque<String> {
		&self.history
	}

	pub fn clear_history(&mut self) {
		self.history.clear();
	}

	pub fn is_interactive(&self) -> bool {
		self.interactive
	}

	pub fn is_desynced(&self) -> bool {
		self.desync.is_some()
	}

	/// OS process id of the slave, if it is a child process.
	pub fn pid(&self) -> Option<u32> {
		self.child.as_ref().and_then(Child::id)
	}

	/// Asks the slave to quit, closes the pipes and waits for it to exit, killing
	/// it after a grace period.
	pub async fn shutdown(mut self) -> Result<()> {
		if let Err(e) = self.stdin.write_line(QUIT_COMMAND).await {
			debug!(target = "rsession.engine", error = %e, "quit command not delivered");
		}
		tokio::time::sleep(QUIT_GRACE).await;

		if let Err(e) = self.stdin.close().await {
			debug!(target = "rsession.engine", error = %e, "closing slave input failed");
		}
		self.transcript.close().await;

		let Self { stdin, stdout, stderr, child, .. } = self;
		drop((stdin, stdout, stderr));

		if let Some(child) = child {
			slave::reap(child, EXIT_GRACE).await?;
		}
		info!(target = "rsession.engine", "slave closed");
		Ok(())
	}

	/// Gives up the raw streams, abandoning any buffered but unread lines.
	pub fn into_parts(self) -> ConnectionParts {
		ConnectionParts {
			stdin: self.stdin.into_inner(),
			stdout: self.stdout.into_inner(),
			stderr: self.stderr.into_inner(),
			child: self.child,
		}
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("pid", &self.pid())
			.field("interactive", &self.interactive)
			.field("echo", &self.echo)
			.field("history", &self.history.len())
			.field("desynced", &self.desync.is_some())
			.finish_non_exhaustive()
	}
}
