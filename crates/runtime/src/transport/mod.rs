//! Line transport over the slave's pipes.
//!
//! The slave speaks newline-terminated text with no framing of its own. These
//! wrappers read and write whole lines and, for consoles that echo input, drop
//! the echoes of lines we sent ourselves.

use std::collections::VecDeque;
use std::io;

use rsession_protocol::sentinel::{is_continuation_echo_of, is_echo_of};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use crate::slave::{SlaveReader, SlaveWriter};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EchoKind {
	Command,
	Continuation,
	/// Echo of a sentinel command; the slave always echoes these.
	Framing,
}

#[derive(Debug)]
struct PendingEcho {
	text: String,
	kind: EchoKind,
}

impl PendingEcho {
	fn matches(&self, line: &str) -> bool {
		match self.kind {
			EchoKind::Continuation => is_continuation_echo_of(line, &self.text),
			EchoKind::Command | EchoKind::Framing => is_echo_of(line, &self.text),
		}
	}
}

/// Reads lines from stdout or stderr of the slave.
pub struct LineReader {
	inner: BufReader<SlaveReader>,
	/// Echoes still expected on this channel, oldest first.
	pending_echoes: VecDeque<PendingEcho>,
	buf: Vec<u8>,
	label: &'static str,
}

impl LineReader {
	pub fn new(reader: SlaveReader, label: &'static str) -> Self {
		Self {
			inner: BufReader::new(reader),
			pending_echoes: VecDeque::new(),
			buf: Vec::new(),
			label,
		}
	}

	/// Reads one raw line without its terminator. `None` at end-of-stream.
	///
	/// Bytes are decoded lossily; the slave's locale may not be UTF-8.
	pub async fn next_line(&mut self) -> io::Result<Option<String>> {
		self.buf.clear();
		let read = self.inner.read_until(b'\n', &mut self.buf).await?;
		if read == 0 {
			return Ok(None);
		}
		while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
			self.buf.pop();
		}
		let line = String::from_utf8_lossy(&self.buf).into_owned();
		trace!(target = "rsession.transport", channel = self.label, %line, "read");
		Ok(Some(line))
	}

	/// Reads the next line that is not the expected echo of something we sent.
	pub async fn next_payload_line(&mut self) -> io::Result<Option<String>> {
		loop {
			let Some(line) = self.next_line().await? else {
				return Ok(None);
			};
			if self.consume_echo(&line) {
				continue;
			}
			return Ok(Some(line));
		}
	}

	/// Queues an echo that should be dropped when it shows up on this channel.
	pub fn expect_echo(&mut self, sent: impl Into<String>) {
		self.queue(sent.into(), EchoKind::Command);
	}

	/// Queues the echo of a continuation line, which may carry the `+ ` prompt.
	pub fn expect_continuation_echo(&mut self, sent: impl Into<String>) {
		self.queue(sent.into(), EchoKind::Continuation);
	}

	/// Queues the echo of a sentinel command. Once it arrives, any older
	/// expected echoes that never showed up are given up on.
	pub fn expect_framing_echo(&mut self, sent: impl Into<String>) {
		self.queue(sent.into(), EchoKind::Framing);
	}

	fn queue(&mut self, text: String, kind: EchoKind) {
		self.pending_echoes.push_back(PendingEcho { text, kind });
	}

	/// Number of echoes queued but not yet seen.
	pub fn pending_echoes(&self) -> usize {
		self.pending_echoes.len()
	}

	fn consume_echo(&mut self, line: &str) -> bool {
		if self.pending_echoes.front().is_some_and(|e| e.matches(line)) {
			self.pending_echoes.pop_front();
			return true;
		}
		// Only a sentinel echo may jump the queue: it proves everything queued
		// before it is never coming.
		let Some(pos) = self
			.pending_echoes
			.iter()
			.position(|e| e.kind == EchoKind::Framing && e.matches(line))
		else {
			return false;
		};
		for stale in self.pending_echoes.drain(..pos) {
			debug!(target = "rsession.transport", channel = self.label, echo = %stale.text, "expected echo never arrived");
		}
		self.pending_echoes.pop_front();
		true
	}

	/// Reads payload lines until end-of-stream.
	pub async fn drain(&mut self) -> io::Result<Vec<String>> {
		let mut lines = Vec::new();
		while let Some(line) = self.next_payload_line().await? {
			lines.push(line);
		}
		Ok(lines)
	}

	pub fn into_inner(self) -> SlaveReader {
		self.inner.into_inner()
	}
}

/// Writes lines to the slave's stdin.
pub struct LineWriter {
	inner: SlaveWriter,
}

impl LineWriter {
	pub fn new(writer: SlaveWriter) -> Self {
		Self { inner: writer }
	}

	/// Writes `line` plus a newline and flushes.
	pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
		trace!(target = "rsession.transport", %line, "write");
		self.inner.write_all(line.as_bytes()).await?;
		self.inner.write_all(b"\n").await?;
		self.inner.flush().await
	}

	/// Closes the write half, signalling end-of-input to the slave.
	pub async fn close(&mut self) -> io::Result<()> {
		self.inner.shutdown().await
	}

	pub fn into_inner(self) -> SlaveWriter {
		self.inner
	}
}

/// Returns true for write errors meaning the slave end of the pipe is gone.
pub fn is_broken_pipe(err: &io::Error) -> bool {
	matches!(
		err.kind(),
		io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
	)
}
