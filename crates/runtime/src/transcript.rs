//! Plain-text transcript of a session.
//!
//! Commands are written as `> <command>`, output lines verbatim and error lines
//! as `! <line>`. Transcript failures are logged and never fail a command.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::connection::ResponseLines;

/// How the transcript file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TranscriptMode {
	/// No transcript.
	#[default]
	Off,
	/// Truncate at open and keep the file open until close.
	Once,
	/// Append, keeping the file open until close.
	Append,
	/// Reopen in append mode around every write.
	Many,
}

/// Which side of each exchange is recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Record {
	In,
	Out,
	#[default]
	Both,
	None,
}

impl Record {
	fn input(self) -> bool {
		matches!(self, Record::In | Record::Both)
	}

	fn output(self) -> bool {
		matches!(self, Record::Out | Record::Both)
	}
}

/// Transcript configuration carried in session options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptSpec {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<PathBuf>,
	pub mode: TranscriptMode,
	pub record: Record,
}

impl TranscriptSpec {
	pub fn is_enabled(&self) -> bool {
		self.path.is_some() && self.mode != TranscriptMode::Off && self.record != Record::None
	}
}

enum Sink {
	Disabled,
	Held(File),
	PerWrite(PathBuf),
}

/// Open transcript sink.
pub struct Transcript {
	sink: Sink,
	record: Record,
}

impl Transcript {
	pub fn disabled() -> Self {
		Self { sink: Sink::Disabled, record: Record::None }
	}

	/// Opens the sink described by `spec`.
	///
	/// An unopenable file disables the transcript with a warning.
	pub async fn open(spec: &TranscriptSpec) -> Self {
		let Some(path) = spec.path.clone().filter(|_| spec.is_enabled()) else {
			return Self::disabled();
		};

		let sink = match spec.mode {
			TranscriptMode::Off => Sink::Disabled,
			TranscriptMode::Many => Sink::PerWrite(path),
			TranscriptMode::Once | TranscriptMode::Append => {
				let mut options = OpenOptions::new();
				options.create(true);
				if spec.mode == TranscriptMode::Once {
					options.write(true).truncate(true);
				} else {
					options.append(true);
				}
				match options.open(&path).await {
					Ok(file) => Sink::Held(file),
					Err(e) => {
						warn!(
							target = "rsession.transcript",
							path = %path.display(),
							error = %e,
							"cannot open transcript; recording disabled"
						);
						Sink::Disabled
					}
				}
			}
		};

		Self { sink, record: spec.record }
	}

	pub fn is_enabled(&self) -> bool {
		!matches!(self.sink, Sink::Disabled)
	}

	/// Records one completed exchange.
	pub async fn record(&mut self, command: &str, response: &ResponseLines) {
		if !self.is_enabled() {
			return;
		}

		let mut text = String::new();
		if self.record.input() {
			text.push_str("> ");
			text.push_str(command);
			text.push('\n');
		}
		if self.record.output() {
			for line in &response.output {
				text.push_str(line);
				text.push('\n');
			}
			for line in &response.errors {
				text.push_str("! ");
				text.push_str(line);
				text.push('\n');
			}
		}
		if text.is_empty() {
			return;
		}

		if let Err(e) = self.write(text.as_bytes()).await {
			warn!(target = "rsession.transcript", error = %e, "transcript write failed");
		}
	}

	async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
		match &mut self.sink {
			Sink::Disabled => Ok(()),
			Sink::Held(file) => {
				file.write_all(bytes).await?;
				file.flush().await
			}
			Sink::PerWrite(path) => {
				let mut file = OpenOptions::new().create(true).append(true).open(&*path).await?;
				file.write_all(bytes).await?;
				file.flush().await
			}
		}
	}

	/// Flushes and releases a held file.
	pub async fn close(&mut self) {
		if let Sink::Held(file) = &mut self.sink {
			if let Err(e) = file.sync_all().await {
				warn!(target = "rsession.transcript", error = %e, "transcript sync failed");
			}
		}
		self.sink = Sink::Disabled;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn response(output: &[&str], errors: &[&str]) -> ResponseLines {
		ResponseLines {
			output: output.iter().map(|s| s.to_string()).collect(),
			errors: errors.iter().map(|s| s.to_string()).collect(),
		}
	}

	fn spec(path: PathBuf, mode: TranscriptMode, record: Record) -> TranscriptSpec {
		TranscriptSpec { path: Some(path), mode, record }
	}

	#[tokio::test]
	async fn both_sides_are_recorded() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("session.txt");

		let mut transcript = Transcript::open(&spec(path.clone(), TranscriptMode::Once, Record::Both)).await;
		transcript.record("x <- 1", &response(&[], &[])).await;
		transcript.record("warn()", &response(&["[1] 2"], &["Warning message"])).await;
		transcript.close().await;

		let text = std::fs::read_to_string(&path).unwrap();
		assert_eq!(text, "> x <- 1\n> warn()\n[1] 2\n! Warning message\n");
	}

	#[tokio::test]
	async fn once_truncates_and_append_keeps() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("t.txt");
		std::fs::write(&path, "old\n").unwrap();

		let mut transcript = Transcript::open(&spec(path.clone(), TranscriptMode::Append, Record::In)).await;
		transcript.record("a", &response(&["ignored"], &[])).await;
		transcript.close().await;
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\n> a\n");

		let mut transcript = Transcript::open(&spec(path.clone(), TranscriptMode::Once, Record::Out)).await;
		transcript.record("b", &response(&["[1] 1"], &[])).await;
		transcript.close().await;
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1] 1\n");
	}

	#[tokio::test]
	async fn many_reopens_per_write() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("many.txt");

		let mut transcript = Transcript::open(&spec(path.clone(), TranscriptMode::Many, Record::In)).await;
		transcript.record("a", &response(&[], &[])).await;
		// Another writer in between is preserved.
		std::fs::write(&path, format!("{}other\n", std::fs::read_to_string(&path).unwrap())).unwrap();
		transcript.record("b", &response(&[], &[])).await;

		assert_eq!(std::fs::read_to_string(&path).unwrap(), "> a\nother\n> b\n");
	}

	#[tokio::test]
	async fn off_or_none_writes_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("off.txt");

		let transcript = Transcript::open(&spec(path.clone(), TranscriptMode::Off, Record::Both)).await;
		assert!(!transcript.is_enabled());
		let transcript = Transcript::open(&spec(path.clone(), TranscriptMode::Once, Record::None)).await;
		assert!(!transcript.is_enabled());
		assert!(!path.exists());
	}
}
