use std::path::PathBuf;

use rsession_protocol::sentinel::{ERROR_SENTINEL_COMMAND, OUTPUT_SENTINEL_COMMAND, OUTPUT_SENTINEL_LINE};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

use super::*;
use crate::driver::default_args;
use crate::slave::Spawner;
use crate::testing::FakeSpawner;
use crate::transcript::{Record, TranscriptMode};

async fn open(spawner: &FakeSpawner, config: ConnectionConfig) -> Connection {
	let process = spawner
		.spawn(PathBuf::from("R"), default_args(config.interactive))
		.await
		.unwrap();
	Connection::open(process, config).await.unwrap()
}

fn interactive(echo: Channel) -> ConnectionConfig {
	ConnectionConfig {
		interactive: true,
		echo,
		..Default::default()
	}
}

fn completed(exchange: Exchange) -> ResponseLines {
	match exchange {
		Exchange::Completed(lines) => lines,
		Exchange::Halted(lines) => panic!("unexpected halt: {:?}", lines),
	}
}

#[tokio::test]
async fn test_handshake_discards_banner() {
	let spawner = FakeSpawner::new();
	let mut connection = open(&spawner, ConnectionConfig::default()).await;

	let lines = completed(connection.exchange("print(1)").await.unwrap());
	assert_eq!(lines.output, vec!["[1] 1"]);
	assert!(lines.errors.is_empty());
}

#[tokio::test]
async fn test_exchange_collects_both_channels() {
	let spawner = FakeSpawner::new();
	let mut connection = open(&spawner, ConnectionConfig::default()).await;

	let lines = completed(
		connection
			.exchange("x <- c(1,2); message('note'); print(x)")
			.await
			.unwrap(),
	);
	assert_eq!(lines.output, vec!["[1] 1 2"]);
	assert_eq!(lines.errors, vec!["note"]);
}

#[tokio::test]
async fn test_history_is_most_recent_first() {
	let spawner = FakeSpawner::new();
	let mut connection = open(&spawner, ConnectionConfig::default()).await;

	connection.exchange("x <- 1").await.unwrap();
	connection.exchange("y <- 2").await.unwrap();

	let history: Vec<&str> = connection.history().iter().map(String::as_str).collect();
	assert_eq!(history, vec!["y <- 2", "x <- 1"]);

	connection.clear_history();
	assert!(connection.history().is_empty());
}

#[tokio::test]
async fn test_sentinels_follow_each_command() {
	let spawner = FakeSpawner::new();
	let mut connection = open(&spawner, ConnectionConfig::default()).await;

	connection.exchange("x <- 1").await.unwrap();

	let inputs = spawner.inputs(0);
	assert_eq!(
		&inputs[inputs.len() - 3..],
		&["x <- 1", ERROR_SENTINEL_COMMAND, OUTPUT_SENTINEL_COMMAND]
	);
}

#[tokio::test]
async fn test_halt_skips_output_sentinel_and_history() {
	let spawner = FakeSpawner::new();
	let mut connection = open(&spawner, ConnectionConfig::default()).await;
	connection.exchange("x <- 1").await.unwrap();

	let exchange = connection.exchange("print(x); stop('bad')").await.unwrap();
	assert!(exchange.is_halted());
	let lines = exchange.into_lines();
	assert_eq!(lines.output, vec!["[1] 1"]);
	assert_eq!(lines.errors, vec!["Error: bad"]);

	assert_eq!(connection.history().len(), 1);
	assert!(!spawner.inputs(0).iter().skip(5).any(|l| l == OUTPUT_SENTINEL_COMMAND));
}

#[tokio::test]
async fn test_broken_pipe_returns_empty_response() {
	let spawner = FakeSpawner::new();
	let mut connection = open(&spawner, ConnectionConfig::default()).await;
	assert!(connection.exchange("stop('x')").await.unwrap().is_halted());

	let exchange = connection.exchange("x <- 1").await.unwrap();
	assert_eq!(exchange, Exchange::Completed(ResponseLines::default()));
	assert!(connection.history().is_empty());
}

#[tokio::test]
async fn test_interactive_echo_on_output() {
	let spawner = FakeSpawner::new();
	let mut connection = open(&spawner, interactive(Channel::Output)).await;

	let lines = completed(connection.exchange("print('a')").await.unwrap());
	assert_eq!(lines.output, vec!["[1] \"a\""]);

	let lines = completed(connection.exchange("x <- 2").await.unwrap());
	assert!(lines.is_empty());
	assert!(!connection.is_desynced());
}

#[tokio::test]
async fn test_interactive_echo_on_error() {
	let spawner = FakeSpawner::new().echo_on(Channel::Error);
	let mut connection = open(&spawner, interactive(Channel::Error)).await;

	let lines = completed(connection.exchange("message('m'); print(3)").await.unwrap());
	assert_eq!(lines.output, vec!["[1] 3"]);
	assert_eq!(lines.errors, vec!["m"]);

	let lines = completed(connection.exchange("print(4)").await.unwrap());
	assert_eq!(lines.output, vec!["[1] 4"]);
}

#[tokio::test]
async fn test_interactive_errors_do_not_halt() {
	let spawner = FakeSpawner::new();
	let mut connection = open(&spawner, interactive(Channel::Output)).await;

	let lines = completed(connection.exchange("stop('soft')").await.unwrap());
	assert_eq!(lines.errors, vec!["Error: soft"]);
	assert_eq!(connection.history().len(), 1);
}

#[tokio::test]
async fn test_echo_mismatch_desyncs_connection() {
	let (host_stdin, slave_stdin) = duplex(1024);
	let (mut slave_stdout, host_stdout) = duplex(1024);
	let (_slave_stderr, host_stderr) = duplex(1024);

	tokio::spawn(async move {
		let mut lines = BufReader::new(slave_stdin).lines();
		while let Ok(Some(_)) = lines.next_line().await {
			slave_stdout.write_all(b"> something else\n").await.unwrap();
		}
	});

	let process = SlaveProcess {
		stdin: Box::new(host_stdin),
		stdout: Box::new(host_stdout),
		stderr: Box::new(host_stderr),
		child: None,
	};
	let mut connection = Connection::new(process, interactive(Channel::Output)).await;

	let err = connection.exchange("x <- 1").await.unwrap_err();
	match &err {
		Error::ProtocolDesync { expected, received } => {
			assert_eq!(expected, "x <- 1");
			assert_eq!(received, "> something else");
		}
		other => panic!("unexpected error: {other:?}"),
	}
	assert!(connection.is_desynced());

	// Further commands are refused without touching the streams.
	assert!(connection.exchange("y <- 2").await.unwrap_err().is_desync());
	assert!(connection.history().is_empty());
}

#[tokio::test]
async fn test_multiline_command_with_continuation_prompt() {
	let (host_stdin, slave_stdin) = duplex(4096);
	let (mut slave_stdout, host_stdout) = duplex(4096);
	let (mut slave_stderr, host_stderr) = duplex(4096);

	// Echoes like R: `+ ` while a brace is open.
	tokio::spawn(async move {
		let mut lines = BufReader::new(slave_stdin).lines();
		let mut depth = 0i64;
		while let Ok(Some(line)) = lines.next_line().await {
			let prompt = if depth > 0 { "+ " } else { "> " };
			depth += line.matches('{').count() as i64 - line.matches('}').count() as i64;
			slave_stdout.write_all(format!("{prompt}{line}\n").as_bytes()).await.unwrap();
			match line.as_str() {
				ERROR_SENTINEL_COMMAND => slave_stderr.write_all(b"rsession_eoc\n").await.unwrap(),
				OUTPUT_SENTINEL_COMMAND => slave_stdout
					.write_all(format!("{OUTPUT_SENTINEL_LINE}\n").as_bytes())
					.await
					.unwrap(),
				"print(2)" => slave_stdout.write_all(b"[1] 2\n").await.unwrap(),
				_ => {}
			}
		}
	});

	let process = SlaveProcess {
		stdin: Box::new(host_stdin),
		stdout: Box::new(host_stdout),
		stderr: Box::new(host_stderr),
		child: None,
	};
	let mut connection = Connection::new(process, interactive(Channel::Output)).await;

	let lines = completed(connection.exchange("f <- function() {\n1\n}").await.unwrap());
	assert!(lines.is_empty(), "echoes leaked: {lines:?}");

	let lines = completed(connection.exchange("print(2)").await.unwrap());
	assert_eq!(lines.output, vec!["[1] 2"]);
	assert!(lines.errors.is_empty());
	assert_eq!(connection.history().len(), 2);
}

#[tokio::test]
async fn test_transcript_records_exchanges() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("session.Rout");

	let spawner = FakeSpawner::new();
	let config = ConnectionConfig {
		transcript: TranscriptSpec {
			path: Some(path.clone()),
			mode: TranscriptMode::Once,
			record: Record::Both,
		},
		..Default::default()
	};
	let mut connection = open(&spawner, config).await;
	connection.exchange("x <- 5").await.unwrap();
	connection.exchange("message('hi'); print(x)").await.unwrap();
	connection.shutdown().await.unwrap();

	let text = std::fs::read_to_string(&path).unwrap();
	assert_eq!(text, "> x <- 5\n> message('hi'); print(x)\n[1] 5\n! hi\n");
}

#[tokio::test]
async fn test_shutdown_sends_quit() {
	let spawner = FakeSpawner::new();
	let connection = open(&spawner, ConnectionConfig::default()).await;

	connection.shutdown().await.unwrap();

	assert_eq!(spawner.inputs(0).last().map(String::as_str), Some(QUIT_COMMAND));
}

#[tokio::test]
async fn test_into_parts_hands_over_streams() {
	let spawner = FakeSpawner::new();
	let connection = open(&spawner, ConnectionConfig::default()).await;

	let mut parts = connection.into_parts();
	assert!(parts.child.is_none());
	parts.stdin.write_all(b"print(7)\n").await.unwrap();
	parts.stdin.flush().await.unwrap();

	let mut stdout = BufReader::new(parts.stdout).lines();
	assert_eq!(stdout.next_line().await.unwrap().as_deref(), Some("[1] 7"));
}
