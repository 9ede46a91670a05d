//! In-process fake slave for tests.
//!
//! [`FakeSpawner`] hands out duplex pipes wired to a tiny interpreter task that
//! understands just enough R to exercise the protocol: assignments, `c(...)`,
//! numeric/string/logical literals, `print`, `message`, `stop`, `invisible` and
//! `q`. Every line the host writes is logged per spawn so tests can assert on
//! exactly what was sent.
//!
//! Like a non-interactive R, an error halts the fake with `Execution halted`.
//! With `--interactive` among its arguments it echoes each input line as
//! `> line` on the configured channel and survives errors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rsession_protocol::sentinel::{ERROR_SENTINEL_COMMAND, HALT_LINE, OUTPUT_SENTINEL_COMMAND};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use crate::connection::Channel;
use crate::error::Error;
use crate::slave::{SlaveProcess, SpawnFuture, Spawner};

const PIPE_CAPACITY: usize = 64 * 1024;

/// First line the fake prints, standing in for R's startup banner.
pub const FAKE_BANNER: &str = "fake R slave ready";

/// What one spawn was asked to run, plus every line it received.
#[derive(Debug, Clone, Default)]
pub struct SpawnRecord {
	pub program: PathBuf,
	pub args: Vec<String>,
	pub inputs: Vec<String>,
}

/// Spawner backed by in-process fake slaves.
#[derive(Clone, Default)]
pub struct FakeSpawner {
	canned: Arc<Mutex<HashMap<String, Vec<String>>>>,
	echo: Channel,
	refuse: Arc<AtomicBool>,
	log: Arc<Mutex<Vec<SpawnRecord>>>,
}

impl FakeSpawner {
	pub fn new() -> Self {
		Self::default()
	}

	/// Interactive fakes echo on `channel`.
	pub fn echo_on(mut self, channel: Channel) -> Self {
		self.echo = channel;
		self
	}

	/// Makes the statement `statement` print `lines` verbatim on stdout.
	pub fn with_output<I, S>(self, statement: &str, lines: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.canned
			.lock()
			.insert(statement.to_string(), lines.into_iter().map(Into::into).collect());
		self
	}

	/// While set, every spawn fails with `LaunchFailed`.
	pub fn refuse_spawns(&self, refuse: bool) {
		self.refuse.store(refuse, Ordering::SeqCst);
	}

	pub fn spawn_count(&self) -> usize {
		self.log.lock().len()
	}

	pub fn record(&self, spawn: usize) -> Option<SpawnRecord> {
		self.log.lock().get(spawn).cloned()
	}

	/// Every line received by the `spawn`th fake.
	pub fn inputs(&self, spawn: usize) -> Vec<String> {
		self.log.lock().get(spawn).map(|r| r.inputs.clone()).unwrap_or_default()
	}

	/// Lines received by the `spawn`th fake, minus sentinels and quit.
	pub fn commands(&self, spawn: usize) -> Vec<String> {
		self.inputs(spawn)
			.into_iter()
			.filter(|l| l != ERROR_SENTINEL_COMMAND && l != OUTPUT_SENTINEL_COMMAND && !is_quit(l))
			.collect()
	}
}

impl Spawner for FakeSpawner {
	fn spawn(&self, program: PathBuf, args: Vec<String>) -> SpawnFuture<'_> {
		Box::pin(async move {
			if self.refuse.load(Ordering::SeqCst) {
				return Err(Error::LaunchFailed(format!("{} refused by fake spawner", program.display())));
			}

			let interactive = args.iter().any(|a| a == "--interactive");
			let index = {
				let mut log = self.log.lock();
				log.push(SpawnRecord { program, args, inputs: Vec::new() });
				log.len() - 1
			};

			let (host_stdin, slave_stdin) = tokio::io::duplex(PIPE_CAPACITY);
			let (slave_stdout, host_stdout) = tokio::io::duplex(PIPE_CAPACITY);
			let (slave_stderr, host_stderr) = tokio::io::duplex(PIPE_CAPACITY);

			let fake = FakeSlave {
				stdout: slave_stdout,
				stderr: slave_stderr,
				vars: HashMap::new(),
				canned: self.canned.lock().clone(),
				interactive,
				echo: self.echo,
				log: Arc::clone(&self.log),
				index,
			};
			tokio::spawn(fake.run(slave_stdin));

			Ok(SlaveProcess {
				stdin: Box::new(host_stdin),
				stdout: Box::new(host_stdout),
				stderr: Box::new(host_stderr),
				child: None,
			})
		})
	}
}

enum Step {
	Continue,
	Exit,
}

struct FakeSlave {
	stdout: DuplexStream,
	stderr: DuplexStream,
	vars: HashMap<String, Vec<String>>,
	canned: HashMap<String, Vec<String>>,
	interactive: bool,
	echo: Channel,
	log: Arc<Mutex<Vec<SpawnRecord>>>,
	index: usize,
}

impl FakeSlave {
	async fn run(mut self, stdin: DuplexStream) {
		if self.out(FAKE_BANNER).await.is_err() {
			return;
		}

		let mut lines = BufReader::new(stdin).lines();
		while let Ok(Some(line)) = lines.next_line().await {
			if let Some(record) = self.log.lock().get_mut(self.index) {
				record.inputs.push(line.clone());
			}
			if self.interactive {
				let echo = format!("> {line}");
				let written = match self.echo {
					Channel::Output => self.out(&echo).await,
					Channel::Error => self.err(&echo).await,
				};
				if written.is_err() {
					return;
				}
			}
			match self.line(&line).await {
				Ok(Step::Continue) => {}
				Ok(Step::Exit) | Err(_) => return,
			}
		}
	}

	async fn line(&mut self, line: &str) -> std::io::Result<Step> {
		if let Some(lines) = self.canned.get(line.trim()).cloned() {
			for l in lines {
				self.out(&l).await?;
			}
			return Ok(Step::Continue);
		}

		for statement in split_statements(line) {
			match self.statement(&statement).await? {
				Ok(()) => {}
				Err(Exit) => return Ok(Step::Exit),
			}
		}
		Ok(Step::Continue)
	}

	/// Inner `Err(Exit)` means the fake should stop.
	async fn statement(&mut self, statement: &str) -> std::io::Result<Result<(), Exit>> {
		if is_quit(statement) {
			return Ok(Err(Exit));
		}

		let outcome = self.evaluate(statement);
		match outcome {
			Ok(Effect::Print(tokens)) => self.out(&render(&tokens)).await?,
			Ok(Effect::Message(text)) => self.err(&text).await?,
			Ok(Effect::Silent) => {}
			Err(message) => {
				self.err(&format!("Error: {message}")).await?;
				if !self.interactive {
					self.err(HALT_LINE).await?;
					return Ok(Err(Exit));
				}
			}
		}
		Ok(Ok(()))
	}

	fn evaluate(&mut self, statement: &str) -> Result<Effect, String> {
		if let Some((name, value)) = split_assignment(statement) {
			let tokens = self.value(value)?;
			self.vars.insert(name.to_string(), tokens);
			return Ok(Effect::Silent);
		}
		if let Some((func, arg)) = split_call(statement) {
			match func {
				"print" => return self.value(arg).map(Effect::Print),
				"invisible" => return self.value(arg).map(|_| Effect::Silent),
				"message" => {
					let tokens = self.value(arg)?;
					return Ok(Effect::Message(tokens.iter().map(|t| unquote(t)).collect()));
				}
				"stop" => {
					let tokens = self.value(arg)?;
					return Err(tokens.iter().map(|t| unquote(t)).collect());
				}
				_ => {}
			}
		}
		self.value(statement).map(Effect::Print)
	}

	fn value(&self, expr: &str) -> Result<Vec<String>, String> {
		let expr = expr.trim();
		if let Some((func, args)) = split_call(expr) {
			if func != "c" {
				return Err(format!("could not find function \"{func}\""));
			}
			let mut tokens = Vec::new();
			for arg in split_top_level(args, ',') {
				if !arg.trim().is_empty() {
					tokens.extend(self.value(&arg)?);
				}
			}
			return Ok(tokens);
		}
		if let Some(inner) = string_literal(expr) {
			return Ok(vec![format!("\"{inner}\"")]);
		}
		match expr {
			"NULL" => return Ok(Vec::new()),
			"TRUE" | "FALSE" => return Ok(vec![expr.to_string()]),
			_ => {}
		}
		if expr.parse::<f64>().is_ok() {
			return Ok(vec![expr.to_string()]);
		}
		self.vars
			.get(expr)
			.cloned()
			.ok_or_else(|| format!("object '{expr}' not found"))
	}

	async fn out(&mut self, line: &str) -> std::io::Result<()> {
		write_line(&mut self.stdout, line).await
	}

	async fn err(&mut self, line: &str) -> std::io::Result<()> {
		write_line(&mut self.stderr, line).await
	}
}

struct Exit;

enum Effect {
	Print(Vec<String>),
	Message(String),
	Silent,
}

async fn write_line(stream: &mut DuplexStream, line: &str) -> std::io::Result<()> {
	stream.write_all(line.as_bytes()).await?;
	stream.write_all(b"\n").await?;
	stream.flush().await
}

fn render(tokens: &[String]) -> String {
	if tokens.is_empty() {
		"NULL".to_string()
	} else {
		format!("[1] {}", tokens.join(" "))
	}
}

fn is_quit(line: &str) -> bool {
	let line = line.trim();
	line.starts_with("q(") || line.starts_with("quit(")
}

fn string_literal(expr: &str) -> Option<&str> {
	let quote = expr.chars().next().filter(|c| *c == '\'' || *c == '"')?;
	expr.strip_prefix(quote)?.strip_suffix(quote)
}

fn unquote(token: &str) -> String {
	string_literal(token).unwrap_or(token).to_string()
}

/// `name <- value` with a plain identifier on the left.
fn split_assignment(statement: &str) -> Option<(&str, &str)> {
	let idx = find_top_level(statement, "<-")?;
	let name = statement[..idx].trim();
	let is_identifier = !name.is_empty()
		&& name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
		&& !name.starts_with(|c: char| c.is_ascii_digit());
	is_identifier.then(|| (name, &statement[idx + 2..]))
}

/// `f(args)` where the parentheses wrap the whole expression.
fn split_call(expr: &str) -> Option<(&str, &str)> {
	let expr = expr.trim();
	let open = expr.find('(')?;
	let func = &expr[..open];
	if func.is_empty() || !func.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
		return None;
	}
	let body = expr[open + 1..].strip_suffix(')')?;
	// Reject `f(a) + g(b)` style expressions.
	let mut depth = 0i32;
	for (ch, _) in scan(body).filter(|(_, quoted)| !quoted) {
		match ch {
			'(' => depth += 1,
			')' => {
				depth -= 1;
				if depth < 0 {
					return None;
				}
			}
			_ => {}
		}
	}
	Some((func, body))
}

fn split_statements(line: &str) -> Vec<String> {
	split_top_level(line, ';')
		.into_iter()
		.map(|s| s.trim().to_string())
		.filter(|s| !s.is_empty())
		.collect()
}

fn split_top_level(text: &str, separator: char) -> Vec<String> {
	let mut parts = Vec::new();
	let mut current = String::new();
	let mut depth = 0i32;
	for (ch, quoted) in scan(text) {
		if !quoted {
			match ch {
				'(' => depth += 1,
				')' => depth -= 1,
				c if c == separator && depth == 0 => {
					parts.push(std::mem::take(&mut current));
					continue;
				}
				_ => {}
			}
		}
		current.push(ch);
	}
	parts.push(current);
	parts
}

fn find_top_level(text: &str, needle: &str) -> Option<usize> {
	let mut depth = 0i32;
	let mut offset = 0;
	for (ch, quoted) in scan(text) {
		if !quoted {
			match ch {
				'(' => depth += 1,
				')' => depth -= 1,
				_ if depth == 0 && text[offset..].starts_with(needle) => return Some(offset),
				_ => {}
			}
		}
		offset += ch.len_utf8();
	}
	None
}

/// Characters paired with whether they sit inside a string literal. Quote
/// characters themselves count as quoted.
fn scan(text: &str) -> impl Iterator<Item = (char, bool)> + '_ {
	let mut quote: Option<char> = None;
	let mut escaped = false;
	text.chars().map(move |ch| {
		if let Some(q) = quote {
			if escaped {
				escaped = false;
			} else if ch == '\\' {
				escaped = true;
			} else if ch == q {
				quote = None;
			}
			(ch, true)
		} else if ch == '\'' || ch == '"' {
			quote = Some(ch);
			(ch, true)
		} else {
			(ch, false)
		}
	})
}
