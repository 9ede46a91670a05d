//! Command dispatch.
//!
//! Every session command follows the same lifecycle: load config, resolve the
//! session options, open one session, run, then close everything whether or
//! not the run succeeded.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use rsession::{
	Evaluation, Expr, FunctionDefaults, ParsedValue, Registry, SessionOptions, SlotId, TranscriptSpec,
	find_slave_executable,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands, ExprArgs, SessionArgs};
use crate::config::{CliConfig, ConfigPaths, LoadedConfig};
use crate::error::{CliError, Result};
use crate::output::{self, CommandInputs, OutputFormat, ResultBuilder, TextOutput, render_value};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let format = cli.format;
	let command = cli.command.name();
	let cwd = std::env::current_dir()?;
	let paths = ConfigPaths::new(&cwd, cli.session.config.as_deref(), !cli.session.no_project);
	let loaded = LoadedConfig::load(&paths)?;

	match cli.command {
		Commands::Config => {
			let options = session_options(&loaded, &cli.session);
			let data = ConfigData {
				sources: loaded.sources,
				options,
				functions: loaded.config.functions,
			};
			emit(ResultBuilder::new(command).data(data), format);
			Ok(())
		}
		Commands::Which => {
			let path = resolve_executable(&cli.session, &loaded.config)?;
			emit(ResultBuilder::new(command).data(WhichData { path }), format);
			Ok(())
		}
		Commands::Eval(args) => {
			let expr = read_expr(&args)?;
			with_session(&loaded, &cli.session, |registry, alias| async move {
				let evaluation = registry.evaluate(alias.as_str(), &expr).await?;
				let builder = ResultBuilder::new(command)
					.inputs(expr_inputs(&alias, &args))
					.data(EvalData::new(alias, evaluation));
				emit(builder, format);
				Ok(())
			})
			.await
		}
		Commands::Print(args) => {
			let expr = read_expr(&args)?;
			with_session(&loaded, &cli.session, |registry, alias| async move {
				let text = registry.print(alias.as_str(), &expr).await?;
				let builder = ResultBuilder::new(command)
					.inputs(expr_inputs(&alias, &args))
					.data(PrintData { alias, text });
				emit(builder, format);
				Ok(())
			})
			.await
		}
		Commands::Query(args) => {
			let expr = read_expr(&args)?;
			with_session(&loaded, &cli.session, |registry, alias| async move {
				let value = registry.query(alias.as_str(), &expr).await?;
				let builder = ResultBuilder::new(command)
					.inputs(expr_inputs(&alias, &args))
					.data(QueryData { alias, value });
				emit(builder, format);
				Ok(())
			})
			.await
		}
		Commands::Script { file, keep_going } => {
			let source = std::fs::read_to_string(&file)
				.with_context(|| format!("failed to read script {}", file.display()))?;
			with_session(&loaded, &cli.session, |registry, alias| async move {
				let steps = run_script(&registry, &alias, &file, &source, keep_going, format).await?;
				let builder = ResultBuilder::new(command)
					.inputs(CommandInputs {
						alias: Some(alias.clone()),
						script: Some(file.display().to_string()),
						..Default::default()
					})
					.data(ScriptData { alias, steps });
				emit(builder, format);
				Ok(())
			})
			.await
		}
	}
}

fn emit<T: Serialize + TextOutput>(builder: ResultBuilder<T>, format: OutputFormat) {
	output::print_result(&builder.build(), format);
}

/// Config layers first, then command-line flags.
pub fn session_options(loaded: &LoadedConfig, args: &SessionArgs) -> SessionOptions {
	let mut options = loaded.config.session_options();
	if let Some(alias) = &args.alias {
		options.alias = Some(alias.clone());
	}
	if let Some(bin) = &args.bin {
		options.executable = Some(bin.clone());
	}
	if !args.slave_args.is_empty() {
		options.args.clone_from(&args.slave_args);
	}
	if args.interactive {
		options.interactive = true;
	}
	if let Some(echo) = args.echo {
		options.echo = echo.into();
	}
	if let Some(policy) = &args.halt_policy {
		options.halt_policy = policy.clone();
	}
	if let Some(path) = &args.transcript {
		options.transcript = TranscriptSpec {
			path: Some(path.clone()),
			mode: args.transcript_mode.unwrap_or_default().into(),
			record: args.record.map(Into::into).unwrap_or_default(),
		};
	}
	options
}

/// `--bin`, then `RSESSION_BIN`, then config, then discovery on `PATH`.
pub fn resolve_executable(args: &SessionArgs, config: &CliConfig) -> Result<PathBuf> {
	if let Some(bin) = &args.bin {
		return Ok(bin.clone());
	}
	if std::env::var_os("RSESSION_BIN").is_none() {
		if let Some(path) = &config.executable {
			return Ok(path.clone());
		}
	}
	find_slave_executable().map_err(|e| {
		debug!(target = "rsession.cli", error = %e, "discovery failed");
		CliError::Session(rsession::Error::SlaveNotFound)
	})
}

async fn with_session<F, Fut>(loaded: &LoadedConfig, args: &SessionArgs, run: F) -> Result<()>
where
	F: FnOnce(Arc<Registry>, String) -> Fut,
	Fut: std::future::Future<Output = Result<()>>,
{
	let mut options = session_options(loaded, args);
	options.executable = Some(resolve_executable(args, &loaded.config)?);

	let registry = Arc::new(Registry::new().with_function_defaults(loaded.config.functions.clone()));
	let alias = registry.open(options).await?;
	info!(target = "rsession.cli", %alias, "session open");

	let result = run(Arc::clone(&registry), alias).await;
	let closed = registry.close_all().await;
	if let Err(e) = &closed {
		warn!(target = "rsession.cli", error = %e, "closing sessions failed");
	}
	result?;
	closed.map_err(Into::into)
}

fn read_expr(args: &ExprArgs) -> Result<Expr> {
	let text = if args.expr == "-" {
		let mut buf = String::new();
		io::stdin().read_to_string(&mut buf)?;
		buf
	} else {
		args.expr.clone()
	};
	parse_expr(&text, args.json)
}

/// Decodes an expression argument: a JSON tree with `json`, raw R text otherwise.
pub fn parse_expr(text: &str, json: bool) -> Result<Expr> {
	if json {
		return serde_json::from_str(text).map_err(|e| CliError::Expression(e.to_string()));
	}
	let text = text.trim();
	if text.is_empty() {
		return Err(CliError::Expression("expression is empty".to_string()));
	}
	Ok(Expr::raw(text))
}

fn expr_inputs(alias: &str, args: &ExprArgs) -> CommandInputs {
	CommandInputs {
		alias: Some(alias.to_string()),
		expression: Some(args.expr.clone()),
		..Default::default()
	}
}

/// Lines worth sending from a script: blank lines and `#` comments are skipped.
pub fn script_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
	source
		.lines()
		.enumerate()
		.map(|(i, line)| (i + 1, line.trim()))
		.filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

async fn run_script(
	registry: &Registry,
	alias: &str,
	path: &Path,
	source: &str,
	keep_going: bool,
	format: OutputFormat,
) -> Result<Vec<ScriptStep>> {
	let mut steps = Vec::new();
	for (line, command) in script_lines(source) {
		debug!(target = "rsession.cli", line, %command, "script line");
		let step = match registry.evaluate(alias, &Expr::raw(command)).await {
			Ok(evaluation) => ScriptStep {
				line,
				command: command.to_string(),
				output: evaluation.output,
				errors: evaluation.errors,
				failure: None,
			},
			Err(source) if keep_going => ScriptStep {
				line,
				command: command.to_string(),
				output: Vec::new(),
				errors: Vec::new(),
				failure: Some(source.to_string()),
			},
			Err(source) => {
				return Err(CliError::Script {
					path: path.to_path_buf(),
					line,
					source,
				});
			}
		};
		// Text mode streams each step so a later failure keeps earlier output.
		if format == OutputFormat::Text {
			let _ = step.write_text(&mut io::stdout().lock(), &mut io::stderr().lock());
		}
		steps.push(step);
	}
	Ok(steps)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalData {
	pub alias: String,
	pub output: Vec<String>,
	pub errors: Vec<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub bindings: Vec<Binding>,
}

#[derive(Debug, Serialize)]
pub struct Binding {
	pub slot: SlotId,
	pub value: ParsedValue,
}

impl EvalData {
	fn new(alias: String, evaluation: Evaluation) -> Self {
		Self {
			alias,
			output: evaluation.output,
			errors: evaluation.errors,
			bindings: evaluation
				.bindings
				.into_iter()
				.map(|(slot, value)| Binding { slot, value })
				.collect(),
		}
	}
}

impl TextOutput for EvalData {
	fn write_text(&self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()> {
		for line in &self.output {
			writeln!(out, "{line}")?;
		}
		for line in &self.errors {
			writeln!(err, "{line}")?;
		}
		for binding in &self.bindings {
			writeln!(out, "{} = {}", binding.slot, render_value(&binding.value))?;
		}
		Ok(())
	}
}

#[derive(Debug, Serialize)]
pub struct PrintData {
	pub alias: String,
	pub text: String,
}

impl TextOutput for PrintData {
	fn write_text(&self, out: &mut dyn Write, _err: &mut dyn Write) -> io::Result<()> {
		if !self.text.is_empty() {
			writeln!(out, "{}", self.text)?;
		}
		Ok(())
	}
}

#[derive(Debug, Serialize)]
pub struct QueryData {
	pub alias: String,
	pub value: ParsedValue,
}

impl TextOutput for QueryData {
	fn write_text(&self, out: &mut dyn Write, _err: &mut dyn Write) -> io::Result<()> {
		writeln!(out, "{}", render_value(&self.value))
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
	pub line: usize,
	pub command: String,
	pub output: Vec<String>,
	pub errors: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure: Option<String>,
}

impl TextOutput for ScriptStep {
	fn write_text(&self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()> {
		for line in &self.output {
			writeln!(out, "{line}")?;
		}
		for line in &self.errors {
			writeln!(err, "{line}")?;
		}
		if let Some(failure) = &self.failure {
			writeln!(err, "line {}: {failure}", self.line)?;
		}
		Ok(())
	}
}

#[derive(Debug, Serialize)]
pub struct ScriptData {
	pub alias: String,
	pub steps: Vec<ScriptStep>,
}

impl TextOutput for ScriptData {
	// Steps were already streamed by run_script.
	fn write_text(&self, _out: &mut dyn Write, _err: &mut dyn Write) -> io::Result<()> {
		Ok(())
	}
}

#[derive(Debug, Serialize)]
pub struct ConfigData {
	pub sources: Vec<PathBuf>,
	pub options: SessionOptions,
	pub functions: FunctionDefaults,
}

impl TextOutput for ConfigData {
	fn write_text(&self, out: &mut dyn Write, _err: &mut dyn Write) -> io::Result<()> {
		for source in &self.sources {
			writeln!(out, "# {}", source.display())?;
		}
		let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
		writeln!(out, "{json}")
	}
}

#[derive(Debug, Serialize)]
pub struct WhichData {
	pub path: PathBuf,
}

impl TextOutput for WhichData {
	fn write_text(&self, out: &mut dyn Write, _err: &mut dyn Write) -> io::Result<()> {
		writeln!(out, "{}", self.path.display())
	}
}
