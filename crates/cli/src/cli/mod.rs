use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rsession::{Channel, HaltPolicy, Record, TranscriptMode};

use crate::output::OutputFormat;
use crate::styles::cli_styles;


/// Echo channel (CLI wrapper for rsession::Channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliChannel {
	Stdout,
	Stderr,
}

impl From<CliChannel> for Channel {
	fn from(channel: CliChannel) -> Self {
		match channel {
			CliChannel::Stdout => Channel::Output,
			CliChannel::Stderr => Channel::Error,
		}
	}
}

/// Transcript open mode (CLI wrapper for rsession::TranscriptMode)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CliTranscriptMode {
	/// Truncate once at open
	#[default]
	Once,
	/// Append, keeping the file open
	Append,
	/// Reopen for every command
	Many,
}

impl From<CliTranscriptMode> for TranscriptMode {
	fn from(mode: CliTranscriptMode) -> Self {
		match mode {
			CliTranscriptMode::Once => TranscriptMode::Once,
			CliTranscriptMode::Append => TranscriptMode::Append,
			CliTranscriptMode::Many => TranscriptMode::Many,
		}
	}
}

/// Transcript content (CLI wrapper for rsession::Record)
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliRecord {
	In,
	Out,
	Both,
}

impl From<CliRecord> for Record {
	fn from(record: CliRecord) -> Self {
		match record {
			CliRecord::In => Record::In,
			CliRecord::Out => Record::Out,
			CliRecord::Both => Record::Both,
		}
	}
}

#[derive(Parser, Debug)]
#[command(name = "rsession")]
#[command(about = "Drive an R slave session from the command line")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format
	#[arg(short = 'f', long, global = true, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	#[command(flatten)]
	pub session: SessionArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// Flags shaping the session a command runs in. Each one overrides config.
#[derive(Args, Debug, Default, Clone)]
pub struct SessionArgs {
	/// Path to the R executable
	#[arg(long, global = true, value_name = "PATH")]
	pub bin: Option<PathBuf>,

	/// Session alias (generated when omitted)
	#[arg(long, global = true)]
	pub alias: Option<String>,

	/// Run the slave interactively, with input echo
	#[arg(long, global = true)]
	pub interactive: bool,

	/// Channel the interactive echo arrives on
	#[arg(long, global = true, value_enum, value_name = "CHANNEL")]
	pub echo: Option<CliChannel>,

	/// What to do when the slave halts: abort, fail, restart, reinstate,
	/// invoke:<handler> or invoke-ground:<handler>
	#[arg(long, global = true, value_name = "POLICY")]
	pub halt_policy: Option<HaltPolicy>,

	/// Write a transcript of the session to FILE
	#[arg(long, global = true, value_name = "FILE")]
	pub transcript: Option<PathBuf>,

	#[arg(long, global = true, value_enum, requires = "transcript")]
	pub transcript_mode: Option<CliTranscriptMode>,

	#[arg(long, global = true, value_enum, requires = "transcript")]
	pub record: Option<CliRecord>,

	/// Extra argument passed to the slave (repeatable)
	#[arg(long = "slave-arg", global = true, value_name = "ARG", allow_hyphen_values = true)]
	pub slave_args: Vec<String>,

	/// Use FILE instead of the global config file
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Ignore any project .rsession.json
	#[arg(long, global = true)]
	pub no_project: bool,
}

/// An expression argument.
#[derive(Args, Debug, Clone)]
pub struct ExprArgs {
	/// R command text, or a JSON expression tree with --json; "-" reads stdin
	pub expr: String,

	/// Decode EXPR as a JSON expression tree
	#[arg(long)]
	pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Evaluate an expression and print what the slave printed
	Eval(ExprArgs),

	/// Print an expression's value as text
	Print(ExprArgs),

	/// Evaluate an expression and parse its printed value
	Query(ExprArgs),

	/// Run a file of commands, one per line, in a single session
	Script {
		file: PathBuf,

		/// Continue after a failing line
		#[arg(long)]
		keep_going: bool,
	},

	/// Show the effective session configuration
	Config,

	/// Show which R executable would be launched
	Which,
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Eval(_) => "eval",
			Commands::Print(_) => "print",
			Commands::Query(_) => "query",
			Commands::Script { .. } => "script",
			Commands::Config => "config",
			Commands::Which => "which",
		}
	}
}
