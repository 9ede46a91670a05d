use clap::Parser;
use rsession_cli::cli::Cli;
use rsession_cli::error::CliError;
use rsession_cli::output::{self, OutputFormat};
use rsession_cli::{commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let format = cli.format;
	let command = cli.command.name();

	if let Err(err) = commands::dispatch(cli).await {
		handle_error(err, command, format);
		std::process::exit(1);
	}
}

fn handle_error(err: CliError, command: &str, format: OutputFormat) {
	let cmd_error = err.to_command_error();

	output::print_error_stderr(&cmd_error);

	// Agents reading stdout still get an envelope with ok=false.
	if format != OutputFormat::Text {
		let result = output::CommandResult::<()>::failure(command, cmd_error);
		output::print_result(&result, format);
	}
}
