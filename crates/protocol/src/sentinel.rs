//! Fixed literals shared with the slave.
//!
//! The slave offers no response framing, so the engine injects commands whose
//! printed form is known in advance and reads until that form appears. These
//! strings must match what R prints exactly.

/// Marker text echoed back on both channels.
pub const MARKER: &str = "rsession_eoc";

/// Command appended after every user command to terminate the error channel.
pub const ERROR_SENTINEL_COMMAND: &str = "message('rsession_eoc')";

/// Line the slave writes to stderr in response to [`ERROR_SENTINEL_COMMAND`].
pub const ERROR_SENTINEL_LINE: &str = "rsession_eoc";

/// Command sent after the error channel settles to terminate the output channel.
pub const OUTPUT_SENTINEL_COMMAND: &str = "print('rsession_eoc')";

/// Line the slave writes to stdout in response to [`OUTPUT_SENTINEL_COMMAND`].
pub const OUTPUT_SENTINEL_LINE: &str = "[1] \"rsession_eoc\"";

/// Sole indicator that the slave died while evaluating a command.
pub const HALT_LINE: &str = "Execution halted";

/// Command written on session close.
pub const QUIT_COMMAND: &str = "q(save = \"no\")";

/// Prefix of slave-side variables minted for unbound assignment targets.
pub const PLACEHOLDER_PREFIX: &str = "pl_Rv_";

/// Prompt R prefixes to echoed input lines in interactive mode.
pub const ECHO_PROMPT: &str = "> ";

/// Prompt R shows while an expression spans several lines.
pub const CONTINUATION_PROMPT: &str = "+ ";

/// Returns true when `line` is the interactive echo of `sent`.
///
/// R echoes input either verbatim or behind its `> ` prompt depending on how the
/// console is attached, so both forms are accepted.
pub fn is_echo_of(line: &str, sent: &str) -> bool {
	let line = line.trim_end();
	let sent = sent.trim_end();
	line == sent || line.strip_prefix(ECHO_PROMPT) == Some(sent)
}

/// Returns true when `line` echoes a non-first line of a multi-line command.
///
/// Inside an incomplete expression R prompts with `+ `; a line that starts a
/// new statement gets the usual `> `.
pub fn is_continuation_echo_of(line: &str, sent: &str) -> bool {
	is_echo_of(line, sent) || line.trim_end().strip_prefix(CONTINUATION_PROMPT) == Some(sent.trim_end())
}
