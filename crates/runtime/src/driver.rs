//! R executable discovery
//!
//! Handles locating the R binary and assembling the arguments that put it in
//! slave mode.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Arguments for a non-interactive slave: no readline, no prompts, no workspace
/// save or restore.
const SLAVE_ARGS: &[&str] = &["--no-readline", "--slave", "--no-save", "--no-restore"];

/// Get the path to the R executable
///
/// This function attempts to locate R in the following order:
/// 1. RSESSION_BIN environment variable (runtime override)
/// 2. R_HOME environment variable (`$R_HOME/bin/R`)
/// 3. `R` on PATH
/// 4. Common installation locations
///
/// # Errors
///
/// Returns `Error::SlaveNotFound` if no usable executable is found.
pub fn find_slave_executable() -> Result<PathBuf> {
	// 1. Explicit override
	if let Some(path) = std::env::var_os("RSESSION_BIN").map(PathBuf::from) {
		if slave_is_usable(&path) {
			return Ok(path);
		}
		warn!(
			target = "rsession.driver",
			path = %path.display(),
			"RSESSION_BIN is set but not runnable; falling back"
		);
	}

	// 2. R_HOME
	if let Some(home) = std::env::var_os("R_HOME").map(PathBuf::from) {
		let path = home.join("bin").join(executable_name());
		if slave_is_usable(&path) {
			return Ok(path);
		}
	}

	// 3. PATH
	if let Ok(path) = which::which("R") {
		debug!(target = "rsession.driver", path = %path.display(), "found R on PATH");
		return Ok(path);
	}

	// 4. Common locations
	for location in common_locations() {
		let path = PathBuf::from(location);
		if slave_is_usable(&path) {
			return Ok(path);
		}
	}

	Err(Error::SlaveNotFound)
}

/// Default argument list for a slave, with `--interactive` when the caller
/// wants R to behave as if attached to a console (echoing input back).
pub fn default_args(interactive: bool) -> Vec<String> {
	let mut args: Vec<String> = SLAVE_ARGS.iter().map(|a| a.to_string()).collect();
	if interactive {
		args.push("--interactive".to_string());
	}
	args
}

fn executable_name() -> &'static str {
	if cfg!(windows) { "R.exe" } else { "R" }
}

fn slave_is_usable(path: &Path) -> bool {
	path.exists()
		&& Command::new(path)
			.arg("--version")
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.status()
			.map(|status| status.success())
			.unwrap_or(false)
}

#[cfg(not(windows))]
fn common_locations() -> &'static [&'static str] {
	&[
		"/usr/local/bin/R",
		"/usr/bin/R",
		"/opt/homebrew/bin/R",
		"/Library/Frameworks/R.framework/Resources/bin/R",
	]
}

#[cfg(windows)]
fn common_locations() -> &'static [&'static str] {
	&["C:\\Program Files\\R\\bin\\R.exe"]
}
