//! Layered CLI configuration.
//!
//! The global file lives at `<config dir>/rsession/config.json`; a project
//! `.rsession.json` found in the working directory or any ancestor is merged on
//! top. Command-line flags are applied last, in [`crate::commands`].

use std::fs;
use std::path::{Path, PathBuf};

use rsession::{Channel, FunctionDefaults, HaltPolicy, SessionOptions, TranscriptSpec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, Result};

pub const PROJECT_CONFIG_FILE: &str = ".rsession.json";

/// One config file's worth of settings. Absent fields leave lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub executable: Option<PathBuf>,
	/// Extra slave arguments; a non-empty list replaces the lower layer's.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub args: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub interactive: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub echo: Option<Channel>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub halt_policy: Option<HaltPolicy>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transcript: Option<TranscriptSpec>,
	pub functions: FunctionDefaults,
}

impl CliConfig {
	/// Layers `other` on top of `self`.
	pub fn merge(&mut self, other: &CliConfig) {
		if other.executable.is_some() {
			self.executable.clone_from(&other.executable);
		}
		if !other.args.is_empty() {
			self.args.clone_from(&other.args);
		}
		if other.interactive.is_some() {
			self.interactive = other.interactive;
		}
		if other.echo.is_some() {
			self.echo = other.echo;
		}
		if other.halt_policy.is_some() {
			self.halt_policy.clone_from(&other.halt_policy);
		}
		if other.transcript.is_some() {
			self.transcript.clone_from(&other.transcript);
		}
		self.functions.merge(&other.functions);
	}

	/// Session options described by this config, before command-line flags.
	pub fn session_options(&self) -> SessionOptions {
		SessionOptions {
			executable: self.executable.clone(),
			args: self.args.clone(),
			interactive: self.interactive.unwrap_or_default(),
			echo: self.echo.unwrap_or_default(),
			halt_policy: self.halt_policy.clone().unwrap_or_default(),
			transcript: self.transcript.clone().unwrap_or_default(),
			..SessionOptions::default()
		}
	}
}

/// Where config files are looked up.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
	pub global: PathBuf,
	pub project: Option<PathBuf>,
}

impl ConfigPaths {
	/// `global_override` replaces the global file; `search_project` enables the
	/// upward search for a project file starting at `cwd`.
	pub fn new(cwd: &Path, global_override: Option<&Path>, search_project: bool) -> Self {
		let global = global_override.map(Path::to_path_buf).unwrap_or_else(|| {
			dirs::config_dir()
				.unwrap_or_else(|| PathBuf::from("."))
				.join("rsession")
				.join("config.json")
		});
		let project = if search_project { find_project_config(cwd) } else { None };
		Self { global, project }
	}
}

fn find_project_config(cwd: &Path) -> Option<PathBuf> {
	cwd.ancestors()
		.map(|dir| dir.join(PROJECT_CONFIG_FILE))
		.find(|path| path.is_file())
}

/// Merged configuration plus the files it came from, lowest layer first.
#[derive(Debug, Default)]
pub struct LoadedConfig {
	pub config: CliConfig,
	pub sources: Vec<PathBuf>,
}

impl LoadedConfig {
	pub fn load(paths: &ConfigPaths) -> Result<Self> {
		let mut loaded = LoadedConfig::default();
		for path in std::iter::once(&paths.global).chain(paths.project.as_ref()) {
			if let Some(layer) = load_json::<CliConfig>(path)? {
				debug!(target = "rsession.cli", path = %path.display(), "loaded config");
				loaded.config.merge(&layer);
				loaded.sources.push(path.clone());
			}
		}
		Ok(loaded)
	}
}

/// Missing files are `None`; unreadable or invalid ones are errors.
fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
	let content = match fs::read_to_string(path) {
		Ok(content) => content,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e.into()),
	};
	serde_json::from_str(&content).map(Some).map_err(|e| CliError::Config {
		path: path.to_path_buf(),
		message: e.to_string(),
	})
}
