//! Halt recovery.
//!
//! Runs once per detected halt, while the caller still holds the session's
//! lock:
//!
//! ```text
//! Detected → PolicyLookup → Aborting     → (process exit)
//!                         → Failing      → Terminated
//!                         → Restarting   → Resumed | Terminated
//!                         → Reinstating  → Resumed | Terminated
//!                         → Delegated    → Terminated
//! ```
//!
//! Detection always removes the session from the registry first, so other
//! callers see it as closed while recovery runs. Only a successful restart or
//! reinstate puts it back, under the same alias and at its old position.

use rsession_runtime::{Connection, Exchange, ResponseLines};
use tracing::{debug, error, info, warn};

use crate::error::{Error, HaltOutcome, Result};
use crate::handlers::HaltContext;
use crate::options::HaltPolicy;
use crate::registry::{Registry, SessionHandle};
use crate::session::Session;

/// Applies the session's halt policy after `command` halted its slave.
///
/// Returns the halted response only when a delegated handler succeeds; every
/// other path ends in an error describing what happened to the session.
pub(crate) async fn recover(
	registry: &Registry,
	handle: &SessionHandle,
	session: &mut Session,
	command: &str,
	response: ResponseLines,
) -> Result<ResponseLines> {
	let alias = session.alias.clone();
	warn!(
		target = "rsession.recovery",
		%alias,
		%command,
		errors = ?response.errors,
		"slave halted"
	);

	// Detected
	let position = registry.detach(&alias).unwrap_or(0);
	let Some(dead) = session.connection.take() else {
		return Err(Error::UnknownSessionAlias { alias });
	};
	let history: Vec<String> = dead.history().iter().cloned().collect();

	// PolicyLookup
	let policy = session.options.halt_policy.clone();
	debug!(target = "rsession.recovery", %alias, ?policy, history = history.len(), "applying halt policy");

	match policy {
		HaltPolicy::Abort => abort(&alias, command, &response),
		HaltPolicy::Fail => {
			drop(dead);
			info!(target = "rsession.recovery", %alias, "session failed and closed");
			Err(halted(alias, HaltOutcome::Failed, response))
		}
		HaltPolicy::Restart => {
			drop(dead);
			let config = session.options.respawn_config();
			let connection = registry.connect(&alias, &session.options, config).await?;
			resume(registry, handle, session, position, connection)?;
			Err(halted(alias, HaltOutcome::Restarted, response))
		}
		HaltPolicy::Reinstate => {
			drop(dead);
			if history.is_empty() {
				return Err(Error::ReinstateFailed {
					alias,
					reason: "no history was recorded".to_string(),
				});
			}
			let config = session.options.respawn_config();
			let mut connection = registry.connect(&alias, &session.options, config).await?;
			replay(&alias, &mut connection, &history).await?;
			resume(registry, handle, session, position, connection)?;
			Err(halted(alias, HaltOutcome::Reinstated, response))
		}
		HaltPolicy::Invoke(name) => {
			let streams = Some(dead.into_parts());
			delegate(registry, session, &name, command, response, history, streams).await
		}
		HaltPolicy::InvokeGround(name) => {
			drop(dead);
			delegate(registry, session, &name, command, response, history, None).await
		}
	}
}

fn halted(alias: String, outcome: HaltOutcome, response: ResponseLines) -> Error {
	Error::SlaveHalted {
		alias,
		outcome,
		errors: response.errors,
	}
}

/// Prints a diagnostic and exits the host process with status 1.
fn abort(alias: &str, command: &str, response: &ResponseLines) -> ! {
	error!(target = "rsession.recovery", %alias, %command, "slave halted under abort policy; exiting");
	eprintln!("rsession: slave '{alias}' halted while evaluating: {command}");
	for line in &response.errors {
		eprintln!("  {line}");
	}
	std::process::exit(1)
}

/// Replays `history` (most recent first) oldest to newest, discarding output.
async fn replay(alias: &str, connection: &mut Connection, history: &[String]) -> Result<()> {
	for command in history.iter().rev() {
		debug!(target = "rsession.recovery", %alias, %command, "replaying");
		let exchange = connection
			.exchange(command)
			.await
			.map_err(|e| Error::runtime(alias, e))?;
		if let Exchange::Halted(lines) = exchange {
			let detail = lines.errors.last().map(|e| format!(": {e}")).unwrap_or_default();
			return Err(Error::ReinstateFailed {
				alias: alias.to_string(),
				reason: format!("replay of {command:?} halted{detail}"),
			});
		}
	}
	Ok(())
}

fn resume(
	registry: &Registry,
	handle: &SessionHandle,
	session: &mut Session,
	position: usize,
	connection: Connection,
) -> Result<()> {
	let alias = session.alias.clone();
	session.connection = Some(connection);
	if let Err(e) = registry.reattach(position, &alias, handle) {
		// Someone reopened the alias meanwhile; the respawned slave is dropped.
		session.connection = None;
		return Err(e);
	}
	info!(target = "rsession.recovery", %alias, "session resumed");
	Ok(())
}

async fn delegate(
	registry: &Registry,
	session: &Session,
	name: &str,
	command: &str,
	response: ResponseLines,
	history: Vec<String>,
	streams: Option<rsession_runtime::ConnectionParts>,
) -> Result<ResponseLines> {
	let Some(handler) = registry.handlers.get(name) else {
		return Err(Error::HaltHandlerMissing {
			alias: session.alias.clone(),
			handler: name.to_string(),
		});
	};

	let context = HaltContext {
		alias: session.alias.clone(),
		command: command.to_string(),
		response: response.clone(),
		history,
		options: session.options.clone(),
		streams,
	};
	handler(context).await?;

	info!(target = "rsession.recovery", alias = %session.alias, handler = name, "halt delegated");
	Ok(response)
}
