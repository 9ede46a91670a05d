//! Slave process management
//!
//! The core only needs one contract from process creation: given an executable
//! and its arguments, hand back three raw byte streams. [`Spawner`] is that
//! contract; [`ProcessSpawner`] fulfils it with a real child process.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Error, Result};

/// Write half wired to the slave's stdin.
pub type SlaveWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half wired to the slave's stdout or stderr.
pub type SlaveReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed future returned by [`Spawner::spawn`].
pub type SpawnFuture<'a> = Pin<Box<dyn Future<Output = Result<SlaveProcess>> + Send + 'a>>;

/// How long a freshly spawned process must survive before it counts as started.
const STARTUP_PROBE: Duration = Duration::from_millis(100);

/// Streams of a running slave.
pub struct SlaveProcess {
	pub stdin: SlaveWriter,
	pub stdout: SlaveReader,
	pub stderr: SlaveReader,
	/// Process handle, absent for in-process slaves.
	pub child: Option<Child>,
}

impl std::fmt::Debug for SlaveProcess {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SlaveProcess")
			.field("pid", &self.child.as_ref().and_then(Child::id))
			.finish_non_exhaustive()
	}
}

/// Creates slave processes.
pub trait Spawner: Send + Sync {
	/// Starts `program` with `args` and returns its standard streams.
	fn spawn(&self, program: PathBuf, args: Vec<String>) -> SpawnFuture<'_>;
}

/// Spawns slaves as OS child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
	fn spawn(&self, program: PathBuf, args: Vec<String>) -> SpawnFuture<'_> {
		Box::pin(async move { launch(program, args).await })
	}
}

/// Launch the slave process
///
/// All three pipes are captured. The child is killed when its handle drops so a
/// crashed host never leaves orphaned interpreters behind.
///
/// # Errors
///
/// Returns `Error::LaunchFailed` if the process fails to start or exits during
/// the startup probe.
async fn launch(program: PathBuf, args: Vec<String>) -> Result<SlaveProcess> {
	debug!(target = "rsession.slave", program = %program.display(), ?args, "spawning slave");

	let mut child = Command::new(&program)
		.args(&args)
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true)
		.spawn()
		.map_err(|e| Error::LaunchFailed(format!("Failed to spawn {}: {}", program.display(), e)))?;

	tokio::time::sleep(STARTUP_PROBE).await;

	match child.try_wait() {
		Ok(Some(status)) => {
			return Err(Error::LaunchFailed(format!(
				"Slave process exited immediately with status: {}",
				status
			)));
		}
		Ok(None) => {}
		Err(e) => {
			return Err(Error::LaunchFailed(format!("Failed to check process status: {}", e)));
		}
	}

	let missing = || Error::LaunchFailed("child process pipes were not captured".to_string());
	let stdin = child.stdin.take().ok_or_else(missing)?;
	let stdout = child.stdout.take().ok_or_else(missing)?;
	let stderr = child.stderr.take().ok_or_else(missing)?;

	Ok(SlaveProcess {
		stdin: Box::new(stdin),
		stdout: Box::new(stdout),
		stderr: Box::new(stderr),
		child: Some(child),
	})
}

/// Waits for `child` to exit, killing it once `grace` runs out.
pub async fn reap(mut child: Child, grace: Duration) -> Result<()> {
	match tokio::time::timeout(grace, child.wait()).await {
		Ok(Ok(status)) => {
			debug!(target = "rsession.slave", %status, "slave exited");
			Ok(())
		}
		Ok(Err(e)) => Err(Error::Io(e)),
		Err(_) => {
			debug!(target = "rsession.slave", "slave still running after grace period; killing");
			child
				.kill()
				.await
				.map_err(|e| Error::LaunchFailed(format!("Failed to kill process: {}", e)))?;
			let _ = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
			Ok(())
		}
	}
}
