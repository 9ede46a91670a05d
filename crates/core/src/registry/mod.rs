//! Session registry.
//!
//! Open sessions are kept in an ordered table keyed by alias. The head of the
//! order is the default session. The table sits behind a synchronous mutex that
//! is only held for lookups and edits, never across an await; each session has
//! its own async mutex so commands to one session run strictly in sequence
//! while different sessions proceed independently.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rsession_protocol::{Expr, FunctionDefaults, ParsedValue, parse};
use rsession_runtime::{Connection, ConnectionConfig, Exchange, ProcessSpawner, ResponseLines, Spawner};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::handlers::{HaltContext, HandlerMap, halt_handler};
use crate::options::{Placement, SessionOptions};
use crate::recovery;
use crate::session::{Evaluation, Session};

#[cfg(test)]
mod tests;

/// Prefix of generated session aliases.
const ALIAS_PREFIX: &str = "rsession_";

pub(crate) type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

/// Which session a call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
	/// The head of the registry order.
	Default,
	Alias(&'a str),
}

impl<'a> From<&'a str> for Target<'a> {
	fn from(alias: &'a str) -> Self {
		Target::Alias(alias)
	}
}

impl<'a> From<&'a String> for Target<'a> {
	fn from(alias: &'a String) -> Self {
		Target::Alias(alias)
	}
}

impl<'a> From<Option<&'a str>> for Target<'a> {
	fn from(alias: Option<&'a str>) -> Self {
		alias.map_or(Target::Default, Target::Alias)
	}
}

#[derive(Default)]
struct Table {
	order: VecDeque<String>,
	sessions: HashMap<String, SessionHandle>,
}

impl Table {
	fn contains(&self, alias: &str) -> bool {
		self.sessions.contains_key(alias)
	}

	/// Inserts at `index` (clamped). Returns false if the alias is taken.
	fn insert_at(&mut self, index: usize, alias: &str, handle: SessionHandle) -> bool {
		if self.contains(alias) {
			return false;
		}
		let index = index.min(self.order.len());
		self.order.insert(index, alias.to_string());
		self.sessions.insert(alias.to_string(), handle);
		true
	}

	/// Removes `alias`, returning its former position and handle.
	fn remove(&mut self, alias: &str) -> Option<(usize, SessionHandle)> {
		let handle = self.sessions.remove(alias)?;
		let index = self.order.iter().position(|a| a == alias).unwrap_or(self.order.len());
		if index < self.order.len() {
			self.order.remove(index);
		}
		Some((index, handle))
	}

	fn resolve(&self, target: Target<'_>) -> Result<(String, SessionHandle)> {
		let alias = match target {
			Target::Default => self.order.front().ok_or(Error::NoOpenSession)?.as_str(),
			Target::Alias(alias) => alias,
		};
		self.sessions
			.get(alias)
			.map(|handle| (alias.to_string(), Arc::clone(handle)))
			.ok_or_else(|| Error::UnknownSessionAlias { alias: alias.to_string() })
	}

	fn drain(&mut self) -> Vec<(String, SessionHandle)> {
		let order = std::mem::take(&mut self.order);
		order
			.into_iter()
			.filter_map(|alias| self.sessions.remove(&alias).map(|handle| (alias, handle)))
			.collect()
	}
}

/// Registry of open slave sessions.
///
/// Share it behind an `Arc` to use it from several tasks.
pub struct Registry {
	spawner: Arc<dyn Spawner>,
	defaults: RwLock<FunctionDefaults>,
	table: Mutex<Table>,
	pub(crate) handlers: HandlerMap,
	next_alias: AtomicU64,
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}

impl Registry {
	/// Creates a registry that spawns slaves as OS processes.
	pub fn new() -> Self {
		Self::with_spawner(Arc::new(ProcessSpawner))
	}

	/// Creates a registry that spawns slaves through `spawner`.
	pub fn with_spawner(spawner: Arc<dyn Spawner>) -> Self {
		Self {
			spawner,
			defaults: RwLock::new(FunctionDefaults::default()),
			table: Mutex::new(Table::default()),
			handlers: HandlerMap::default(),
			next_alias: AtomicU64::new(0),
		}
	}

	pub fn with_function_defaults(self, defaults: FunctionDefaults) -> Self {
		*self.defaults.write() = defaults;
		self
	}

	/// Replaces the function defaults used when serializing calls.
	pub fn set_function_defaults(&self, defaults: FunctionDefaults) {
		*self.defaults.write() = defaults;
	}

	pub fn function_defaults(&self) -> FunctionDefaults {
		self.defaults.read().clone()
	}

	/// Registers `name=value` as a default argument of `func`.
	pub fn register_default(&self, func: impl Into<String>, name: impl Into<String>, value: Expr) {
		self.defaults.write().register(func, name, value);
	}

	/// Makes a bare `func` symbol render as a call.
	pub fn register_nullary(&self, func: impl Into<String>) {
		self.defaults.write().register_nullary(func);
	}

	/// Registers a halt handler under `name` for `Invoke`/`InvokeGround`
	/// policies. Replaces any handler already registered under that name.
	pub fn register_halt_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
	where
		F: Fn(HaltContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let name = name.into();
		if self.handlers.insert(name.clone(), halt_handler(handler)).is_some() {
			debug!(target = "rsession.session", handler = %name, "replaced halt handler");
		}
	}

	/// Removes a halt handler. Returns false if none was registered.
	pub fn unregister_halt_handler(&self, name: &str) -> bool {
		self.handlers.remove(name).is_some()
	}

	/// Opens a session and returns its alias.
	///
	/// # Errors
	///
	/// `AliasInUse` if the requested alias is taken; `LaunchFailed` if the
	/// slave cannot be spawned or does not complete the handshake.
	pub async fn open(&self, options: SessionOptions) -> Result<String> {
		let alias = match options.alias.clone() {
			Some(alias) => {
				let taken = self.table.lock().contains(&alias);
				if taken {
					return Err(Error::AliasInUse { alias });
				}
				alias
			}
			None => self.generate_alias(),
		};
		let mut options = options;
		options.alias = Some(alias.clone());

		let connection = self.connect(&alias, &options, options.connection_config()).await?;
		let placement = options.placement;
		let pid = connection.pid();
		let handle = Arc::new(tokio::sync::Mutex::new(Session::new(alias.clone(), options, connection)));

		let inserted = {
			let mut table = self.table.lock();
			let index = match placement {
				Placement::Head => 0,
				Placement::Tail => table.order.len(),
			};
			table.insert_at(index, &alias, Arc::clone(&handle))
		};
		if !inserted {
			let connection = handle.lock().await.connection.take();
			if let Some(connection) = connection {
				if let Err(e) = connection.shutdown().await {
					debug!(target = "rsession.session", %alias, error = %e, "shutdown after lost alias race failed");
				}
			}
			return Err(Error::AliasInUse { alias });
		}

		info!(target = "rsession.session", %alias, ?pid, ?placement, "session opened");
		Ok(alias)
	}

	fn generate_alias(&self) -> String {
		loop {
			let n = self.next_alias.fetch_add(1, Ordering::SeqCst) + 1;
			let alias = format!("{ALIAS_PREFIX}{n}");
			if !self.table.lock().contains(&alias) {
				return alias;
			}
		}
	}

	/// Spawns a slave for `options` and completes the handshake.
	pub(crate) async fn connect(
		&self,
		alias: &str,
		options: &SessionOptions,
		config: ConnectionConfig,
	) -> Result<Connection> {
		let process = self
			.spawner
			.spawn(options.program(), options.command_args())
			.await
			.map_err(|e| Error::runtime(alias, e))?;
		Connection::open(process, config)
			.await
			.map_err(|e| Error::runtime(alias, e))
	}

	/// Takes `alias` out of the order, returning its former position.
	pub(crate) fn detach(&self, alias: &str) -> Option<usize> {
		self.table.lock().remove(alias).map(|(index, _)| index)
	}

	/// Puts a recovered session back at `index`.
	pub(crate) fn reattach(&self, index: usize, alias: &str, handle: &SessionHandle) -> Result<()> {
		if self.table.lock().insert_at(index, alias, Arc::clone(handle)) {
			Ok(())
		} else {
			Err(Error::AliasInUse { alias: alias.to_string() })
		}
	}

	/// Closes one session: sends quit, closes its pipes and reaps the slave.
	///
	/// # Errors
	///
	/// `UnknownSessionAlias` if no open session has this alias.
	pub async fn close(&self, alias: &str) -> Result<()> {
		let removed = self.table.lock().remove(alias);
		let Some((_, handle)) = removed else {
			return Err(Error::UnknownSessionAlias { alias: alias.to_string() });
		};
		close_handle(alias, &handle).await
	}

	/// Closes every open session, returning the first error encountered.
	pub async fn close_all(&self) -> Result<()> {
		let sessions = self.table.lock().drain();
		let mut first_error = None;
		for (alias, handle) in sessions {
			if let Err(e) = close_handle(&alias, &handle).await {
				warn!(target = "rsession.session", %alias, error = %e, "close failed");
				first_error.get_or_insert(e);
			}
		}
		first_error.map_or(Ok(()), Err)
	}

	/// Sends `expr` without reading back slot bindings.
	pub async fn push<'a>(&self, target: impl Into<Target<'a>>, expr: &Expr) -> Result<()> {
		let (_, handle) = self.resolve(target.into())?;
		let mut session = handle.lock().await;
		let serialized = {
			let defaults = self.defaults.read();
			session.serialize(expr, &defaults)
		};
		self.exchange(&handle, &mut session, &serialized.text).await?;
		Ok(())
	}

	/// Evaluates `expr` and binds every unbound assignment slot it contains.
	pub async fn evaluate<'a>(&self, target: impl Into<Target<'a>>, expr: &Expr) -> Result<Evaluation> {
		let (alias, handle) = self.resolve(target.into())?;
		let mut session = handle.lock().await;
		let serialized = {
			let defaults = self.defaults.read();
			session.serialize(expr, &defaults)
		};
		debug!(target = "rsession.session", %alias, command = %serialized.text, "evaluate");

		let lines = self.exchange(&handle, &mut session, &serialized.text).await?;
		let mut evaluation = Evaluation::from_lines(lines);

		// A handled halt leaves the session closed; there is nothing to bind from.
		if !session.is_open() {
			return Ok(evaluation);
		}

		for obligation in serialized.obligations {
			let command = format!("print({})", obligation.var);
			let lines = self.exchange(&handle, &mut session, &command).await?;
			let value = parse(&lines.output).map_err(|e| Error::malformed(&alias, e))?;
			evaluation.bindings.push((obligation.slot, value));
		}
		Ok(evaluation)
	}

	/// Evaluates `expr` and returns its output as text.
	pub async fn print<'a>(&self, target: impl Into<Target<'a>>, expr: &Expr) -> Result<String> {
		Ok(self.evaluate(target, expr).await?.text())
	}

	/// Evaluates `expr` and parses its printed output.
	pub async fn query<'a>(&self, target: impl Into<Target<'a>>, expr: &Expr) -> Result<ParsedValue> {
		let target = target.into();
		let evaluation = self.evaluate(target, expr).await?;
		let alias = match target {
			Target::Alias(alias) => alias.to_string(),
			Target::Default => self.default_alias().unwrap_or_default(),
		};
		parse(&evaluation.output).map_err(|e| Error::malformed(&alias, e))
	}

	/// Command history of a session, most recent first.
	pub async fn history<'a>(&self, target: impl Into<Target<'a>>) -> Result<Vec<String>> {
		let (_, handle) = self.resolve(target.into())?;
		let session = handle.lock().await;
		Ok(session.history())
	}

	/// Open aliases in registry order, default first.
	pub fn aliases(&self) -> Vec<String> {
		self.table.lock().order.iter().cloned().collect()
	}

	pub fn default_alias(&self) -> Option<String> {
		self.table.lock().order.front().cloned()
	}

	pub fn is_open(&self, alias: &str) -> bool {
		self.table.lock().contains(alias)
	}

	pub fn len(&self) -> usize {
		self.table.lock().order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn resolve(&self, target: Target<'_>) -> Result<(String, SessionHandle)> {
		self.table.lock().resolve(target)
	}

	/// Runs one command, handing halts to recovery.
	async fn exchange(&self, handle: &SessionHandle, session: &mut Session, command: &str) -> Result<ResponseLines> {
		let alias = session.alias.clone();
		let exchange = session
			.connection()?
			.exchange(command)
			.await
			.map_err(|e| Error::runtime(&alias, e))?;
		match exchange {
			Exchange::Completed(lines) => Ok(lines),
			Exchange::Halted(lines) => recovery::recover(self, handle, session, command, lines).await,
		}
	}
}

async fn close_handle(alias: &str, handle: &SessionHandle) -> Result<()> {
	let connection = handle.lock().await.connection.take();
	if let Some(connection) = connection {
		connection.shutdown().await.map_err(|e| Error::runtime(alias, e))?;
	}
	info!(target = "rsession.session", %alias, "session closed");
	Ok(())
}

impl std::fmt::Debug for Registry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Registry")
			.field("sessions", &self.aliases())
			.field("handlers", &self.handlers)
			.finish_non_exhaustive()
	}
}
