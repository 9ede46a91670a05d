//! Halt handler infrastructure.
//!
//! Sessions opened with [`HaltPolicy::Invoke`] or [`HaltPolicy::InvokeGround`]
//! hand a halted slave to a named handler registered on the
//! [`Registry`](crate::Registry). Handlers are stored by name so the policy
//! itself stays plain, serializable configuration.
//!
//! [`HaltPolicy::Invoke`]: crate::HaltPolicy::Invoke
//! [`HaltPolicy::InvokeGround`]: crate::HaltPolicy::InvokeGround

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use rsession_runtime::{ConnectionParts, ResponseLines};

use crate::error::Result;
use crate::options::SessionOptions;

/// Everything a handler learns about a halt.
#[derive(Debug)]
pub struct HaltContext {
	pub alias: String,
	/// Command text whose evaluation halted.
	pub command: String,
	/// Lines captured before the halt.
	pub response: ResponseLines,
	/// History at the time of the halt, most recent first.
	pub history: Vec<String>,
	/// Options the session was opened with.
	pub options: SessionOptions,
	/// The dead slave's streams; `None` under `InvokeGround`.
	pub streams: Option<ConnectionParts>,
}

/// Boxed async handler future.
pub type HaltFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Handler function: [`HaltContext`] → async `Result<()>`.
///
/// `Ok` makes the halted call succeed with the captured response; `Err` is
/// returned to the caller as is.
pub type HaltHandlerFn = Arc<dyn Fn(HaltContext) -> HaltFuture + Send + Sync>;

/// Wraps an async closure as a [`HaltHandlerFn`].
pub fn halt_handler<F, Fut>(handler: F) -> HaltHandlerFn
where
	F: Fn(HaltContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	Arc::new(move |ctx| Box::pin(handler(ctx)))
}

/// Handler storage keyed by name.
#[derive(Default)]
pub(crate) struct HandlerMap {
	handlers: DashMap<String, HaltHandlerFn>,
}

impl HandlerMap {
	/// Registers `handler` under `name`, returning the handler it replaced.
	pub(crate) fn insert(&self, name: String, handler: HaltHandlerFn) -> Option<HaltHandlerFn> {
		self.handlers.insert(name, handler)
	}

	pub(crate) fn remove(&self, name: &str) -> Option<HaltHandlerFn> {
		self.handlers.remove(name).map(|(_, handler)| handler)
	}

	/// Clones the handler out so no map guard is held across its await.
	pub(crate) fn get(&self, name: &str) -> Option<HaltHandlerFn> {
		self.handlers.get(name).map(|entry| Arc::clone(entry.value()))
	}

	pub(crate) fn contains(&self, name: &str) -> bool {
		self.handlers.contains_key(name)
	}
}

impl std::fmt::Debug for HandlerMap {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_set().entries(self.handlers.iter().map(|e| e.key().clone())).finish()
	}
}
