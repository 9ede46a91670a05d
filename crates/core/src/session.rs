//! Per-session state.

use rsession_protocol::{FunctionDefaults, ParsedValue, Serialized, SlotId, serialize};
use rsession_runtime::{Connection, ResponseLines};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::options::SessionOptions;

/// Result of evaluating an expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evaluation {
	pub output: Vec<String>,
	pub errors: Vec<String>,
	/// Values bound to the expression's unbound assignment slots, in the order
	/// the slots appear.
	pub bindings: Vec<(SlotId, ParsedValue)>,
}

impl Evaluation {
	pub(crate) fn from_lines(lines: ResponseLines) -> Self {
		Self {
			output: lines.output,
			errors: lines.errors,
			bindings: Vec::new(),
		}
	}

	/// Value bound to `slot`, if it was part of the expression.
	pub fn binding(&self, slot: SlotId) -> Option<&ParsedValue> {
		self.bindings.iter().find(|(s, _)| *s == slot).map(|(_, v)| v)
	}

	/// Output lines joined with newlines.
	pub fn text(&self) -> String {
		self.output.join("\n")
	}
}

/// An open session. Lives behind a per-session async mutex; everything here
/// assumes exclusive access.
pub(crate) struct Session {
	pub(crate) alias: String,
	/// Exact options used to open the session, alias included.
	pub(crate) options: SessionOptions,
	/// `None` once the session is closed or its slave halted for good.
	pub(crate) connection: Option<Connection>,
	/// Next placeholder counter value.
	counter: u64,
}

impl Session {
	pub(crate) fn new(alias: String, options: SessionOptions, connection: Connection) -> Self {
		Self {
			alias,
			options,
			connection: Some(connection),
			counter: 0,
		}
	}

	/// Serializes `expr`, advancing the placeholder counter.
	pub(crate) fn serialize(&mut self, expr: &rsession_protocol::Expr, defaults: &FunctionDefaults) -> Serialized {
		let serialized = serialize(expr, self.counter, defaults);
		self.counter = serialized.next_counter;
		serialized
	}

	pub(crate) fn connection(&mut self) -> Result<&mut Connection> {
		self.connection.as_mut().ok_or_else(|| Error::UnknownSessionAlias {
			alias: self.alias.clone(),
		})
	}

	pub(crate) fn is_open(&self) -> bool {
		self.connection.is_some()
	}

	/// History most recent first; empty once closed.
	pub(crate) fn history(&self) -> Vec<String> {
		self.connection
			.as_ref()
			.map(|c| c.history().iter().cloned().collect())
			.unwrap_or_default()
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("alias", &self.alias)
			.field("connection", &self.connection)
			.field("counter", &self.counter)
			.finish()
	}
}
