//! Structured R expressions.
//!
//! [`Expr`] has one constructor per node kind the serializer knows how to
//! render. Callers build trees with the helper constructors and hand them to
//! [`serialize`](crate::serialize::serialize).

use serde::{Deserialize, Serialize};

/// Caller-side result slot for an assignment whose destination is unbound.
///
/// After the command completes the value of the minted slave variable is parsed
/// and bound to this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "_{}", self.0)
	}
}

/// Destination of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dest {
	/// Slave-side variable written verbatim.
	Symbol(String),
	/// Unbound caller slot; the serializer mints a slave variable for it.
	Slot(SlotId),
}

/// An R expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
	Int(i64),
	Num(f64),
	/// String literal, always quoted on output.
	Str(String),
	Bool(bool),
	Null,
	/// Bare symbol, written verbatim unless registered as a no-argument function.
	Symbol(String),
	/// Ordered elements rendered as a combine call, `c(...)`.
	List(Vec<Expr>),
	/// `name=value` pair; inside a call argument list this is a named argument.
	Opt { name: String, value: Box<Expr> },
	Call { func: String, args: Vec<Expr> },
	/// Operator application. Known infix/prefix operators render inline, anything
	/// else falls back to call syntax.
	Op { op: String, args: Vec<Expr> },
	Assign { dest: Dest, value: Box<Expr> },
	/// Statements evaluated as one line, joined with `; `.
	Seq(Vec<Expr>),
	/// Literal command text passed through untouched.
	Raw(String),
}

impl Expr {
	pub fn sym(name: impl Into<String>) -> Self {
		Expr::Symbol(name.into())
	}

	pub fn str(value: impl Into<String>) -> Self {
		Expr::Str(value.into())
	}

	pub fn raw(text: impl Into<String>) -> Self {
		Expr::Raw(text.into())
	}

	pub fn list(items: impl IntoIterator<Item = Expr>) -> Self {
		Expr::List(items.into_iter().collect())
	}

	pub fn opt(name: impl Into<String>, value: Expr) -> Self {
		Expr::Opt {
			name: name.into(),
			value: Box::new(value),
		}
	}

	pub fn call(func: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Self {
		Expr::Call {
			func: func.into(),
			args: args.into_iter().collect(),
		}
	}

	/// Binary operator application, `lhs op rhs`.
	pub fn binary(op: impl Into<String>, lhs: Expr, rhs: Expr) -> Self {
		Expr::Op {
			op: op.into(),
			args: vec![lhs, rhs],
		}
	}

	/// Prefix operator application, `op arg`.
	pub fn unary(op: impl Into<String>, arg: Expr) -> Self {
		Expr::Op {
			op: op.into(),
			args: vec![arg],
		}
	}

	/// Assignment into a named slave variable.
	pub fn assign(dest: impl Into<String>, value: Expr) -> Self {
		Expr::Assign {
			dest: Dest::Symbol(dest.into()),
			value: Box::new(value),
		}
	}

	/// Assignment whose result is fetched back into `slot` after evaluation.
	pub fn assign_slot(slot: SlotId, value: Expr) -> Self {
		Expr::Assign {
			dest: Dest::Slot(slot),
			value: Box::new(value),
		}
	}

	pub fn seq(items: impl IntoIterator<Item = Expr>) -> Self {
		Expr::Seq(items.into_iter().collect())
	}

	/// Returns true if any assignment in the tree targets an unbound slot.
	pub fn has_slots(&self) -> bool {
		match self {
			Expr::Assign { dest: Dest::Slot(_), .. } => true,
			Expr::Assign { value, .. } | Expr::Opt { value, .. } => value.has_slots(),
			Expr::List(items) | Expr::Seq(items) => items.iter().any(Expr::has_slots),
			Expr::Call { args, .. } | Expr::Op { args, .. } => args.iter().any(Expr::has_slots),
			_ => false,
		}
	}
}

impl From<i64> for Expr {
	fn from(value: i64) -> Self {
		Expr::Int(value)
	}
}

impl From<f64> for Expr {
	fn from(value: f64) -> Self {
		Expr::Num(value)
	}
}

impl From<bool> for Expr {
	fn from(value: bool) -> Self {
		Expr::Bool(value)
	}
}
