//! Expression serializer: [`Expr`] trees to R command text.
//!
//! Rendering never fails. Operators without a known infix or prefix form fall
//! back to call syntax so unsupported constructs degrade to best-effort text.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::expr::{Dest, Expr, SlotId};
use crate::sentinel::PLACEHOLDER_PREFIX;

/// Named default argument appended to calls of a registered function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultArg {
	pub name: String,
	pub value: Expr,
}

/// Per-function default arguments and no-argument function registrations.
///
/// Defaults keep registration order; caller arguments always come first and
/// win on name clashes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefaults {
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub defaults: HashMap<String, Vec<DefaultArg>>,
	/// Functions a bare symbol expands into a call for, e.g. `ls` to `ls()`.
	#[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
	pub nullary: BTreeSet<String>,
}

impl FunctionDefaults {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `name=value` as a default argument of `func`.
	///
	/// Re-registering an existing name replaces its value in place.
	pub fn register(&mut self, func: impl Into<String>, name: impl Into<String>, value: Expr) -> &mut Self {
		let name = name.into();
		let entries = self.defaults.entry(func.into()).or_default();
		match entries.iter_mut().find(|d| d.name == name) {
			Some(existing) => existing.value = value,
			None => entries.push(DefaultArg { name, value }),
		}
		self
	}

	/// Marks `func` as callable with no arguments when written as a bare symbol.
	pub fn register_nullary(&mut self, func: impl Into<String>) -> &mut Self {
		self.nullary.insert(func.into());
		self
	}

	pub fn defaults_for(&self, func: &str) -> &[DefaultArg] {
		self.defaults.get(func).map(Vec::as_slice).unwrap_or(&[])
	}

	/// Returns true if a bare `symbol` should render as a call.
	pub fn expands_symbol(&self, symbol: &str) -> bool {
		self.nullary.contains(symbol) || self.defaults.contains_key(symbol)
	}

	/// Merges `other` on top of `self`, later registrations winning.
	pub fn merge(&mut self, other: &FunctionDefaults) {
		for (func, args) in &other.defaults {
			for arg in args {
				self.register(func.clone(), arg.name.clone(), arg.value.clone());
			}
		}
		self.nullary.extend(other.nullary.iter().cloned());
	}
}

/// Deferred binding of a caller slot to a minted slave variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obligation {
	pub slot: SlotId,
	pub var: String,
}

/// Output of [`serialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serialized {
	pub text: String,
	pub obligations: Vec<Obligation>,
	/// Counter value to use for the next command on the same session.
	pub next_counter: u64,
}

/// Renders `expr` as R command text.
///
/// `counter` seeds placeholder names (`pl_Rv_<counter>`); every unbound
/// assignment consumes one value, so names stay unique within the command and
/// across commands that thread `next_counter` back in.
pub fn serialize(expr: &Expr, counter: u64, defaults: &FunctionDefaults) -> Serialized {
	let mut writer = Writer {
		defaults,
		counter,
		obligations: Vec::new(),
	};
	let text = writer.render(expr);
	Serialized {
		text,
		obligations: writer.obligations,
		next_counter: writer.counter,
	}
}

struct Writer<'a> {
	defaults: &'a FunctionDefaults,
	counter: u64,
	obligations: Vec<Obligation>,
}

impl Writer<'_> {
	fn render(&mut self, expr: &Expr) -> String {
		match expr {
			Expr::Int(value) => value.to_string(),
			Expr::Num(value) => render_number(*value),
			Expr::Str(value) => quote(value),
			Expr::Bool(true) => "TRUE".to_string(),
			Expr::Bool(false) => "FALSE".to_string(),
			Expr::Null => "NULL".to_string(),
			Expr::Symbol(name) => {
				if self.defaults.expands_symbol(name) {
					self.render_call(name, &[])
				} else {
					name.clone()
				}
			}
			Expr::List(items) => {
				let parts: Vec<String> = items.iter().map(|item| self.render(item)).collect();
				format!("c({})", parts.join(","))
			}
			Expr::Opt { name, value } => format!("{name}={}", self.render(value)),
			Expr::Call { func, args } => self.render_call(func, args),
			Expr::Op { op, args } => self.render_op(op, args),
			Expr::Assign { dest, value } => {
				let dest = match dest {
					Dest::Symbol(name) => name.clone(),
					Dest::Slot(slot) => self.mint(*slot),
				};
				format!("{dest} <- {}", self.render(value))
			}
			Expr::Seq(items) => {
				let parts: Vec<String> = items.iter().map(|item| self.render(item)).collect();
				parts.join("; ")
			}
			Expr::Raw(text) => text.clone(),
		}
	}

	fn mint(&mut self, slot: SlotId) -> String {
		let var = format!("{PLACEHOLDER_PREFIX}{}", self.counter);
		self.counter += 1;
		self.obligations.push(Obligation {
			slot,
			var: var.clone(),
		});
		var
	}

	fn render_call(&mut self, func: &str, args: &[Expr]) -> String {
		let named: HashSet<&str> = args
			.iter()
			.filter_map(|arg| match arg {
				Expr::Opt { name, .. } => Some(name.as_str()),
				_ => None,
			})
			.collect();

		let mut parts: Vec<String> = args.iter().map(|arg| self.render(arg)).collect();
		let defaults = self.defaults;
		for default in defaults.defaults_for(func) {
			if !named.contains(default.name.as_str()) {
				parts.push(format!("{}={}", default.name, self.render(&default.value)));
			}
		}
		format!("{func}({})", parts.join(","))
	}

	fn render_op(&mut self, op: &str, args: &[Expr]) -> String {
		match args {
			[lhs, rhs] if binary_precedence(op).is_some() => {
				let lhs = self.render_operand(op, lhs, Side::Left);
				let rhs = self.render_operand(op, rhs, Side::Right);
				format!("{lhs}{op}{rhs}")
			}
			[arg] if is_prefix(op) => {
				let arg = self.render_operand(op, arg, Side::Right);
				format!("{op}{arg}")
			}
			_ => {
				let parts: Vec<String> = args.iter().map(|arg| self.render(arg)).collect();
				format!("{op}({})", parts.join(","))
			}
		}
	}

	/// Renders an operand, parenthesizing a nested binary operator that would
	/// otherwise bind differently once flattened.
	fn render_operand(&mut self, parent: &str, operand: &Expr, side: Side) -> String {
		let text = self.render(operand);
		let Expr::Op { op: child, args } = operand else {
			return text;
		};
		let (Some(parent_prec), Some(child_prec), 2) = (binary_precedence(parent), binary_precedence(child), args.len())
		else {
			return text;
		};
		let right_assoc = parent == "^";
		let needs_parens = child_prec < parent_prec
			|| (child_prec == parent_prec && matches!((side, right_assoc), (Side::Right, false) | (Side::Left, true)));
		if needs_parens { format!("({text})") } else { text }
	}
}

#[derive(Clone, Copy)]
enum Side {
	Left,
	Right,
}

/// Binding strength of the binary operators R writes infix.
fn binary_precedence(op: &str) -> Option<u8> {
	let prec = match op {
		"$" | "@" => 10,
		"^" => 9,
		":" => 7,
		"*" | "/" => 5,
		"+" | "-" => 4,
		"==" | "!=" | "<" | ">" | "<=" | ">=" => 3,
		"&" | "&&" => 2,
		"|" | "||" => 1,
		"~" => 0,
		_ if op.len() >= 2 && op.starts_with('%') && op.ends_with('%') => 6,
		_ => return None,
	};
	Some(prec)
}

fn is_prefix(op: &str) -> bool {
	matches!(op, "-" | "+" | "!" | "~")
}

fn render_number(value: f64) -> String {
	if value.is_nan() {
		"NaN".to_string()
	} else if value.is_infinite() {
		if value > 0.0 { "Inf" } else { "-Inf" }.to_string()
	} else {
		value.to_string()
	}
}

/// Quotes `value` as an R string literal.
pub fn quote(value: &str) -> String {
	let mut out = String::with_capacity(value.len() + 2);
	out.push('"');
	for ch in value.chars() {
		match ch {
			'\\' => out.push_str("\\\\"),
			'"' => out.push_str("\\\""),
			'\n' => out.push_str("\\n"),
			'\r' => out.push_str("\\r"),
			'\t' => out.push_str("\\t"),
			other => out.push(other),
		}
	}
	out.push('"');
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn render(expr: &Expr) -> String {
		serialize(expr, 1, &FunctionDefaults::default()).text
	}

	#[test]
	fn literals_render_in_r_syntax() {
		assert_eq!(render(&Expr::Int(42)), "42");
		assert_eq!(render(&Expr::Num(2.5)), "2.5");
		assert_eq!(render(&Expr::Num(f64::INFINITY)), "Inf");
		assert_eq!(render(&Expr::Num(f64::NEG_INFINITY)), "-Inf");
		assert_eq!(render(&Expr::Num(f64::NAN)), "NaN");
		assert_eq!(render(&Expr::Bool(true)), "TRUE");
		assert_eq!(render(&Expr::Null), "NULL");
		assert_eq!(render(&Expr::str("a \"b\"\n")), r#""a \"b\"\n""#);
		assert_eq!(render(&Expr::sym("x")), "x");
	}

	#[test]
	fn lists_render_as_combine_calls() {
		assert_eq!(render(&Expr::list([Expr::Int(1), Expr::str("a"), Expr::sym("b")])), r#"c(1,"a",b)"#);
		assert_eq!(render(&Expr::list([])), "c()");
	}

	#[test]
	fn assignment_and_sequence() {
		let expr = Expr::seq([
			Expr::assign("x", Expr::Int(1)),
			Expr::call("print", [Expr::sym("x")]),
		]);
		assert_eq!(render(&expr), "x <- 1; print(x)");
	}

	#[test]
	fn unbound_assignments_mint_distinct_names() {
		let expr = Expr::seq((0..4).map(|i| Expr::assign_slot(SlotId(i), Expr::Int(i as i64))));
		let out = serialize(&expr, 7, &FunctionDefaults::default());

		assert_eq!(out.obligations.len(), 4);
		assert_eq!(out.next_counter, 11);
		let names: HashSet<&str> = out.obligations.iter().map(|o| o.var.as_str()).collect();
		assert_eq!(names.len(), 4);
		for (i, obligation) in out.obligations.iter().enumerate() {
			assert_eq!(obligation.slot, SlotId(i as u32));
			assert!(out.text.contains(&format!("{} <- {i}", obligation.var)));
		}
		assert_eq!(out.obligations[0].var, "pl_Rv_7");
	}

	#[test]
	fn caller_arguments_win_over_defaults() {
		let mut defaults = FunctionDefaults::new();
		defaults.register("f", "a", Expr::Int(9)).register("f", "b", Expr::Int(2));

		let expr = Expr::call("f", [Expr::opt("a", Expr::Int(1))]);
		assert_eq!(serialize(&expr, 1, &defaults).text, "f(a=1,b=2)");
	}

	#[test]
	fn defaults_follow_positional_arguments() {
		let mut defaults = FunctionDefaults::new();
		defaults.register("plot", "type", Expr::str("l"));

		let expr = Expr::call("plot", [Expr::sym("x"), Expr::sym("y")]);
		assert_eq!(serialize(&expr, 1, &defaults).text, r#"plot(x,y,type="l")"#);
	}

	#[test]
	fn registered_symbols_expand_to_calls() {
		let mut defaults = FunctionDefaults::new();
		defaults.register_nullary("ls");
		defaults.register("dev.off", "which", Expr::Int(2));

		assert_eq!(serialize(&Expr::sym("ls"), 1, &defaults).text, "ls()");
		assert_eq!(serialize(&Expr::sym("dev.off"), 1, &defaults).text, "dev.off(which=2)");
		assert_eq!(serialize(&Expr::sym("x"), 1, &defaults).text, "x");
	}

	#[test]
	fn infix_operators_render_inline() {
		assert_eq!(render(&Expr::binary("+", Expr::sym("a"), Expr::Int(1))), "a+1");
		assert_eq!(render(&Expr::binary("%in%", Expr::sym("x"), Expr::sym("y"))), "x%in%y");
		assert_eq!(render(&Expr::binary("$", Expr::sym("df"), Expr::sym("col"))), "df$col");
		assert_eq!(render(&Expr::unary("-", Expr::sym("x"))), "-x");
	}

	#[test]
	fn nested_infix_keeps_grouping() {
		let sum = Expr::binary("+", Expr::sym("a"), Expr::sym("b"));
		assert_eq!(render(&Expr::binary("*", sum.clone(), Expr::sym("c"))), "(a+b)*c");
		assert_eq!(render(&Expr::binary("+", sum.clone(), Expr::sym("c"))), "a+b+c");
		assert_eq!(render(&Expr::binary("-", Expr::sym("c"), sum)), "c-(a+b)");
	}

	#[test]
	fn unknown_operator_passes_through() {
		let expr = Expr::Op {
			op: "weird".to_string(),
			args: vec![Expr::Int(1), Expr::Int(2), Expr::Int(3)],
		};
		assert_eq!(render(&expr), "weird(1,2,3)");
	}

	#[test]
	fn merge_overrides_existing_defaults() {
		let mut base = FunctionDefaults::new();
		base.register("f", "a", Expr::Int(1)).register("f", "b", Expr::Int(2));
		let mut overlay = FunctionDefaults::new();
		overlay.register("f", "a", Expr::Int(5)).register_nullary("g");

		base.merge(&overlay);
		assert_eq!(serialize(&Expr::call("f", []), 1, &base).text, "f(a=5,b=2)");
		assert!(base.expands_symbol("g"));
	}
}
