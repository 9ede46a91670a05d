//! Structured values recovered from printed slave output.

use serde::{Deserialize, Serialize};

/// A value parsed from console output.
///
/// Tokens are kept in their printed form (`42`, `3.5`, `"text"`, `NA`); deciding
/// between numbers and strings is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedValue {
	Scalar { token: String },
	Vector { tokens: Vec<String> },
	NamedList { entries: Vec<(String, ParsedValue)> },
	Table {
		row_names: Vec<String>,
		col_names: Vec<String>,
		/// Row-major cells, one inner vector per row name.
		cells: Vec<Vec<String>>,
	},
}

impl ParsedValue {
	pub fn scalar(token: impl Into<String>) -> Self {
		ParsedValue::Scalar { token: token.into() }
	}

	pub fn vector<I, S>(tokens: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		ParsedValue::Vector {
			tokens: tokens.into_iter().map(Into::into).collect(),
		}
	}

	/// Builds a vector, collapsing a single token into a scalar.
	pub(crate) fn from_tokens(mut tokens: Vec<String>) -> Self {
		if tokens.len() == 1 {
			ParsedValue::Scalar {
				token: tokens.remove(0),
			}
		} else {
			ParsedValue::Vector { tokens }
		}
	}

	pub fn empty() -> Self {
		ParsedValue::Vector { tokens: Vec::new() }
	}

	/// Flat view of the tokens of a scalar or vector.
	pub fn tokens(&self) -> Option<Vec<&str>> {
		match self {
			ParsedValue::Scalar { token } => Some(vec![token.as_str()]),
			ParsedValue::Vector { tokens } => Some(tokens.iter().map(String::as_str).collect()),
			_ => None,
		}
	}

	/// Looks up a named-list entry.
	pub fn get(&self, name: &str) -> Option<&ParsedValue> {
		match self {
			ParsedValue::NamedList { entries } => entries.iter().find(|(n, _)| n == name).map(|(_, v)| v),
			_ => None,
		}
	}

	/// Looks up a table cell by row and column name.
	pub fn cell(&self, row: &str, col: &str) -> Option<&str> {
		let ParsedValue::Table {
			row_names,
			col_names,
			cells,
		} = self
		else {
			return None;
		};
		let r = row_names.iter().position(|n| n == row)?;
		let c = col_names.iter().position(|n| n == col)?;
		cells.get(r)?.get(c).map(String::as_str)
	}

	/// Strips the surrounding quotes R prints around a string token.
	pub fn unquote(token: &str) -> &str {
		token
			.strip_prefix('"')
			.and_then(|t| t.strip_suffix('"'))
			.unwrap_or(token)
	}
}
