//! Response parser: printed R output to [`ParsedValue`].
//!
//! The parser tries an ordered list of matchers against the left-trimmed first
//! line. Each matcher either declines (returns `None`) without touching
//! anything, or commits and returns a value or a [`MalformedResponse`] error.
//!
//! [`MalformedResponse`]: crate::Error::MalformedResponse

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::value::ParsedValue;


/// `[12]` index prefix of a vector line.
static INDEX_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[\d+\]").unwrap());

/// One tag of a list marker: `[[name]]`, `$name` or `` $`name` ``.
static LIST_TAG: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^(?:\[\[([^\]]+)\]\]|\$`([^`]*)`|\$([^\s$\[`]+))").unwrap());

/// Prints R uses for zero-length values.
const EMPTY_PRINTS: &[&str] = &[
	"NULL",
	"character(0)",
	"numeric(0)",
	"integer(0)",
	"logical(0)",
	"complex(0)",
	"list()",
	"named list()",
];

type Matcher = fn(&[&str]) -> Option<Result<ParsedValue>>;

/// Matchers in priority order.
const MATCHERS: &[Matcher] = &[match_empty, match_named_list, match_vector, match_table];

/// Parses the output lines of one printed expression.
pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<ParsedValue> {
	let lines: Vec<&str> = lines.iter().map(|l| l.as_ref().trim_end()).collect();
	parse_lines(&lines)
}

fn parse_lines(lines: &[&str]) -> Result<ParsedValue> {
	let lines = trim_blank_edges(lines);
	for matcher in MATCHERS {
		if let Some(result) = matcher(lines) {
			return result;
		}
	}
	Err(Error::malformed(format!("unrecognized output starting with {:?}", lines.first())))
}

fn trim_blank_edges<'a, 'b>(lines: &'b [&'a str]) -> &'b [&'a str] {
	let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
	let end = lines.iter().rposition(|l| !l.trim().is_empty()).map_or(start, |i| i + 1);
	&lines[start..end]
}

fn match_empty(lines: &[&str]) -> Option<Result<ParsedValue>> {
	match lines {
		[] => Some(Ok(ParsedValue::empty())),
		[only] if EMPTY_PRINTS.contains(&only.trim()) => Some(Ok(ParsedValue::empty())),
		_ => None,
	}
}

/// Splits a marker line into its tags, or `None` if the line is not a marker.
fn list_marker(line: &str) -> Option<Vec<String>> {
	let mut rest = line.trim();
	let mut tags = Vec::new();
	while !rest.is_empty() {
		let caps = LIST_TAG.captures(rest)?;
		let name = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
		tags.push(name.as_str().to_string());
		rest = &rest[caps.get(0)?.end()..];
	}
	if tags.is_empty() { None } else { Some(tags) }
}

fn render_marker(tags: &[String]) -> String {
	tags.iter().map(|t| format!("[[{t}]]")).collect()
}

fn match_named_list(lines: &[&str]) -> Option<Result<ParsedValue>> {
	let first = list_marker(lines[0])?;
	Some(parse_named_list(first, &lines[1..]))
}

/// Parses list entries. An entry starts at a single-tag marker and runs until
/// the next one; deeper markers belong to the current entry and lose their
/// leading tag before the body is parsed recursively.
fn parse_named_list(first: Vec<String>, rest: &[&str]) -> Result<ParsedValue> {
	let mut entries = Vec::new();
	let mut name = first[0].clone();
	let mut body: Vec<String> = Vec::new();
	if first.len() > 1 {
		body.push(render_marker(&first[1..]));
	}

	for line in rest {
		match list_marker(line) {
			Some(tags) if tags.len() == 1 => {
				entries.push(finish_entry(&name, &body)?);
				name = tags[0].clone();
				body.clear();
			}
			Some(tags) if tags[0] == name => body.push(render_marker(&tags[1..])),
			Some(tags) => {
				return Err(Error::malformed(format!(
					"nested marker {:?} does not belong to list entry {name:?}",
					render_marker(&tags)
				)));
			}
			None => body.push((*line).to_string()),
		}
	}
	entries.push(finish_entry(&name, &body)?);

	Ok(ParsedValue::NamedList { entries })
}

fn finish_entry(name: &str, body: &[String]) -> Result<(String, ParsedValue)> {
	let lines: Vec<&str> = body.iter().map(String::as_str).collect();
	if trim_blank_edges(&lines).is_empty() {
		return Err(Error::malformed(format!("list entry {name:?} has no content")));
	}
	Ok((name.to_string(), parse_lines(&lines)?))
}

fn match_vector(lines: &[&str]) -> Option<Result<ParsedValue>> {
	if !INDEX_PREFIX.is_match(lines[0].trim_start()) {
		return None;
	}

	let mut tokens = Vec::new();
	for (i, line) in lines.iter().enumerate() {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		// Factors print their level set after the values.
		if i > 0 && line.starts_with("Levels:") {
			continue;
		}
		let stripped = INDEX_PREFIX.find(line).map_or(line, |m| &line[m.end()..]);
		tokens.extend(split_tokens(stripped));
	}
	Some(Ok(ParsedValue::from_tokens(tokens)))
}

fn match_table(lines: &[&str]) -> Option<Result<ParsedValue>> {
	Some(parse_table(lines))
}

struct Block {
	col_names: Vec<String>,
	row_names: Vec<String>,
	cells: Vec<Vec<String>>,
}

fn parse_table(lines: &[&str]) -> Result<ParsedValue> {
	let mut blocks: Vec<Block> = Vec::new();
	let mut idx = 0;

	while idx < lines.len() {
		let line = lines[idx];
		if line.trim().is_empty() {
			break;
		}
		// A header opens every block; later blocks continue the columns.
		let mut block = Block {
			col_names: split_tokens(line).into_iter().map(normalize_index).collect(),
			row_names: Vec::new(),
			cells: Vec::new(),
		};
		idx += 1;

		// Column where the row labels end. Labels are right-justified
		// (` [9,]`, `[10,]`) or left-justified (`9 `, `10`) within one column,
		// and a continuation header is padded past it.
		let mut label_end = 0;
		while idx < lines.len() {
			let row = lines[idx];
			if row.trim().is_empty() || (!block.row_names.is_empty() && leading_width(row) > label_end) {
				break;
			}
			let mut tokens = split_tokens(row).into_iter();
			let Some(row_name) = tokens.next() else {
				break;
			};
			let cells: Vec<String> = tokens.collect();
			if cells.len() != block.col_names.len() {
				return Err(Error::malformed(format!(
					"row {row_name:?} has {} cells but the header has {} columns",
					cells.len(),
					block.col_names.len()
				)));
			}
			label_end = label_end.max(leading_width(row) + row_name.chars().count());
			block.row_names.push(normalize_index(row_name));
			block.cells.push(cells);
			idx += 1;
		}
		blocks.push(block);
	}

	if lines[idx..].iter().any(|l| !l.trim().is_empty()) {
		return Err(Error::malformed("unexpected content after table"));
	}

	let mut blocks = blocks.into_iter();
	let Some(mut table) = blocks.next() else {
		return Err(Error::malformed("table without header"));
	};
	for block in blocks {
		if block.row_names != table.row_names {
			return Err(Error::malformed(format!(
				"continuation block rows {:?} do not match {:?}",
				block.row_names, table.row_names
			)));
		}
		table.col_names.extend(block.col_names);
		for (row, more) in table.cells.iter_mut().zip(block.cells) {
			row.extend(more);
		}
	}

	Ok(ParsedValue::Table {
		row_names: table.row_names,
		col_names: table.col_names,
		cells: table.cells,
	})
}

fn leading_width(line: &str) -> usize {
	line.chars().take_while(|c| c.is_whitespace()).count()
}

/// `[,3]` and `[3,]` become `3`; any other token is kept as-is.
fn normalize_index(token: String) -> String {
	let inner = token
		.strip_prefix("[,")
		.and_then(|t| t.strip_suffix(']'))
		.or_else(|| token.strip_prefix('[').and_then(|t| t.strip_suffix(",]")));
	if let Some(n) = inner.filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())) {
		return n.to_string();
	}
	token
}

/// Splits on whitespace, keeping double-quoted strings (with escapes) intact.
pub(crate) fn split_tokens(line: &str) -> Vec<String> {
	let mut tokens = Vec::new();
	let mut chars = line.chars().peekable();

	while let Some(&ch) = chars.peek() {
		if ch.is_whitespace() {
			chars.next();
			continue;
		}
		let mut token = String::new();
		if ch == '"' {
			token.push(ch);
			chars.next();
			while let Some(c) = chars.next() {
				token.push(c);
				match c {
					'\\' => {
						if let Some(escaped) = chars.next() {
							token.push(escaped);
						}
					}
					'"' => break,
					_ => {}
				}
			}
		} else {
			while let Some(&c) = chars.peek() {
				if c.is_whitespace() {
					break;
				}
				token.push(c);
				chars.next();
			}
		}
		tokens.push(token);
	}
	tokens
}
