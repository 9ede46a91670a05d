//! Wire-level types for talking to an R slave process.
//!
//! This crate contains the two pure translation layers that sit on either side
//! of the pipe:
//!
//! - **Serializer**: [`Expr`] trees rendered into R command text, including
//!   placeholder variables for results the caller wants bound back
//! - **Parser**: console-formatted output lines turned into [`ParsedValue`]
//!
//! It also owns the fixed literals (sentinels, halt line) that both ends of the
//! protocol must agree on character for character.
//!
//! Nothing here performs I/O. The process and framing layer lives in
//! `rsession-runtime`.

pub mod error;
pub mod expr;
pub mod parse;
pub mod sentinel;
pub mod serialize;
pub mod value;

pub use error::{Error, Result};
pub use expr::{Dest, Expr, SlotId};
pub use parse::parse;
pub use serialize::{DefaultArg, FunctionDefaults, Obligation, Serialized, serialize};
pub use value::ParsedValue;
