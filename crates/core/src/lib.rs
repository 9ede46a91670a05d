//! rsession: drive long-lived R processes as slave sessions.
//!
//! A [`Registry`] owns any number of sessions, each wrapping one R process
//! spoken to over its stdin, stdout and stderr. Expressions are built as
//! [`Expr`] trees, serialized into R syntax, framed with sentinel commands so
//! the end of each response is known, and parsed back into [`ParsedValue`]s.
//! When a slave dies mid-command the session's [`HaltPolicy`] decides whether
//! to fail, restart, replay history into a fresh slave, or hand over to a
//! registered handler.
//!
//! # Examples
//!
//! ```ignore
//! use rsession::{Expr, Registry, SessionOptions, SlotId};
//!
//! #[tokio::main]
//! async fn main() -> rsession::Result<()> {
//!     let registry = Registry::new();
//!     let alias = registry.open(SessionOptions::new()).await?;
//!
//!     registry.push(&alias, &Expr::assign("x", Expr::list([Expr::Int(1), Expr::Int(2), Expr::Int(3)]))).await?;
//!
//!     // Bind the mean of x back into slot 0.
//!     let eval = registry
//!         .evaluate(&alias, &Expr::assign_slot(SlotId(0), Expr::call("mean", [Expr::sym("x")])))
//!         .await?;
//!     println!("{:?}", eval.binding(SlotId(0)));
//!
//!     registry.close(&alias).await
//! }
//! ```

pub mod error;
pub mod handlers;
pub mod options;
mod recovery;
pub mod registry;
pub mod session;

pub use error::{Error, HaltOutcome, Result};
pub use handlers::{HaltContext, HaltFuture, HaltHandlerFn, halt_handler};
pub use options::{HaltPolicy, Placement, SessionOptions};
pub use registry::{Registry, Target};
pub use rsession_protocol::{Dest, Expr, FunctionDefaults, ParsedValue, SlotId};
pub use rsession_runtime::{
	Channel, ConnectionParts, ProcessSpawner, Record, ResponseLines, Spawner, TranscriptMode, TranscriptSpec,
	find_slave_executable,
};
pub use session::Evaluation;
