//! rsession runtime - slave process lifecycle and sentinel-framed I/O
//!
//! This crate provides the low-level runtime for driving an R process over its
//! three standard pipes:
//!
//! - **Driver**: locating the R executable and its default arguments
//! - **Slave**: spawning the process behind the [`Spawner`] contract
//! - **Transport**: byte-oriented line readers with interactive echo suppression
//! - **Connection**: the per-command protocol engine (write, then read error and
//!   output channels up to injected sentinels, detecting halts)
//! - **Transcript**: optional plain-text recording of the conversation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   rsession   │  Registry, serializer glue, recovery
//! └──────┬───────┘
//!        │ Connection::exchange(text)
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │ Conn   │  │  Sentinel framing, halt detection, history
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  Line readers/writer over the pipes
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Slave  │  │  Process management
//! │  └────────┘  │
//! └──────────────┘
//! ```
//!
//! Reads block until a line or end-of-stream arrives. There is no timeout: a
//! slave that never prints the sentinel blocks the call indefinitely.

pub mod connection;
pub mod driver;
pub mod error;
pub mod slave;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transcript;
pub mod transport;

pub use connection::{Channel, Connection, ConnectionConfig, ConnectionParts, Exchange, ResponseLines};
pub use driver::{default_args, find_slave_executable};
pub use error::{Error, Result};
pub use slave::{ProcessSpawner, SlaveProcess, SlaveReader, SlaveWriter, SpawnFuture, Spawner};
pub use transcript::{Record, Transcript, TranscriptMode, TranscriptSpec};
pub use transport::{LineReader, LineWriter};
