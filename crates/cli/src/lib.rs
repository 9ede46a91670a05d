//! Command-line front end for rsession.
//!
//! Each invocation opens one slave session, runs the requested command or
//! script against it and closes it again.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod styles;
