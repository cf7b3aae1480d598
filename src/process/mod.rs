//! External downloader process handling
//!
//! The downloader is an opaque child process: it gets a command line, writes
//! progress text to stdout/stderr, and exits. This module hides how that
//! process is started behind the [`ProcessRunner`] trait.
//!
//! - [`CliProcessRunner`]: spawns the real executable with `tokio::process`
//! - [`ScriptedProcessRunner`]: replays canned output for tests and dry runs

mod cli;
mod scripted;
mod traits;

pub use cli::{CliProcessRunner, discover_executable};
pub use scripted::{Script, ScriptOutcome, ScriptedProcessRunner};
pub use traits::{Invocation, LineStream, ProcessHandle, ProcessRunner};
