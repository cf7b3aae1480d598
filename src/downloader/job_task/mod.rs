//! Job task execution -- one download's lifecycle around a downloader process.
//!
//! Split into focused submodules:
//! - [`context`] - Shared handles, command line construction, event emission
//! - [`orchestration`] - Resolve, spawn, stream output, handle cancel and timeout
//! - [`finalization`] - Map the outcome to a terminal state

mod context;
mod finalization;
mod orchestration;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub(crate) use context::JobContext;
pub(crate) use finalization::abandoned;
pub(crate) use orchestration::JobController;
