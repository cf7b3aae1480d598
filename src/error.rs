//! Error types for bilibili-dl
//!
//! This module provides the error taxonomy for the library:
//! - [`ResolutionError`] - user input could not be mapped to a video URL
//! - [`DownloadError`] - a single job failed, timed out, or was cancelled
//! - [`Error`] - top-level error, including launch and configuration failures
//!
//! Every error exposes a machine-readable code via [`Error::error_code`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for bilibili-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bilibili-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Input could not be resolved to a canonical video URL
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// The external downloader executable is missing or could not be started
    #[error("failed to launch {}: {reason}", program.display())]
    Launch {
        /// Program that could not be started
        program: PathBuf,
        /// Why the launch failed
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job not found in the running batch
    #[error("job not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Reasons a raw input could not be turned into a video URL
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Input was empty or whitespace only
    #[error("input is empty")]
    Empty,

    /// Input contains neither a video URL nor a BV/av identifier
    #[error("unrecognized video reference: {input:?}")]
    Unrecognized {
        /// The trimmed input that failed to resolve
        input: String,
    },
}

/// Per-job download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The downloader exited with a nonzero status
    #[error("downloader exited with {}: {output}", describe_exit(*code))]
    ProcessFailed {
        /// Exit code, `None` when the process was killed by a signal
        code: Option<i32>,
        /// Tail of the combined output, kept for diagnostics
        output: String,
    },

    /// The job ran longer than its allotted time
    #[error("download timed out after {}s", after.as_secs())]
    TimedOut {
        /// Configured timeout that expired
        after: Duration,
    },

    /// The job was cancelled by the caller
    #[error("download cancelled")]
    Cancelled,
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Get the machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Resolution(e) => match e {
                ResolutionError::Empty => "empty_input",
                ResolutionError::Unrecognized { .. } => "unrecognized_input",
            },
            Error::Download(e) => match e {
                DownloadError::ProcessFailed { .. } => "process_failed",
                DownloadError::TimedOut { .. } => "timed_out",
                DownloadError::Cancelled => "cancelled",
            },
            Error::Launch { .. } => "launch_failed",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether this error represents caller intent rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Download(DownloadError::Cancelled))
    }
}
