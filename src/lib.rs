//! # bilibili-dl
//!
//! Concurrent batch video downloader for bilibili that drives an external
//! `you-get` compatible command-line downloader.
//!
//! ## Design Philosophy
//!
//! bilibili-dl is designed to be:
//! - **Batch-first** - Many inputs, bounded concurrency, one aggregate result
//! - **Failure-isolated** - One bad link never stops the rest of a batch
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Tool-agnostic** - The downloader is an opaque child process behind a trait
//!
//! Inputs may be video page URLs, bare `BV`/`av` ids, or free text containing
//! one. Each job's two-part (video then audio) transfer output is folded into a
//! single 0-100 progress value.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bilibili_dl::{BatchDownloader, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.output_dir = "videos".into();
//!     config.download.max_concurrent_downloads = 2;
//!
//!     let downloader = BatchDownloader::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let result = downloader
//!         .run_inputs(["BV1xx411c7mD", "check out av170001"])
//!         .await?;
//!     println!("{} succeeded, {} failed", result.succeeded, result.failed);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Callback-style event observers
pub mod observer;
/// External downloader process handling
pub mod process;
/// Progress extraction from downloader output
pub mod progress;
/// Input to canonical URL resolution
pub mod resolver;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, DownloaderOptions, ToolsConfig};
pub use downloader::BatchDownloader;
pub use error::{DownloadError, Error, ResolutionError, Result};
pub use observer::{BatchObserver, forward_events};
pub use process::{CliProcessRunner, Invocation, LineStream, ProcessRunner};
pub use progress::{ProgressParser, ProgressUpdate};
pub use resolver::resolve;
pub use types::{BatchResult, DownloadRequest, Event, JobId, JobState, JobStatus, Phase};

/// Signal that ended a batch through [`run_with_shutdown`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT, or Ctrl+C where POSIX signals are unavailable
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Cancel running batches when the process is asked to stop.
///
/// Waits for a termination signal, calls the downloader's `cancel_batch()`,
/// and returns the signal that fired. Running jobs are killed, pending ones
/// never start, and every in-flight `run_batch` call returns with those jobs
/// marked Cancelled.
///
/// - **Unix:** SIGTERM and SIGINT. If neither handler can be registered it
///   falls back to `tokio::signal::ctrl_c()`.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// If no signal can be observed at all, the future never completes.
///
/// # Example
///
/// ```no_run
/// use bilibili_dl::{BatchDownloader, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = BatchDownloader::new(Config::default())?;
///
///     let shutdown = tokio::spawn(run_with_shutdown(downloader.clone()));
///
///     let result = downloader.run_inputs(["BV1xx411c7mD"]).await?;
///     if shutdown.is_finished() {
///         println!("stopped by {}", shutdown.await?);
///     }
///     println!("cancelled: {}", result.cancelled);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: BatchDownloader) -> ShutdownSignal {
    let signal = wait_for_signal().await;
    tracing::info!(%signal, "Shutdown signal received, cancelling batch");
    downloader.cancel_batch();
    signal
}

#[cfg(unix)]
async fn wait_for_signal() -> ShutdownSignal {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    // Registration fails in some sandboxes; listen on whatever is available
    let register = |kind: SignalKind, name: &'static str| -> Option<Signal> {
        signal(kind)
            .inspect_err(|e| tracing::warn!(error = %e, signal = name, "Could not register signal handler"))
            .ok()
    };

    match (
        register(SignalKind::interrupt(), "SIGINT"),
        register(SignalKind::terminate(), "SIGTERM"),
    ) {
        (Some(mut interrupt), Some(mut terminate)) => tokio::select! {
            _ = interrupt.recv() => ShutdownSignal::Interrupt,
            _ = terminate.recv() => ShutdownSignal::Terminate,
        },
        (Some(mut interrupt), None) => {
            interrupt.recv().await;
            ShutdownSignal::Interrupt
        }
        (None, Some(mut terminate)) => {
            terminate.recv().await;
            ShutdownSignal::Terminate
        }
        (None, None) => ctrl_c().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> ShutdownSignal {
    ctrl_c().await
}

async fn ctrl_c() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "No shutdown signal can be observed, batches run to completion");
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Interrupt
}
