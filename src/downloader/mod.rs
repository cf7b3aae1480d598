//! Batch downloader implementation split into focused submodules.
//!
//! The `BatchDownloader` struct and its methods are organized by domain:
//! - [`batch`] - Batch submission, admission scheduling and result aggregation
//! - [`control`] - Cancelling whole batches or single jobs
//! - [`job_task`] - One job's lifecycle around a downloader process

mod batch;
mod control;
mod job_task;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::error::Result;
use crate::process::{CliProcessRunner, ProcessRunner, discover_executable};
use crate::types::{DownloadRequest, JobId};
use std::path::PathBuf;

/// Admission and cancellation state shared by every batch on one downloader
#[derive(Clone)]
pub(crate) struct BatchState {
    /// Semaphore to limit concurrent jobs (respects max_concurrent_downloads config)
    pub(crate) concurrent_limit: std::sync::Arc<tokio::sync::Semaphore>,
    /// Cancellation tokens of every job in a batch that has not returned yet
    pub(crate) active_jobs: std::sync::Arc<
        tokio::sync::Mutex<std::collections::HashMap<JobId, tokio_util::sync::CancellationToken>>,
    >,
    /// Parent of every batch token; replaced after each `cancel_batch()`
    pub(crate) root_token: std::sync::Arc<std::sync::Mutex<tokio_util::sync::CancellationToken>>,
    /// Next job ID to hand out
    pub(crate) next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl BatchState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            concurrent_limit: std::sync::Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
            active_jobs: std::sync::Arc::new(tokio::sync::Mutex::new(
                std::collections::HashMap::new(),
            )),
            root_token: std::sync::Arc::new(std::sync::Mutex::new(
                tokio_util::sync::CancellationToken::new(),
            )),
            next_id: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1)),
        }
    }

    /// Allocate the next job ID
    pub(crate) fn allocate_id(&self) -> JobId {
        JobId(
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        )
    }

    /// Whether `id` was handed out by [`allocate_id`](Self::allocate_id)
    pub(crate) fn was_issued(&self, id: JobId) -> bool {
        id.0 >= 1 && id.0 < self.next_id.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Token for a new batch, cancelled by the next `cancel_batch()`
    pub(crate) fn batch_token(&self) -> tokio_util::sync::CancellationToken {
        match self.root_token.lock() {
            Ok(root) => root.child_token(),
            Err(poisoned) => poisoned.into_inner().child_token(),
        }
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
///
/// Owns the [`Config`] context, the process runner and the resolved downloader
/// executable. Every job of every batch run through it shares one concurrency
/// limit.
#[derive(Clone)]
pub struct BatchDownloader {
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<crate::types::Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: std::sync::Arc<Config>,
    /// Launches downloader processes (trait object for pluggable implementations)
    pub(crate) runner: std::sync::Arc<dyn ProcessRunner>,
    /// Downloader executable
    pub(crate) program: std::sync::Arc<PathBuf>,
    /// Admission and cancellation state
    pub(crate) state: BatchState,
}

impl std::fmt::Debug for BatchDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDownloader")
            .field("program", &self.program)
            .field("runner", &self.runner.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchDownloader {
    /// Create a downloader that spawns the real downloader executable
    ///
    /// Validates the configuration and locates the executable (explicit
    /// `tools.downloader_path`, else `tools.downloader_name` on PATH). A
    /// missing executable is [`crate::Error::Launch`].
    pub fn new(config: Config) -> Result<Self> {
        let program = discover_executable(&config.tools)?;
        tracing::info!(program = %program.display(), "Downloader executable located");
        Self::with_runner(config, std::sync::Arc::new(CliProcessRunner::new()), program)
    }

    /// Create a downloader with a custom [`ProcessRunner`]
    ///
    /// # Examples
    ///
    /// ```
    /// use bilibili_dl::{BatchDownloader, Config};
    /// use bilibili_dl::process::ScriptedProcessRunner;
    /// use std::sync::Arc;
    ///
    /// let downloader = BatchDownloader::with_runner(
    ///     Config::default(),
    ///     Arc::new(ScriptedProcessRunner::new()),
    ///     "you-get".into(),
    /// )
    /// .unwrap();
    /// assert_eq!(downloader.runner_name(), "scripted");
    /// ```
    pub fn with_runner(
        config: Config,
        runner: std::sync::Arc<dyn ProcessRunner>,
        program: PathBuf,
    ) -> Result<Self> {
        config.validate()?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        tracing::debug!(
            runner = runner.name(),
            max_concurrent = config.download.max_concurrent_downloads,
            "Batch downloader initialized"
        );

        Ok(Self {
            event_tx,
            state: BatchState::new(config.download.max_concurrent_downloads),
            config: std::sync::Arc::new(config),
            runner,
            program: std::sync::Arc::new(program),
        })
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use bilibili_dl::{BatchDownloader, Config};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = BatchDownloader::new(Config::default())?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "download event");
    ///         }
    ///     });
    ///
    ///     downloader.run_inputs(["BV1xx411c7mD", "av170001"]).await?;
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::types::Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> std::sync::Arc<Config> {
        std::sync::Arc::clone(&self.config)
    }

    /// Downloader executable every job invokes
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Name of the process runner implementation
    pub fn runner_name(&self) -> &'static str {
        self.runner.name()
    }

    /// Build a request for `input` using the configured output directory and timeout
    pub fn request(&self, input: impl Into<String>) -> DownloadRequest {
        let request = DownloadRequest::new(input, self.config.download.output_dir.clone());
        match self.config.download.job_timeout {
            Some(timeout) => request.with_timeout(timeout),
            None => request,
        }
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: crate::types::Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}
