//! Job task context: shared handles and event helpers for one job.

use crate::config::Config;
use crate::process::{Invocation, ProcessRunner};
use crate::types::{DownloadRequest, Event, JobId};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared context for a single job, reducing parameter passing between helpers.
pub(crate) struct JobContext {
    pub(crate) id: JobId,
    pub(crate) request: DownloadRequest,
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    pub(crate) config: Arc<Config>,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) program: Arc<PathBuf>,
    pub(crate) cancel_token: CancellationToken,
    /// Set by whoever emits this job's `JobDone`; shared with the batch
    pub(crate) reported: Arc<AtomicBool>,
}

impl JobContext {
    /// Send an event; having no subscribers is fine.
    pub(super) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Take the right to emit `JobDone`; only the first caller gets it.
    pub(super) fn claim_report(&self) -> bool {
        !self.reported.swap(true, Ordering::SeqCst)
    }

    /// Wall-clock limit for this job, if any.
    pub(super) fn timeout(&self) -> Option<Duration> {
        self.request.timeout.or(self.config.download.job_timeout)
    }

    /// Downloader command line for `url`.
    ///
    /// `<program> -o <dir> [options...] <url>`, run inside the output directory.
    pub(super) fn invocation(&self, url: &str) -> Invocation {
        let output_dir = self.request.output_directory.to_string_lossy().into_owned();
        Invocation::new(self.program.as_ref().clone(), &self.request.output_directory)
            .arg("-o")
            .arg(output_dir)
            .args(self.config.options.to_args())
            .arg(url)
    }
}
