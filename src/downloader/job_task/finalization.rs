//! Job finalization: map how the job ended to its terminal state.

use std::time::Duration;

use crate::error::{DownloadError, Error};
use crate::types::{Event, JobState, JobStatus};

use super::orchestration::JobController;

/// How a job ended.
#[derive(Debug)]
pub(super) enum JobOutcome {
    /// The process exited on its own (`None` = killed by a signal)
    Exited(Option<i32>),
    /// Cancelled by the caller, before or after starting
    Cancelled,
    /// Wall-clock limit expired; the process was killed
    TimedOut(Duration),
    /// Resolution, launch or I/O failure
    Error(Error),
}

impl JobController {
    /// Move the job to its terminal state, emit `JobDone` unless the batch
    /// already gave up on it, and return the snapshot.
    pub(super) fn finalize(mut self, outcome: JobOutcome) -> JobState {
        let id = self.ctx.id;
        let input = self.ctx.request.raw_input.clone();

        let error = match outcome {
            JobOutcome::Exited(Some(0)) => None,
            JobOutcome::Exited(code) => Some(Error::Download(DownloadError::ProcessFailed {
                code,
                output: self.diagnostics(),
            })),
            JobOutcome::Cancelled => Some(Error::Download(DownloadError::Cancelled)),
            JobOutcome::TimedOut(after) => {
                Some(Error::Download(DownloadError::TimedOut { after }))
            }
            JobOutcome::Error(e) => Some(e),
        };

        let message = match error {
            None => {
                if let Some(update) = self.parser.finish() {
                    self.apply_progress(update);
                }
                self.state.stalled_lines = self.parser.lines_since_progress();
                self.state.status = JobStatus::Succeeded;
                self.state.last_message = "download complete".to_string();
                tracing::info!(job_id = id.0, input = %input, "Job succeeded");
                format!("downloaded: {input}")
            }
            Some(e) => {
                let status = if e.is_cancellation() {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Failed
                };
                if status == JobStatus::Cancelled {
                    tracing::info!(job_id = id.0, input = %input, "Job cancelled");
                } else {
                    tracing::error!(
                        job_id = id.0,
                        input = %input,
                        error_code = e.error_code(),
                        error = %e,
                        "Job failed"
                    );
                }
                self.state.status = status;
                self.state.last_message = e.to_string();
                self.state.error = Some(e.to_string());
                self.state.error_code = Some(e.error_code().to_string());
                format!("{input}: {e}")
            }
        };

        self.state.finished_at = Some(chrono::Utc::now());
        if self.ctx.claim_report() {
            self.ctx.emit(Event::JobDone {
                id,
                success: self.state.status == JobStatus::Succeeded,
                status: self.state.status,
                message,
            });
        } else {
            tracing::debug!(job_id = id.0, "Batch already reported this job, dropping late JobDone");
        }
        self.state
    }

    /// Retained output tail, oldest line first.
    fn diagnostics(&self) -> String {
        self.tail
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Terminal snapshot for a job that never reported back.
pub(crate) fn abandoned(mut state: JobState) -> JobState {
    let err = Error::Download(DownloadError::Cancelled);
    state.status = JobStatus::Cancelled;
    state.last_message = err.to_string();
    state.error = Some(err.to_string());
    state.error_code = Some(err.error_code().to_string());
    state.finished_at = Some(chrono::Utc::now());
    state
}
