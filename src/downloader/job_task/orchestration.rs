//! Job orchestration: top-level lifecycle for a single download.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Error;
use crate::process::LineStream;
use crate::progress::{ProgressParser, ProgressUpdate};
use crate::resolver;
use crate::types::{Event, JobState, JobStatus};

use super::context::JobContext;
use super::finalization::JobOutcome;

/// Why the output loop stopped before the process closed its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Drives one job from Pending to a terminal state.
///
/// Owns the job's [`JobState`] and [`ProgressParser`]; nothing else mutates
/// them. The final snapshot is returned from [`run`](Self::run).
pub(crate) struct JobController {
    pub(super) ctx: JobContext,
    pub(super) state: JobState,
    pub(super) parser: ProgressParser,
    /// Last `diagnostic_lines` output lines, attached to process failures
    pub(super) tail: VecDeque<String>,
}

impl JobController {
    pub(crate) fn new(ctx: JobContext) -> Self {
        let state = JobState::pending(ctx.id, ctx.request.clone());
        let capacity = ctx.config.download.diagnostic_lines;
        Self {
            ctx,
            state,
            parser: ProgressParser::new(),
            tail: VecDeque::with_capacity(capacity),
        }
    }

    /// Run the job to completion.
    ///
    /// Phases:
    /// 1. Bail out if cancelled while still Pending (nothing is spawned)
    /// 2. Resolve the input to a canonical URL
    /// 3. Ensure the output directory exists and start the downloader
    /// 4. Stream output lines into log and progress events
    /// 5. Map the exit status, timeout or cancellation to a terminal state
    pub(crate) async fn run(mut self) -> JobState {
        let id = self.ctx.id;

        // Phase 1: cancelled before admission
        if self.ctx.cancel_token.is_cancelled() {
            tracing::debug!(job_id = id.0, "Job cancelled before start");
            return self.finalize(JobOutcome::Cancelled);
        }

        // Phase 2: resolve
        let url = match resolver::resolve(&self.ctx.request.raw_input) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(
                    job_id = id.0,
                    input = %self.ctx.request.raw_input,
                    error = %e,
                    "Input could not be resolved"
                );
                return self.finalize(JobOutcome::Error(e.into()));
            }
        };
        self.state.request.resolved_url = Some(url.clone());

        // Phase 3: start the process
        if let Err(e) = tokio::fs::create_dir_all(&self.ctx.request.output_directory).await {
            let err = Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create output directory '{}': {}",
                    self.ctx.request.output_directory.display(),
                    e
                ),
            ));
            tracing::error!(job_id = id.0, error = %err, "Failed to create output directory");
            return self.finalize(JobOutcome::Error(err));
        }

        let invocation = self.ctx.invocation(&url);
        let mut stream = match self.ctx.runner.start(&invocation).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(job_id = id.0, error = %e, "Failed to start downloader");
                return self.finalize(JobOutcome::Error(e));
            }
        };

        self.state.status = JobStatus::Running;
        self.state.started_at = Some(chrono::Utc::now());
        self.state.last_message = "starting download".to_string();
        tracing::info!(job_id = id.0, url = %url, command = %invocation.display_command(), "Job started");
        self.ctx.emit(Event::JobStarted { id, url });
        self.ctx.emit(Event::Progress {
            id,
            percent: 0,
            message: self.state.last_message.clone(),
        });

        // Phase 4 and 5
        let outcome = self.supervise(&mut stream).await;
        self.finalize(outcome)
    }

    /// Pump output until the process exits or the job is interrupted.
    async fn supervise(&mut self, stream: &mut LineStream) -> JobOutcome {
        let timeout = self.ctx.timeout();
        let deadline = timeout.map(|t| Instant::now() + t);
        let cancel = self.ctx.cancel_token.clone();

        let interrupt = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Interrupt::Cancelled),
                _ = wait_until(deadline) => Err(Interrupt::TimedOut),
                line = stream.next_line() => Ok(line),
            };
            match next {
                Ok(Some(line)) => self.handle_line(line),
                Ok(None) => break None,
                Err(interrupt) => break Some(interrupt),
            }
        };

        // Output closed; the process may still be shutting down
        let interrupt = match interrupt {
            Some(interrupt) => interrupt,
            None => {
                let exited = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Interrupt::Cancelled),
                    _ = wait_until(deadline) => Err(Interrupt::TimedOut),
                    code = stream.exit_code() => Ok(code),
                };
                match exited {
                    Ok(Ok(code)) => return JobOutcome::Exited(code),
                    Ok(Err(e)) => return JobOutcome::Error(e),
                    Err(interrupt) => interrupt,
                }
            }
        };

        // An interrupt that lands after the process already exited changes nothing
        match stream.try_exit_code() {
            Ok(Some(code)) => {
                tracing::debug!(
                    job_id = self.ctx.id.0,
                    reason = ?interrupt,
                    exit_code = ?code,
                    "Downloader exited before interrupt, keeping its result"
                );
                self.drain(stream).await;
                return JobOutcome::Exited(code);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(job_id = self.ctx.id.0, error = %e, "Failed to poll downloader status");
            }
        }

        self.stop(stream, interrupt).await;
        match interrupt {
            Interrupt::Cancelled => JobOutcome::Cancelled,
            Interrupt::TimedOut => {
                JobOutcome::TimedOut(timeout.unwrap_or(Duration::ZERO))
            }
        }
    }

    /// Kill the process, keep lines it already wrote, and reap it.
    async fn stop(&mut self, stream: &mut LineStream, interrupt: Interrupt) {
        let id = self.ctx.id;
        tracing::info!(job_id = id.0, reason = ?interrupt, "Terminating downloader");
        if let Err(e) = stream.terminate().await {
            tracing::warn!(job_id = id.0, error = %e, "Failed to terminate downloader");
        }
        while let Some(line) = stream.next_line().await {
            self.handle_line(line);
        }
        let grace = self.ctx.config.download.cancel_grace;
        match tokio::time::timeout(grace, stream.exit_code()).await {
            Ok(Ok(code)) => tracing::debug!(job_id = id.0, exit_code = ?code, "Downloader reaped"),
            Ok(Err(e)) => tracing::warn!(job_id = id.0, error = %e, "Failed to reap downloader"),
            Err(_) => tracing::warn!(job_id = id.0, "Downloader did not exit after kill"),
        }
    }

    /// Read whatever an exited process left in the pipe.
    async fn drain(&mut self, stream: &mut LineStream) {
        let grace = self.ctx.config.download.cancel_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(line) = stream.next_line().await {
                self.handle_line(line);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(job_id = self.ctx.id.0, "Output still open after downloader exited");
        }
    }

    /// Record one raw output line and any progress it carries.
    pub(super) fn handle_line(&mut self, line: String) {
        let id = self.ctx.id;
        for update in self.parser.ingest(&line) {
            self.apply_progress(update);
        }

        let limit = self.ctx.config.download.diagnostic_lines;
        if limit > 0 {
            if self.tail.len() == limit {
                self.tail.pop_front();
            }
            self.tail.push_back(line.clone());
        }

        let stalled_lines = self.parser.lines_since_progress();
        self.state.stalled_lines = stalled_lines;
        tracing::trace!(job_id = id.0, line = %line, stalled_lines, "downloader output");
        self.ctx.emit(Event::LogLine {
            id,
            line,
            stalled_lines,
        });
    }

    pub(super) fn apply_progress(&mut self, update: ProgressUpdate) {
        self.state.progress = update.percent;
        self.state.phase = update.phase;
        self.state.last_message = update.message.clone();
        self.ctx.emit(Event::Progress {
            id: self.ctx.id,
            percent: update.percent,
            message: update.message,
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
