//! Batch processor: admits jobs in input order and aggregates their outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::BatchDownloader;
use super::job_task::{self, JobContext, JobController};
use crate::error::{Error, Result};
use crate::types::{BatchResult, DownloadRequest, Event, JobId, JobState, JobStatus, batch_percent};

/// Single writer of a [`BatchResult`].
///
/// Holds one snapshot per submitted job, in input order. Pending snapshots are
/// replaced as jobs report; a terminal snapshot is never replaced.
#[derive(Debug)]
pub(crate) struct BatchAggregator {
    jobs: Vec<JobState>,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
}

impl BatchAggregator {
    pub(crate) fn new(jobs: Vec<JobState>) -> Self {
        Self {
            jobs,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn terminal_count(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.terminal_count() == self.total()
    }

    /// Record a job's final snapshot; returns false if it was ignored.
    pub(crate) fn record(&mut self, index: usize, state: JobState) -> bool {
        let Some(slot) = self.jobs.get_mut(index) else {
            return false;
        };
        if slot.is_terminal() || !state.is_terminal() {
            return false;
        }
        match state.status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            JobStatus::Pending | JobStatus::Running => return false,
        }
        *slot = state;
        true
    }

    /// Jobs that have not reported a terminal state.
    pub(crate) fn unfinished(&self) -> Vec<usize> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| !job.is_terminal())
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn snapshot(&self, index: usize) -> Option<&JobState> {
        self.jobs.get(index)
    }

    pub(crate) fn finish(self) -> BatchResult {
        BatchResult {
            total: self.jobs.len(),
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled,
            per_job: self.jobs,
        }
    }
}

impl BatchDownloader {
    /// Run a batch of requests and wait until every job is terminal
    ///
    /// At most `max_concurrent_downloads` downloader processes run at once;
    /// jobs are admitted in input order as slots free up. A failing job never
    /// affects its siblings. Overall progress is emitted as
    /// [`Event::BatchProgress`] each time a job finishes.
    ///
    /// Returns [`Error::Launch`] without starting any job if the downloader
    /// executable is unusable.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use bilibili_dl::{BatchDownloader, Config};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let downloader = BatchDownloader::new(Config::default())?;
    /// let requests = vec![
    ///     downloader.request("BV1xx411c7mD"),
    ///     downloader.request("https://www.bilibili.com/video/av170001"),
    /// ];
    ///
    /// let result = downloader.run_batch(requests).await?;
    /// println!("{} of {} succeeded", result.succeeded, result.total);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_batch(&self, requests: Vec<DownloadRequest>) -> Result<BatchResult> {
        self.runner.preflight(&self.program)?;

        let batch_token = self.state.batch_token();
        let mut jobs = Vec::with_capacity(requests.len());
        let mut pending = Vec::with_capacity(requests.len());
        let mut reported = Vec::with_capacity(requests.len());
        for request in requests {
            let id = self.state.allocate_id();
            let token = batch_token.child_token();
            let done = Arc::new(AtomicBool::new(false));
            pending.push(JobState::pending(id, request.clone()));
            reported.push(Arc::clone(&done));
            jobs.push(JobContext {
                id,
                request,
                event_tx: self.event_tx.clone(),
                config: Arc::clone(&self.config),
                runner: Arc::clone(&self.runner),
                program: Arc::clone(&self.program),
                cancel_token: token,
                reported: done,
            });
        }

        let ids: Vec<JobId> = jobs.iter().map(|job| job.id).collect();
        {
            let mut active = self.state.active_jobs.lock().await;
            for job in &jobs {
                active.insert(job.id, job.cancel_token.clone());
            }
        }
        for job in &jobs {
            self.emit_event(Event::JobQueued {
                id: job.id,
                input: job.request.raw_input.clone(),
            });
        }

        tracing::info!(
            total = jobs.len(),
            max_concurrent = self.config.download.max_concurrent_downloads,
            "Batch started"
        );

        let (report_tx, report_rx) = mpsc::channel(jobs.len().max(1));
        let scheduler = self.spawn_scheduler(jobs, report_tx);
        let result = self
            .aggregate(BatchAggregator::new(pending), report_rx, &batch_token, &reported)
            .await;
        scheduler.abort();

        {
            let mut active = self.state.active_jobs.lock().await;
            for id in &ids {
                active.remove(id);
            }
        }

        tracing::info!(
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            cancelled = result.cancelled,
            "Batch finished"
        );
        self.emit_event(Event::BatchDone {
            result: result.clone(),
        });
        Ok(result)
    }

    /// Run a batch from raw inputs (URLs, BV/av ids, or free text)
    ///
    /// Each input gets the configured output directory and job timeout.
    pub async fn run_inputs<I, S>(&self, inputs: I) -> Result<BatchResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = inputs.into_iter().map(|input| self.request(input)).collect();
        self.run_batch(requests).await
    }

    /// Download a single input as a one-job batch
    pub async fn download_one(&self, input: impl Into<String>) -> Result<JobState> {
        let result = self.run_batch(vec![self.request(input)]).await?;
        result
            .per_job
            .into_iter()
            .next()
            .ok_or_else(|| Error::Other("one-job batch returned no job".to_string()))
    }

    /// Admit jobs in order as concurrency permits become available.
    ///
    /// A job whose token is cancelled while it waits is still handed to its
    /// controller without a permit; the controller sees the cancellation and
    /// finishes without spawning anything.
    fn spawn_scheduler(
        &self,
        jobs: Vec<JobContext>,
        report_tx: mpsc::Sender<(usize, JobState)>,
    ) -> tokio::task::JoinHandle<()> {
        let concurrent_limit = Arc::clone(&self.state.concurrent_limit);

        tokio::spawn(async move {
            for (index, ctx) in jobs.into_iter().enumerate() {
                let permit = tokio::select! {
                    biased;
                    _ = ctx.cancel_token.cancelled() => None,
                    permit = Arc::clone(&concurrent_limit).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            tracing::error!("Concurrency limiter closed, stopping admission");
                            break;
                        }
                    },
                };

                let report_tx = report_tx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let state = JobController::new(ctx).run().await;
                    report_tx.send((index, state)).await.ok();
                });
            }
        })
    }

    /// Collect terminal snapshots until every job has reported.
    ///
    /// Once the batch is cancelled, running jobs get `cancel_grace` to report
    /// back; anything still missing after that is recorded as Cancelled. A
    /// straggler's `JobDone` is emitted here, and its controller stays silent
    /// when it finishes later.
    async fn aggregate(
        &self,
        mut aggregator: BatchAggregator,
        mut report_rx: mpsc::Receiver<(usize, JobState)>,
        batch_token: &CancellationToken,
        reported: &[Arc<AtomicBool>],
    ) -> BatchResult {
        let total = aggregator.total();
        let mut deadline: Option<Instant> = None;

        while !aggregator.is_complete() {
            let report = tokio::select! {
                report = report_rx.recv() => report,
                _ = batch_token.cancelled(), if deadline.is_none() => {
                    tracing::info!("Batch cancelled, waiting for running jobs");
                    deadline = Some(Instant::now() + self.config.download.cancel_grace);
                    continue;
                }
                _ = wait_for(deadline), if deadline.is_some() => {
                    tracing::warn!(
                        unfinished = total - aggregator.terminal_count(),
                        "Cancel grace period expired"
                    );
                    break;
                }
            };

            let Some((index, state)) = report else {
                break;
            };
            if aggregator.record(index, state) {
                self.emit_batch_progress(&aggregator);
            }
        }

        // Reports that raced the deadline
        while let Ok((index, state)) = report_rx.try_recv() {
            if aggregator.record(index, state) {
                self.emit_batch_progress(&aggregator);
            }
        }

        for index in aggregator.unfinished() {
            let Some(snapshot) = aggregator.snapshot(index).cloned() else {
                continue;
            };
            let state = job_task::abandoned(snapshot);
            let first = reported
                .get(index)
                .is_some_and(|flag| !flag.swap(true, Ordering::SeqCst));
            if first {
                self.emit_event(Event::JobDone {
                    id: state.id,
                    success: false,
                    status: state.status,
                    message: format!("{}: {}", state.request.raw_input, state.last_message),
                });
            }
            if aggregator.record(index, state) {
                self.emit_batch_progress(&aggregator);
            }
        }

        aggregator.finish()
    }

    fn emit_batch_progress(&self, aggregator: &BatchAggregator) {
        let completed = aggregator.terminal_count();
        let total = aggregator.total();
        self.emit_event(Event::BatchProgress {
            completed,
            total,
            percent: batch_percent(completed, total),
        });
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
