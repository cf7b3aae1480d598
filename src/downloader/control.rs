//! Batch and job control: cancellation.

use crate::error::{Error, Result};
use crate::types::JobId;

use super::BatchDownloader;

impl BatchDownloader {
    /// Cancel every batch currently running on this downloader
    ///
    /// Running jobs have their downloader process killed; jobs still waiting
    /// for a slot are never started. Each affected `run_batch` call returns
    /// promptly with those jobs marked Cancelled. Batches started after this
    /// call are not affected.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use bilibili_dl::*;
    /// # async fn example(downloader: BatchDownloader) -> Result<()> {
    /// let worker = downloader.clone();
    /// let batch = tokio::spawn(async move { worker.run_inputs(["BV1xx411c7mD"]).await });
    ///
    /// downloader.cancel_batch();
    /// let result = batch.await.map_err(|e| Error::Other(e.to_string()))??;
    /// assert_eq!(result.cancelled + result.succeeded + result.failed, result.total);
    /// # Ok(())
    /// # }
    /// ```
    pub fn cancel_batch(&self) {
        let mut root = match self.state.root_token.lock() {
            Ok(root) => root,
            Err(poisoned) => poisoned.into_inner(),
        };
        root.cancel();
        *root = tokio_util::sync::CancellationToken::new();
        tracing::info!("Batch cancellation requested");
    }

    /// Cancel one job
    ///
    /// A Running job has its process killed and ends Cancelled; a Pending job
    /// ends Cancelled without being started. Cancelling a job that already
    /// reached a terminal state is a no-op, and so is cancelling twice. This
    /// holds after its batch has returned as well.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `id` was never issued by this downloader.
    pub async fn cancel_job(&self, id: JobId) -> Result<()> {
        let active = self.state.active_jobs.lock().await;
        let Some(token) = active.get(&id) else {
            if self.state.was_issued(id) {
                tracing::debug!(job_id = id.0, "Cancel ignored, job already finished");
                return Ok(());
            }
            return Err(Error::NotFound(format!("job {id} was never issued")));
        };
        if !token.is_cancelled() {
            tracing::info!(job_id = id.0, "Job cancellation requested");
            token.cancel();
        }
        Ok(())
    }

    /// IDs of jobs belonging to batches that have not returned yet
    pub async fn active_jobs(&self) -> Vec<JobId> {
        let active = self.state.active_jobs.lock().await;
        let mut ids: Vec<JobId> = active.keys().copied().collect();
        ids.sort();
        ids
    }
}
