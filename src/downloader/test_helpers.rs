//! Shared test helpers for creating BatchDownloader instances in tests.

use crate::config::Config;
use crate::downloader::BatchDownloader;
use crate::process::{ProcessRunner, ScriptedProcessRunner};
use crate::resolver::CANONICAL_VIDEO_BASE;
use crate::types::{Event, JobId};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Canonical URL the resolver produces for a bare BV/av id.
pub(crate) fn video_url(id: &str) -> String {
    format!("{CANONICAL_VIDEO_BASE}{id}")
}

/// Helper to create a test BatchDownloader backed by a test runner.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) fn create_test_downloader(
    runner: Arc<dyn ProcessRunner>,
) -> (BatchDownloader, tempfile::TempDir) {
    create_test_downloader_with(runner, |_| {})
}

/// Same as [`create_test_downloader`] with a chance to adjust the config.
pub(crate) fn create_test_downloader_with(
    runner: Arc<dyn ProcessRunner>,
    configure: impl FnOnce(&mut Config),
) -> (BatchDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.download.output_dir = temp_dir.path().join("downloads");
    config.download.max_concurrent_downloads = 3;
    config.download.cancel_grace = Duration::from_secs(2);
    configure(&mut config);

    let downloader = BatchDownloader::with_runner(config, runner, "you-get".into()).unwrap();
    (downloader, temp_dir)
}

/// Poll until the runner reports at least `count` live processes.
pub(crate) async fn wait_for_running(runner: &ScriptedProcessRunner, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while runner.running() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scripted processes did not start in time");
}

/// Wait for the `JobDone` event of a specific job.
pub(crate) async fn wait_for_job_done(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: JobId,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(Event::JobDone { id: done, .. }) if done == id => return,
                Ok(_) => {}
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("job did not finish in time");
}

/// Drain every event already buffered in the receiver.
pub(crate) fn drain_events(events: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
