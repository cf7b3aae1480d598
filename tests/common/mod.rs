//! Common test utilities for bilibili-dl integration tests
//!
//! Builds a shell script that mimics the downloader's output so the real
//! process runner can be exercised without network access.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use bilibili_dl::{BatchDownloader, Config, Event, JobId};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Ids the fake downloader knows how to handle
pub const OK_ID: &str = "BV1111111111";
pub const CR_ID: &str = "BV2222222222";
pub const FAIL_ID: &str = "BV0000000000";
pub const SLEEP_ID: &str = "BVs1eeps1eep";

/// Name of the file the fake downloader appends its arguments to
pub const ARGS_LOG: &str = "args.log";

const FAKE_DOWNLOADER: &str = r#"#!/bin/sh
for last; do :; done
printf '%s\n' "$*" >> args.log
case "$last" in
  *BV1111111111)
    echo "site:                Bilibili"
    echo " 40.0% ( 4.0/10.0MB) [1/2]"
    echo "100.0% (10.0/10.0MB) [1/2]"
    echo " 50.0% ( 1.0/ 2.0MB) [2/2]"
    echo "100.0% ( 2.0/ 2.0MB) [2/2]"
    exit 0
    ;;
  *BV2222222222)
    printf ' 10.0%%\r 60.0%%\r100.0%%\n'
    exit 0
    ;;
  *BV0000000000)
    echo "you-get: [Failed] Unsupported url" >&2
    exit 3
    ;;
  *BVs1eeps1eep)
    echo " 12.0% ( 1.2/10.0MB) [1/2]"
    exec sleep 30
    ;;
esac
exit 0
"#;

/// Write the fake downloader script into `dir` and return its path
pub fn write_fake_downloader(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("fake-you-get");
    std::fs::write(&path, FAKE_DOWNLOADER).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Downloader wired to the fake script, with outputs under a temp dir
pub fn create_cli_downloader(
    configure: impl FnOnce(&mut Config),
) -> (BatchDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let script = write_fake_downloader(temp_dir.path());

    let mut config = Config::default();
    config.download.output_dir = temp_dir.path().join("downloads");
    config.download.cancel_grace = Duration::from_secs(2);
    config.tools.downloader_path = Some(script);
    config.tools.search_path = false;
    configure(&mut config);

    let downloader = BatchDownloader::new(config).unwrap();
    (downloader, temp_dir)
}

/// Wait for the JobStarted event of the job downloading `id`
pub async fn wait_for_started(events: &mut broadcast::Receiver<Event>, id: &str) -> JobId {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(Event::JobStarted { id: job, url }) = events.recv().await
                && url.ends_with(id)
            {
                return job;
            }
        }
    })
    .await
    .expect("job did not start in time")
}

/// Percent values reported for one job, in order
pub fn progress_of(events: &[Event], job: JobId) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { id, percent, .. } if *id == job => Some(*percent),
            _ => None,
        })
        .collect()
}

/// Everything currently buffered on the receiver
pub fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
