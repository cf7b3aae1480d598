//! Tests for the job task module.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::process::{
    Invocation, LineStream, ProcessHandle, ProcessRunner, Script, ScriptedProcessRunner,
};
use crate::types::{DownloadRequest, Event, JobId, JobStatus};

use super::context::JobContext;
use super::orchestration::JobController;

fn context(
    runner: Arc<dyn ProcessRunner>,
    input: &str,
    output_dir: PathBuf,
) -> (JobContext, broadcast::Receiver<Event>) {
    let (event_tx, rx) = broadcast::channel(1000);
    let ctx = JobContext {
        id: JobId(1),
        request: DownloadRequest::new(input, output_dir),
        event_tx,
        config: Arc::new(Config::default()),
        runner,
        program: Arc::new(PathBuf::from("you-get")),
        cancel_token: CancellationToken::new(),
        reported: Arc::new(AtomicBool::new(false)),
    };
    (ctx, rx)
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Runner whose process closes its output and then dies from a signal.
struct SignalledRunner;

struct SignalledHandle;

#[async_trait]
impl ProcessHandle for SignalledHandle {
    async fn wait(&mut self) -> crate::Result<Option<i32>> {
        Ok(None)
    }

    fn try_wait(&mut self) -> crate::Result<Option<Option<i32>>> {
        Ok(Some(None))
    }

    async fn kill(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for SignalledRunner {
    async fn start(&self, _invocation: &Invocation) -> crate::Result<LineStream> {
        let (tx, rx) = mpsc::channel(4);
        tx.send("Killed".to_string()).await.ok();
        Ok(LineStream::new(rx, Box::new(SignalledHandle)))
    }

    fn name(&self) -> &'static str {
        "signalled"
    }
}

/// Runner whose process has already exited cleanly by the time `start`
/// returns, and which cancels the job in the same instant.
struct ExitedThenCancelledRunner {
    cancel: CancellationToken,
    kills: Arc<std::sync::atomic::AtomicUsize>,
}

struct ExitedHandle {
    kills: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait]
impl ProcessHandle for ExitedHandle {
    async fn wait(&mut self) -> crate::Result<Option<i32>> {
        Ok(Some(0))
    }

    fn try_wait(&mut self) -> crate::Result<Option<Option<i32>>> {
        Ok(Some(Some(0)))
    }

    async fn kill(&mut self) -> crate::Result<()> {
        self.kills.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for ExitedThenCancelledRunner {
    async fn start(&self, _invocation: &Invocation) -> crate::Result<LineStream> {
        let (tx, rx) = mpsc::channel(4);
        tx.send("100.0% (10.0/10.0MB) [1/2]".to_string()).await.ok();
        drop(tx);
        self.cancel.cancel();
        Ok(LineStream::new(
            rx,
            Box::new(ExitedHandle {
                kills: Arc::clone(&self.kills),
            }),
        ))
    }

    fn name(&self) -> &'static str {
        "exited-then-cancelled"
    }
}

// -----------------------------------------------------------------------
// Lifecycle
// -----------------------------------------------------------------------

#[tokio::test]
async fn successful_job_reports_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedProcessRunner::with_default(Script::success([
        "site:                Bilibili",
        " 40.0% ( 4.0/10.0MB) [1/2]",
        "100.0% (10.0/10.0MB) [1/2]",
    ])));
    let (ctx, mut rx) = context(runner.clone(), "BV1xx411c7mD", dir.path().to_path_buf());

    let state = JobController::new(ctx).run().await;

    assert_eq!(state.status, JobStatus::Succeeded);
    assert_eq!(state.progress, 100);
    assert_eq!(
        state.request.resolved_url.as_deref(),
        Some("https://www.bilibili.com/video/BV1xx411c7mD")
    );
    assert!(state.error.is_none());
    assert_eq!(runner.spawn_count(), 1);

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(Event::JobStarted { .. })));
    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0, 20, 50, 100]);
    match events.last() {
        Some(Event::JobDone {
            success, status, ..
        }) => {
            assert!(*success);
            assert_eq!(*status, JobStatus::Succeeded);
        }
        other => panic!("expected JobDone last, got {other:?}"),
    }
}

#[tokio::test]
async fn unresolvable_input_fails_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedProcessRunner::new());
    let (ctx, mut rx) = context(runner.clone(), "not a real video", dir.path().to_path_buf());

    let state = JobController::new(ctx).run().await;

    assert_eq!(state.status, JobStatus::Failed);
    assert_eq!(state.error_code.as_deref(), Some("unrecognized_input"));
    assert!(state.started_at.is_none());
    assert_eq!(runner.spawn_count(), 0);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        Event::JobDone {
            success: false,
            status: JobStatus::Failed,
            ..
        }
    ));
}

#[tokio::test]
async fn empty_input_fails_with_empty_code() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedProcessRunner::new());
    let (ctx, _rx) = context(runner, "   ", dir.path().to_path_buf());

    let state = JobController::new(ctx).run().await;
    assert_eq!(state.error_code.as_deref(), Some("empty_input"));
}

#[tokio::test]
async fn cancelled_before_start_never_spawns() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedProcessRunner::new());
    let (ctx, _rx) = context(runner.clone(), "BV1xx411c7mD", dir.path().to_path_buf());
    ctx.cancel_token.cancel();

    let state = JobController::new(ctx).run().await;

    assert_eq!(state.status, JobStatus::Cancelled);
    assert_eq!(state.error_code.as_deref(), Some("cancelled"));
    assert_eq!(runner.spawn_count(), 0);
}

#[tokio::test]
async fn cancellation_keeps_lines_already_written() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedProcessRunner::with_default(Script::hang([
        "10%", "20%", "30%",
    ])));
    let (ctx, mut rx) = context(runner.clone(), "av12345", dir.path().to_path_buf());
    let token = ctx.cancel_token.clone();

    let job = tokio::spawn(JobController::new(ctx).run());
    // Wait until the process has written all three lines
    loop {
        match rx.recv().await.unwrap() {
            Event::LogLine { line, .. } if line == "30%" => break,
            _ => {}
        }
    }
    token.cancel();
    token.cancel();

    let state = job.await.unwrap();
    assert_eq!(state.status, JobStatus::Cancelled);
    assert_eq!(state.progress, 15);
    assert_eq!(runner.running(), 0);
}

#[tokio::test]
async fn cancel_after_process_exit_keeps_success() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let kills = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let runner = Arc::new(ExitedThenCancelledRunner {
        cancel: cancel.clone(),
        kills: Arc::clone(&kills),
    });
    let (mut ctx, mut rx) = context(runner, "av12345", dir.path().to_path_buf());
    ctx.cancel_token = cancel;

    let state = JobController::new(ctx).run().await;

    assert_eq!(state.status, JobStatus::Succeeded);
    assert_eq!(state.progress, 100);
    assert!(state.error.is_none());
    assert_eq!(kills.load(std::sync::atomic::Ordering::SeqCst), 0);

    let events = drain(&mut rx);
    assert!(events.iter().any(
        |e| matches!(e, Event::LogLine { line, .. } if line.starts_with("100.0%"))
    ));
}

#[tokio::test]
async fn signal_termination_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _rx) = context(
        Arc::new(SignalledRunner),
        "av12345",
        dir.path().to_path_buf(),
    );

    let state = JobController::new(ctx).run().await;

    assert_eq!(state.status, JobStatus::Failed);
    assert_eq!(state.error_code.as_deref(), Some("process_failed"));
    let error = state.error.unwrap();
    assert!(error.contains("terminated by signal"), "got: {error}");
    assert!(error.contains("Killed"), "got: {error}");
}

#[tokio::test]
async fn log_lines_carry_stall_count() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedProcessRunner::with_default(Script::hang([
        "site:                Bilibili",
        "title:               demo",
        " 10.0% ( 1.0/10.0MB) [1/2]",
        "Merging video parts...",
    ])));
    let (ctx, mut rx) = context(runner, "av12345", dir.path().to_path_buf());
    let token = ctx.cancel_token.clone();

    let job = tokio::spawn(JobController::new(ctx).run());
    let mut stalled = Vec::new();
    while stalled.len() < 4 {
        if let Event::LogLine { stalled_lines, .. } = rx.recv().await.unwrap() {
            stalled.push(stalled_lines);
        }
    }
    assert_eq!(stalled, vec![1, 2, 0, 1]);

    token.cancel();
    let state = job.await.unwrap();
    assert_eq!(state.status, JobStatus::Cancelled);
    assert_eq!(state.progress, 5);
    assert_eq!(state.stalled_lines, 1);
}

#[tokio::test]
async fn already_reported_job_emits_no_second_job_done() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedProcessRunner::new());
    let (ctx, mut rx) = context(runner, "av12345", dir.path().to_path_buf());
    ctx.reported.store(true, std::sync::atomic::Ordering::SeqCst);

    let state = JobController::new(ctx).run().await;

    assert_eq!(state.status, JobStatus::Succeeded);
    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, Event::JobDone { .. })));
    assert!(events.iter().any(|e| matches!(e, Event::JobStarted { .. })));
}

#[tokio::test]
async fn output_directory_is_created_before_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let runner = Arc::new(ScriptedProcessRunner::new());
    let (ctx, _rx) = context(runner.clone(), "av12345", nested.clone());

    let state = JobController::new(ctx).run().await;

    assert_eq!(state.status, JobStatus::Succeeded);
    assert!(nested.is_dir());
    assert_eq!(runner.invocations()[0].working_dir, nested);
}

#[tokio::test]
async fn unusable_output_directory_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let runner = Arc::new(ScriptedProcessRunner::new());
    let (ctx, _rx) = context(runner.clone(), "av12345", blocker.join("out"));

    let state = JobController::new(ctx).run().await;

    assert_eq!(state.status, JobStatus::Failed);
    assert_eq!(state.error_code.as_deref(), Some("io_error"));
    assert_eq!(runner.spawn_count(), 0);
}
