//! Scripted process runner for deterministic orchestration
//!
//! Plays back canned output per target URL instead of spawning anything.
//! Useful for exercising the batch downloader without a real downloader
//! installed.

use super::traits::{Invocation, LineStream, ProcessHandle, ProcessRunner};
use crate::error::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a scripted process ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Exit with this code once every line is written
    Exit(i32),
    /// Keep running after the last line until killed
    Hang,
    /// Fail to spawn with a launch error
    SpawnError,
}

/// Canned behaviour for one process
#[derive(Debug, Clone)]
pub struct Script {
    /// Output lines, written in order
    pub lines: Vec<String>,
    /// How the process ends
    pub outcome: ScriptOutcome,
    /// Pause before each line
    pub line_delay: Duration,
}

impl Script {
    /// Print `lines` then exit 0
    pub fn success<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::exit(0, lines)
    }

    /// Print `lines` then exit with `code`
    pub fn exit<I, S>(code: i32, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            outcome: ScriptOutcome::Exit(code),
            line_delay: Duration::ZERO,
        }
    }

    /// Print `lines` then block until killed
    pub fn hang<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            outcome: ScriptOutcome::Hang,
            line_delay: Duration::ZERO,
        }
    }

    /// Refuse to spawn
    pub fn spawn_error() -> Self {
        Self {
            lines: Vec::new(),
            outcome: ScriptOutcome::SpawnError,
            line_delay: Duration::ZERO,
        }
    }

    /// Pause before each line
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }
}

/// Process runner that replays [`Script`]s keyed by target URL
///
/// Counts spawns and tracks how many scripted processes are alive at once.
#[derive(Debug)]
pub struct ScriptedProcessRunner {
    scripts: Mutex<HashMap<String, Script>>,
    default_script: Script,
    invocations: Mutex<Vec<Invocation>>,
    running: Arc<AtomicUsize>,
    peak_running: Arc<AtomicUsize>,
    missing_executable: AtomicBool,
}

impl Default for ScriptedProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProcessRunner {
    /// Runner whose processes report 100% and exit 0 unless scripted otherwise
    pub fn new() -> Self {
        Self::with_default(Script::success(["100%"]))
    }

    /// Runner with a custom script for unlisted targets
    pub fn with_default(default_script: Script) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_script,
            invocations: Mutex::new(Vec::new()),
            running: Arc::new(AtomicUsize::new(0)),
            peak_running: Arc::new(AtomicUsize::new(0)),
            missing_executable: AtomicBool::new(false),
        }
    }

    /// Script the process started for `target`
    pub fn script(&self, target: impl Into<String>, script: Script) -> &Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(target.into(), script);
        }
        self
    }

    /// Make [`ProcessRunner::preflight`] fail
    pub fn set_missing_executable(&self, missing: bool) {
        self.missing_executable.store(missing, Ordering::SeqCst);
    }

    /// Number of processes started
    pub fn spawn_count(&self) -> usize {
        self.invocations.lock().map(|i| i.len()).unwrap_or(0)
    }

    /// Every invocation started so far, in start order
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|i| i.clone())
            .unwrap_or_default()
    }

    /// Scripted processes currently alive
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Largest number of scripted processes alive at the same time
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    fn script_for(&self, invocation: &Invocation) -> Script {
        let scripts = match self.scripts.lock() {
            Ok(scripts) => scripts,
            Err(_) => return self.default_script.clone(),
        };
        invocation
            .target()
            .and_then(|target| scripts.get(target))
            .cloned()
            .unwrap_or_else(|| self.default_script.clone())
    }
}

#[async_trait]
impl ProcessRunner for ScriptedProcessRunner {
    async fn start(&self, invocation: &Invocation) -> crate::Result<LineStream> {
        let script = self.script_for(invocation);
        if script.outcome == ScriptOutcome::SpawnError {
            return Err(Error::Launch {
                program: invocation.program.clone(),
                reason: "scripted spawn failure".to_string(),
            });
        }

        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(invocation.clone());
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);

        let killed = CancellationToken::new();
        let finished = CancellationToken::new();
        let (tx, rx) = mpsc::channel(script.lines.len().max(1));

        let feeder_killed = killed.clone();
        let feeder_finished = finished.clone();
        let Script {
            lines,
            outcome,
            line_delay,
        } = script;
        tokio::spawn(async move {
            for line in lines {
                if !line_delay.is_zero() {
                    tokio::select! {
                        _ = feeder_killed.cancelled() => break,
                        _ = tokio::time::sleep(line_delay) => {}
                    }
                }
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            if outcome == ScriptOutcome::Hang {
                feeder_killed.cancelled().await;
            }
            drop(tx);
            feeder_finished.cancel();
        });

        Ok(LineStream::new(
            rx,
            Box::new(ScriptedHandle {
                outcome,
                killed,
                finished,
                running: Arc::clone(&self.running),
            }),
        ))
    }

    fn preflight(&self, program: &Path) -> crate::Result<()> {
        if self.missing_executable.load(Ordering::SeqCst) {
            return Err(Error::Launch {
                program: program.to_path_buf(),
                reason: "executable does not exist".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedHandle {
    outcome: ScriptOutcome,
    killed: CancellationToken,
    finished: CancellationToken,
    running: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessHandle for ScriptedHandle {
    async fn wait(&mut self) -> crate::Result<Option<i32>> {
        tokio::select! {
            biased;
            _ = self.killed.cancelled() => Ok(None),
            _ = self.finished.cancelled() => match self.outcome {
                ScriptOutcome::Exit(code) => Ok(Some(code)),
                _ => Ok(None),
            },
        }
    }

    fn try_wait(&mut self) -> crate::Result<Option<Option<i32>>> {
        if self.killed.is_cancelled() {
            return Ok(Some(None));
        }
        if !self.finished.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(match self.outcome {
            ScriptOutcome::Exit(code) => Some(code),
            _ => None,
        }))
    }

    async fn kill(&mut self) -> crate::Result<()> {
        if !self.finished.is_cancelled() {
            self.killed.cancel();
        }
        Ok(())
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.killed.cancel();
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}
