//! Process runner backed by a real child process

use super::traits::{Invocation, LineStream, ProcessHandle, ProcessRunner};
use crate::config::ToolsConfig;
use crate::error::Error;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
#[cfg(unix)]
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Lines buffered between the pipe readers and the consumer
const LINE_CHANNEL_CAPACITY: usize = 256;

const READ_CHUNK: usize = 8 * 1024;

/// Process runner that spawns the downloader with `tokio::process`
///
/// stdout and stderr are redirected into a single pipe, so the consumer sees
/// them interleaved exactly as the process wrote them. The child is killed if
/// the stream is dropped.
///
/// # Examples
///
/// ```no_run
/// use bilibili_dl::config::ToolsConfig;
/// use bilibili_dl::process::{CliProcessRunner, discover_executable};
///
/// let program = discover_executable(&ToolsConfig::default())
///     .expect("you-get not found");
/// let runner = CliProcessRunner::new();
/// ```
#[derive(Debug, Default, Clone)]
pub struct CliProcessRunner;

impl CliProcessRunner {
    /// Create a new runner
    pub fn new() -> Self {
        Self
    }
}

/// Locate the downloader executable
///
/// An explicit `downloader_path` wins; a bare name given there is also looked
/// up on PATH. Otherwise `downloader_name` is searched on PATH when
/// `search_path` is enabled.
pub fn discover_executable(tools: &ToolsConfig) -> crate::Result<PathBuf> {
    if let Some(path) = &tools.downloader_path {
        if path.is_file() {
            return Ok(path.clone());
        }
        return which::which(path).map_err(|e| Error::Launch {
            program: path.clone(),
            reason: format!("downloader not found: {e}"),
        });
    }

    if !tools.search_path {
        return Err(Error::Launch {
            program: PathBuf::from(&tools.downloader_name),
            reason: "no downloader_path configured and PATH search is disabled".to_string(),
        });
    }

    which::which(&tools.downloader_name).map_err(|e| Error::Launch {
        program: PathBuf::from(&tools.downloader_name),
        reason: format!("not found in PATH: {e}"),
    })
}

#[async_trait]
impl ProcessRunner for CliProcessRunner {
    async fn start(&self, invocation: &Invocation) -> crate::Result<LineStream> {
        let launch_error = |reason: String| Error::Launch {
            program: invocation.program.clone(),
            reason,
        };

        // stdout and stderr share one pipe so lines keep the order they were written in
        let (reader, writer) =
            std::io::pipe().map_err(|e| launch_error(format!("failed to create pipe: {e}")))?;
        let stderr_writer = writer
            .try_clone()
            .map_err(|e| launch_error(format!("failed to create pipe: {e}")))?;

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            // you-get is a Python program; keep its progress output unbuffered
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr_writer))
            .kill_on_drop(true);
        let spawned = command.spawn();
        // The command holds the parent's write ends; EOF only arrives once they are closed
        drop(command);
        let child = spawned.map_err(|e| launch_error(e.to_string()))?;

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        spawn_output_reader(reader, tx)?;

        tracing::debug!(
            pid = child.id(),
            command = %invocation.display_command(),
            "downloader process started"
        );

        Ok(LineStream::new(
            rx,
            Box::new(ChildHandle {
                child,
                exit: None,
            }),
        ))
    }

    fn preflight(&self, program: &Path) -> crate::Result<()> {
        if program.is_file() || which::which(program).is_ok() {
            Ok(())
        } else {
            Err(Error::Launch {
                program: program.to_path_buf(),
                reason: "executable does not exist".to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "cli"
    }
}

struct ChildHandle {
    child: Child,
    exit: Option<Option<i32>>,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    async fn wait(&mut self) -> crate::Result<Option<i32>> {
        if let Some(code) = self.exit {
            return Ok(code);
        }
        let status = self.child.wait().await?;
        self.exit = Some(status.code());
        Ok(status.code())
    }

    fn try_wait(&mut self) -> crate::Result<Option<Option<i32>>> {
        if self.exit.is_none()
            && let Some(status) = self.child.try_wait()?
        {
            self.exit = Some(status.code());
        }
        Ok(self.exit)
    }

    async fn kill(&mut self) -> crate::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        // Fails only when the child was already reaped
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "kill on exited downloader ignored");
        }
        Ok(())
    }
}

/// Start the task that turns the merged output pipe into lines
#[cfg(unix)]
fn spawn_output_reader(
    reader: std::io::PipeReader,
    tx: mpsc::Sender<String>,
) -> crate::Result<()> {
    let receiver =
        tokio::net::unix::pipe::Receiver::from_owned_fd(std::os::fd::OwnedFd::from(reader))?;
    tokio::spawn(pump_lines(receiver, tx));
    Ok(())
}

/// Start the task that turns the merged output pipe into lines
#[cfg(not(unix))]
fn spawn_output_reader(
    mut reader: std::io::PipeReader,
    tx: mpsc::Sender<String>,
) -> crate::Result<()> {
    use std::io::Read;

    tokio::task::spawn_blocking(move || {
        let mut splitter = LineSplitter::default();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(error = %e, "downloader pipe read failed");
                    break;
                }
            };
            for line in splitter.push(&buf[..n]) {
                if tx.blocking_send(line).is_err() {
                    return;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = tx.blocking_send(line);
        }
    });
    Ok(())
}

/// Read a pipe to EOF and forward every complete line
#[cfg(unix)]
async fn pump_lines<R>(mut reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::default();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "downloader pipe read failed");
                break;
            }
        };
        for line in splitter.push(&buf[..n]) {
            if tx.send(line).await.is_err() {
                return;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        let _ = tx.send(line).await;
    }
}

/// Incremental splitter treating both `\n` and `\r` as terminators
///
/// Progress bars are redrawn with bare carriage returns, so each redraw
/// becomes its own line. Bytes are decoded lossily; lines are trimmed and
/// empty lines dropped.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk, returning the lines it completed
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if let Some(line) = self.take_line() {
                    lines.push(line);
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush an unterminated final line
    pub(crate) fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        let bytes = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&bytes);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}
