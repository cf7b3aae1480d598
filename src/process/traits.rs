//! Traits and types for running the external downloader

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// One downloader command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Working directory for the child
    pub working_dir: PathBuf,
}

impl Invocation {
    /// Create an invocation with no arguments running in `working_dir`
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Last argument, which for downloader invocations is the target URL
    pub fn target(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    /// Shell-like rendering for log output
    pub fn display_command(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            if arg.contains(char::is_whitespace) {
                out.push('"');
                out.push_str(arg);
                out.push('"');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

/// Control side of a started process
#[async_trait]
pub trait ProcessHandle: Send {
    /// Wait for the process to exit
    ///
    /// Returns the exit code, or `None` when the process was terminated by a
    /// signal. Calling it again after exit returns the same value.
    async fn wait(&mut self) -> crate::Result<Option<i32>>;

    /// Check for exit without blocking
    ///
    /// `Ok(None)` while the process is still running, otherwise the same
    /// value [`wait`](Self::wait) would return.
    fn try_wait(&mut self) -> crate::Result<Option<Option<i32>>>;

    /// Request immediate termination
    ///
    /// Best effort and idempotent; killing an exited process is not an error.
    async fn kill(&mut self) -> crate::Result<()>;
}

/// Forward-only stream of decoded output lines from one process
///
/// stdout and stderr are merged in arrival order. Lines are already split on
/// `\n` and `\r`, trimmed, and never empty.
pub struct LineStream {
    lines: mpsc::Receiver<String>,
    handle: Box<dyn ProcessHandle>,
    terminated: bool,
}

impl LineStream {
    /// Wrap a line channel and the handle of the process feeding it
    pub fn new(lines: mpsc::Receiver<String>, handle: Box<dyn ProcessHandle>) -> Self {
        Self {
            lines,
            handle,
            terminated: false,
        }
    }

    /// Next line, or `None` once the process closed its output
    ///
    /// After [`terminate`](Self::terminate) only lines that were already
    /// buffered are returned; the stream then ends without waiting for the
    /// pipes to close.
    pub async fn next_line(&mut self) -> Option<String> {
        if self.terminated {
            return self.lines.try_recv().ok();
        }
        self.lines.recv().await
    }

    /// Wait for the process to exit and return its exit code
    pub async fn exit_code(&mut self) -> crate::Result<Option<i32>> {
        self.handle.wait().await
    }

    /// Exit code if the process has already exited, without waiting
    pub fn try_exit_code(&mut self) -> crate::Result<Option<Option<i32>>> {
        self.handle.try_wait()
    }

    /// Kill the process; safe to call more than once
    pub async fn terminate(&mut self) -> crate::Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.handle.kill().await
    }

    /// Whether [`terminate`](Self::terminate) has been called
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream")
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

/// Trait for launching downloader processes
///
/// The batch downloader only talks to the outside world through this trait,
/// so orchestration can be exercised without a real downloader installed.
///
/// # Examples
///
/// ```no_run
/// use bilibili_dl::process::{CliProcessRunner, Invocation, ProcessRunner};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let runner = CliProcessRunner::new();
/// let invocation = Invocation::new("you-get", "downloads")
///     .args(["-o", "downloads", "https://www.bilibili.com/video/BV1xx411c7mD"]);
///
/// let mut stream = runner.start(&invocation).await?;
/// while let Some(line) = stream.next_line().await {
///     println!("{line}");
/// }
/// println!("exit code: {:?}", stream.exit_code().await?);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Spawn the process and start streaming its output
    ///
    /// A spawn failure (missing executable, permission denied) is
    /// [`crate::Error::Launch`].
    async fn start(&self, invocation: &Invocation) -> crate::Result<LineStream>;

    /// Verify that `program` can be launched at all
    ///
    /// Called once before a batch starts. A failure aborts the batch before
    /// any job runs.
    fn preflight(&self, program: &Path) -> crate::Result<()> {
        let _ = program;
        Ok(())
    }

    /// Get the name of this implementation
    fn name(&self) -> &'static str;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct StubHandle {
        kills: usize,
    }

    #[async_trait]
    impl ProcessHandle for StubHandle {
        async fn wait(&mut self) -> crate::Result<Option<i32>> {
            Ok(if self.kills > 0 { None } else { Some(0) })
        }

        fn try_wait(&mut self) -> crate::Result<Option<Option<i32>>> {
            Ok((self.kills > 0).then_some(None))
        }

        async fn kill(&mut self) -> crate::Result<()> {
            self.kills += 1;
            Ok(())
        }
    }

    #[test]
    fn invocation_builder_keeps_argument_order() {
        let inv = Invocation::new("/usr/bin/you-get", "/tmp/out")
            .args(["-o", "/tmp/out"])
            .arg("https://www.bilibili.com/video/BV1xx411c7mD");
        assert_eq!(
            inv.args,
            vec!["-o", "/tmp/out", "https://www.bilibili.com/video/BV1xx411c7mD"]
        );
        assert_eq!(
            inv.target(),
            Some("https://www.bilibili.com/video/BV1xx411c7mD")
        );
    }

    #[test]
    fn display_command_quotes_arguments_with_spaces() {
        let inv = Invocation::new("you-get", ".").args(["-o", "My Videos", "url"]);
        assert_eq!(inv.display_command(), "you-get -o \"My Videos\" url");
    }

    #[tokio::test]
    async fn buffered_lines_survive_terminate() {
        let (tx, rx) = mpsc::channel(8);
        tx.send("first".to_string()).await.unwrap();
        tx.send("second".to_string()).await.unwrap();

        let mut stream = LineStream::new(rx, Box::new(StubHandle { kills: 0 }));
        stream.terminate().await.unwrap();
        stream.terminate().await.unwrap();
        assert!(stream.is_terminated());
        assert_eq!(stream.try_exit_code().unwrap(), Some(None));

        assert_eq!(stream.next_line().await.as_deref(), Some("first"));
        assert_eq!(stream.next_line().await.as_deref(), Some("second"));
        // Sender is still alive, but a terminated stream does not wait on it
        assert_eq!(stream.next_line().await, None);
        assert_eq!(stream.exit_code().await.unwrap(), None);
        drop(tx);
    }
}
