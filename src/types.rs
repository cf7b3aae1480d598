//! Core types for bilibili-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Unique identifier for a job within a batch downloader
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Job status
///
/// `Pending -> Running -> {Succeeded, Failed, Cancelled}`; the last three are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a concurrency slot
    Pending,
    /// Downloader process is running
    Running,
    /// Downloader exited with status 0
    Succeeded,
    /// Resolution, launch, process exit or timeout failure
    Failed,
    /// Stopped by caller intent
    Cancelled,
}

impl JobStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Which of the two sequential transfers is contributing raw progress
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// First transfer (video stream), logical 0-50%
    #[default]
    Video,
    /// Second transfer (audio stream), logical 50-100%
    Audio,
}

/// A single download as submitted by the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Text exactly as the user supplied it (URL, BV/av id, or free text)
    pub raw_input: String,
    /// Canonical URL, filled in once resolution succeeds
    pub resolved_url: Option<String>,
    /// Directory the downloader writes into
    pub output_directory: PathBuf,
    /// Per-job wall-clock limit overriding the configured default
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl DownloadRequest {
    /// Create an unresolved request
    pub fn new(raw_input: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            raw_input: raw_input.into(),
            resolved_url: None,
            output_directory: output_directory.into(),
            timeout: None,
        }
    }

    /// Set a per-job timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Snapshot of one job's state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobState {
    /// Job ID
    pub id: JobId,
    /// The request being processed
    pub request: DownloadRequest,
    /// Lifecycle status
    pub status: JobStatus,
    /// Logical progress percentage (0 to 100, non-decreasing)
    pub progress: u8,
    /// Current transfer phase
    pub phase: Phase,
    /// Most recent human-readable status message
    pub last_message: String,
    /// Output lines seen since progress last moved
    #[serde(default)]
    pub stalled_lines: usize,
    /// Error message for failed or cancelled jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code (see [`crate::Error::error_code`])
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// When the downloader process was started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    /// Create a Pending job
    pub fn pending(id: JobId, request: DownloadRequest) -> Self {
        Self {
            id,
            request,
            status: JobStatus::Pending,
            progress: 0,
            phase: Phase::Video,
            last_message: "waiting".to_string(),
            stalled_lines: 0,
            error: None,
            error_code: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Aggregate outcome of a batch
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchResult {
    /// Number of jobs submitted
    pub total: usize,
    /// Jobs that ended Succeeded
    pub succeeded: usize,
    /// Jobs that ended Failed
    pub failed: usize,
    /// Jobs that ended Cancelled
    pub cancelled: usize,
    /// Job snapshots in submission order
    pub per_job: Vec<JobState>,
}

impl BatchResult {
    /// Number of jobs in a terminal state
    pub fn terminal_count(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// Whether every job has reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.terminal_count() == self.total
    }

    /// Whether every job succeeded (an empty batch counts as success)
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

/// Overall batch progress: `terminal / total * 100`, truncated
///
/// An empty batch is reported as complete.
pub fn batch_percent(terminal: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = terminal.min(total) * 100 / total;
    percent as u8
}

/// Event emitted during batch and job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted into the batch
    JobQueued {
        /// Job ID
        id: JobId,
        /// Raw user input
        input: String,
    },

    /// Downloader process started for a job
    JobStarted {
        /// Job ID
        id: JobId,
        /// Resolved canonical URL
        url: String,
    },

    /// Job progress update
    Progress {
        /// Job ID
        id: JobId,
        /// Logical progress percentage (0 to 100)
        percent: u8,
        /// Human-readable status message
        message: String,
    },

    /// Raw output line from the downloader
    LogLine {
        /// Job ID
        id: JobId,
        /// Output line (without terminator)
        line: String,
        /// Lines since progress last moved, this one included (0 if it moved progress)
        stalled_lines: usize,
    },

    /// Job reached a terminal state
    JobDone {
        /// Job ID
        id: JobId,
        /// Whether the job succeeded
        success: bool,
        /// Terminal status
        status: JobStatus,
        /// Human-readable outcome
        message: String,
    },

    /// Overall batch progress after a job finished
    BatchProgress {
        /// Jobs in a terminal state
        completed: usize,
        /// Jobs in the batch
        total: usize,
        /// `completed / total * 100`
        percent: u8,
    },

    /// Every job in the batch is terminal
    BatchDone {
        /// Final aggregate
        result: BatchResult,
    },
}

impl Event {
    /// Job this event belongs to, if any
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Event::JobQueued { id, .. }
            | Event::JobStarted { id, .. }
            | Event::Progress { id, .. }
            | Event::LogLine { id, .. }
            | Event::JobDone { id, .. } => Some(*id),
            Event::BatchProgress { .. } | Event::BatchDone { .. } => None,
        }
    }
}
