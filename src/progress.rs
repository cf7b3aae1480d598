//! Progress extraction from downloader output
//!
//! you-get reports a DASH download as two independent transfers, each counting
//! from 0% to 100%, with the second prefixed by a `[2/2]` marker. The
//! [`ProgressParser`] folds them into a single job-level percentage: the first
//! transfer covers 0-50, the second 50-100. Reported values are integers and
//! never go backwards.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::Phase;

/// Marker the downloader prints in front of the second transfer
pub const SECOND_PART_MARKER: &str = "[2/2]";

#[allow(clippy::expect_used)]
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("literal pattern compiles"));

/// A single logical progress change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Logical job progress (0 to 100)
    pub percent: u8,
    /// Transfer phase the value was derived from
    pub phase: Phase,
    /// Human-readable status
    pub message: String,
    /// Whether this is the completion update produced by [`ProgressParser::finish`]
    pub is_final: bool,
}

/// Stateful per-job progress parser
#[derive(Debug, Default)]
pub struct ProgressParser {
    phase: Phase,
    last_progress: u8,
    lines_since_progress: usize,
}

impl ProgressParser {
    /// Create a parser in phase 1 at 0%
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line
    ///
    /// Returns the updates it produced, usually none or one. The line that
    /// switches to the second transfer can produce two: a forced 50 followed
    /// by the rescaled value of the line itself.
    pub fn ingest(&mut self, line: &str) -> Vec<ProgressUpdate> {
        let Some(raw) = extract_percent(line) else {
            self.lines_since_progress += 1;
            return Vec::new();
        };

        let mut updates = Vec::new();

        if self.phase == Phase::Video && line.contains(SECOND_PART_MARKER) {
            self.phase = Phase::Audio;
            if self.last_progress < 50 {
                self.last_progress = 50;
                updates.push(ProgressUpdate {
                    percent: 50,
                    phase: Phase::Audio,
                    message: "first part complete".to_string(),
                    is_final: false,
                });
            }
        }

        let logical = self.scale(raw);
        if logical > self.last_progress {
            self.last_progress = logical;
            updates.push(ProgressUpdate {
                percent: logical,
                phase: self.phase,
                message: format!("downloading: {logical}%"),
                is_final: false,
            });
        }

        if updates.is_empty() {
            self.lines_since_progress += 1;
        } else {
            self.lines_since_progress = 0;
        }
        updates
    }

    /// Report completion after a successful exit
    ///
    /// Yields a final 100 unless 100 was already reported.
    pub fn finish(&mut self) -> Option<ProgressUpdate> {
        if self.last_progress >= 100 {
            return None;
        }
        self.last_progress = 100;
        self.lines_since_progress = 0;
        Some(ProgressUpdate {
            percent: 100,
            phase: self.phase,
            message: "download complete".to_string(),
            is_final: true,
        })
    }

    /// Last reported logical percentage
    pub fn last_progress(&self) -> u8 {
        self.last_progress
    }

    /// Current transfer phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Lines ingested since progress last moved
    ///
    /// Lets a renderer tell a stalled transfer apart from one whose output
    /// carries no percentages at all.
    pub fn lines_since_progress(&self) -> usize {
        self.lines_since_progress
    }

    fn scale(&self, raw: f64) -> u8 {
        let raw = raw.clamp(0.0, 100.0);
        let logical = match self.phase {
            Phase::Video => raw / 2.0,
            Phase::Audio => 50.0 + raw / 2.0,
        };
        // Truncation is the reported granularity
        logical as u8
    }
}

/// First `<number>%` token in a line
pub fn extract_percent(line: &str) -> Option<f64> {
    PERCENT
        .captures(line)
        .and_then(|caps| caps[1].parse::<f64>().ok())
}
