//! Callback-style adapter over the event broadcast channel
//!
//! Renderers that prefer callbacks to matching on [`Event`] implement
//! [`BatchObserver`] and hand it to [`forward_events`].

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::types::{BatchResult, Event, JobId, JobStatus};

/// Receives batch and job notifications
///
/// Every method has an empty default, so implementors only override what
/// they render. Notifications for one job arrive in the order the downloader
/// produced them; there is no ordering across jobs.
pub trait BatchObserver: Send {
    /// A job was accepted into the batch
    fn on_job_queued(&mut self, id: JobId, input: &str) {
        let _ = (id, input);
    }

    /// The downloader process for a job was started
    fn on_job_started(&mut self, id: JobId, url: &str) {
        let _ = (id, url);
    }

    /// A job's logical progress moved
    fn on_progress(&mut self, id: JobId, percent: u8, message: &str) {
        let _ = (id, percent, message);
    }

    /// The downloader printed a line
    ///
    /// `stalled_lines` counts lines since progress last moved, so a renderer
    /// can show activity while no percentage is being reported.
    fn on_log_line(&mut self, id: JobId, text: &str, stalled_lines: usize) {
        let _ = (id, text, stalled_lines);
    }

    /// A job reached a terminal state
    fn on_job_done(&mut self, id: JobId, success: bool, status: JobStatus, message: &str) {
        let _ = (id, success, status, message);
    }

    /// A job finished and overall progress changed
    fn on_batch_progress(&mut self, completed: usize, total: usize, percent: u8) {
        let _ = (completed, total, percent);
    }

    /// Every job in the batch is terminal
    fn on_batch_done(&mut self, result: &BatchResult) {
        let _ = result;
    }
}

/// Route one event to the matching observer method
pub fn dispatch<O: BatchObserver + ?Sized>(observer: &mut O, event: &Event) {
    match event {
        Event::JobQueued { id, input } => observer.on_job_queued(*id, input),
        Event::JobStarted { id, url } => observer.on_job_started(*id, url),
        Event::Progress {
            id,
            percent,
            message,
        } => observer.on_progress(*id, *percent, message),
        Event::LogLine {
            id,
            line,
            stalled_lines,
        } => observer.on_log_line(*id, line, *stalled_lines),
        Event::JobDone {
            id,
            success,
            status,
            message,
        } => observer.on_job_done(*id, *success, *status, message),
        Event::BatchProgress {
            completed,
            total,
            percent,
        } => observer.on_batch_progress(*completed, *total, *percent),
        Event::BatchDone { result } => observer.on_batch_done(result),
    }
}

/// Feed events into `observer` until a batch completes or the channel closes
///
/// Returns the observer along with the batch result, if one was seen. A
/// receiver that falls behind skips the lost events and logs a warning.
pub async fn forward_events<O: BatchObserver>(
    mut events: broadcast::Receiver<Event>,
    mut observer: O,
) -> (O, Option<BatchResult>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                dispatch(&mut observer, &event);
                if let Event::BatchDone { result } = event {
                    return (observer, Some(result));
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event observer lagged behind, events dropped");
            }
            Err(RecvError::Closed) => return (observer, None),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl BatchObserver for Recorder {
        fn on_progress(&mut self, id: JobId, percent: u8, _message: &str) {
            self.calls.push(format!("progress {id} {percent}"));
        }

        fn on_log_line(&mut self, id: JobId, text: &str, stalled_lines: usize) {
            self.calls.push(format!("line {id} {text} {stalled_lines}"));
        }

        fn on_job_done(&mut self, id: JobId, success: bool, _status: JobStatus, _message: &str) {
            self.calls.push(format!("done {id} {success}"));
        }

        fn on_batch_done(&mut self, result: &BatchResult) {
            self.calls.push(format!("batch {}", result.total));
        }
    }

    #[tokio::test]
    async fn forwards_until_batch_done() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(Event::JobQueued {
            id: JobId(1),
            input: "av12345".to_string(),
        })
        .unwrap();
        tx.send(Event::Progress {
            id: JobId(1),
            percent: 40,
            message: String::new(),
        })
        .unwrap();
        tx.send(Event::LogLine {
            id: JobId(1),
            line: "Merging video parts...".to_string(),
            stalled_lines: 2,
        })
        .unwrap();
        tx.send(Event::JobDone {
            id: JobId(1),
            success: true,
            status: JobStatus::Succeeded,
            message: String::new(),
        })
        .unwrap();
        tx.send(Event::BatchDone {
            result: BatchResult {
                total: 1,
                succeeded: 1,
                ..Default::default()
            },
        })
        .unwrap();
        tx.send(Event::Progress {
            id: JobId(2),
            percent: 1,
            message: String::new(),
        })
        .unwrap();

        let (recorder, result) = forward_events(rx, Recorder::default()).await;
        assert_eq!(
            recorder.calls,
            vec![
                "progress 1 40",
                "line 1 Merging video parts... 2",
                "done 1 true",
                "batch 1"
            ]
        );
        assert_eq!(result.unwrap().succeeded, 1);
    }

    #[tokio::test]
    async fn closed_channel_ends_without_result() {
        let (tx, rx) = broadcast::channel::<Event>(4);
        drop(tx);
        let (recorder, result) = forward_events(rx, Recorder::default()).await;
        assert!(recorder.calls.is_empty());
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn lagged_receiver_keeps_going() {
        let (tx, rx) = broadcast::channel(2);
        for percent in 0..5 {
            tx.send(Event::Progress {
                id: JobId(1),
                percent,
                message: String::new(),
            })
            .unwrap();
        }
        drop(tx);

        let (recorder, _) = forward_events(rx, Recorder::default()).await;
        assert_eq!(recorder.calls, vec!["progress 1 3", "progress 1 4"]);
    }
}
