use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::{record_job_finished, record_job_started};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobDirection {
    Export,
    JoinExport,
    Import,
}

impl JobDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobDirection::Export => "export",
            JobDirection::JoinExport => "join_export",
            JobDirection::Import => "import",
        }
    }
}

impl fmt::Display for JobDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Idle,
    Connecting,
    Reading,
    Querying,
    Transforming,
    Writing,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum JobEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged { job_id: Uuid, state: JobState },
    #[serde(rename_all = "camelCase")]
    BatchInserted {
        job_id: Uuid,
        batch_index: usize,
        rows: usize,
        inserted_total: u64,
    },
    #[serde(rename_all = "camelCase")]
    BatchFailed {
        job_id: Uuid,
        batch_index: usize,
        message: String,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<JobEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Per-job bookkeeping: current state, timing, and the optional progress channel.
pub(crate) struct JobTracker {
    id: Uuid,
    direction: JobDirection,
    state: JobState,
    started: Instant,
    progress: Option<ProgressSender>,
}

impl JobTracker {
    pub(crate) fn new(direction: JobDirection, progress: Option<ProgressSender>) -> Self {
        Self::with_id(Uuid::new_v4(), direction, progress)
    }

    pub(crate) fn with_id(id: Uuid, direction: JobDirection, progress: Option<ProgressSender>) -> Self {
        record_job_started(direction.as_str());
        Self {
            id,
            direction,
            state: JobState::Idle,
            started: Instant::now(),
            progress,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn transition(&mut self, state: JobState) {
        if self.state.is_terminal() {
            return;
        }
        info!(
            job_id = %self.id,
            direction = %self.direction,
            from = ?self.state,
            to = ?state,
            "Job state changed"
        );
        self.state = state;
        self.emit(JobEvent::StateChanged { job_id: self.id, state });

        if state.is_terminal() {
            record_job_finished(self.direction.as_str(), state == JobState::Done, self.started);
        }
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.progress {
            // The receiver may have been dropped; progress is best-effort.
            if tx.send(event).is_err() {
                warn!(job_id = %self.id, "Progress receiver dropped");
            }
        }
    }

    /// Marks the job done or failed depending on `result` and passes it through.
    pub(crate) fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.transition(JobState::Done),
            Err(e) => {
                warn!(job_id = %self.id, direction = %self.direction, error = %e, "Job failed");
                self.transition(JobState::Failed);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = JobTracker::new(JobDirection::Export, Some(tx));
        tracker.transition(JobState::Connecting);
        tracker.transition(JobState::Done);
        tracker.transition(JobState::Writing);

        let id = tracker.id();
        assert_eq!(
            rx.try_recv().unwrap(),
            JobEvent::StateChanged { job_id: id, state: JobState::Connecting }
        );
        assert_eq!(rx.try_recv().unwrap(), JobEvent::StateChanged { job_id: id, state: JobState::Done });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_tolerated() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut tracker = JobTracker::new(JobDirection::Import, Some(tx));
        tracker.transition(JobState::Connecting);
        tracker.transition(JobState::Done);
    }

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::BatchFailed {
            job_id: Uuid::nil(),
            batch_index: 1,
            message: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "batchFailed");
        assert_eq!(json["batchIndex"], 1);
    }
}
