//! Indexing job lifecycle types (spec.md §4.7):
//! `idle -> running(scanning) -> running(embedding) -> finalizing (non-cancellable) -> done|cancelled|error`

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Scanning,
    Embedding,
    /// Writing the new generation's artifacts. Not cancellable: a job in
    /// this phase has already decided what it will publish.
    Finalizing,
}

impl JobPhase {
    pub fn is_cancellable(&self) -> bool {
        !matches!(self, JobPhase::Finalizing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running { phase: JobPhase },
    Done,
    Cancelled,
    Error { message: String },
}

/// Snapshot of an indexing job's progress, cloned out for `/reindex_status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub embedded: usize,
    pub total: usize,
}

impl JobRecord {
    pub fn new(job_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            state: JobState::Running { phase: JobPhase::Scanning },
            started_at,
            finished_at: None,
            scanned: 0,
            embedded: 0,
            total: 0,
        }
    }

    pub fn phase(&self) -> Option<JobPhase> {
        match self.state {
            JobState::Running { phase } => Some(phase),
            _ => None,
        }
    }

    pub fn is_cancellable(&self) -> bool {
        self.phase().is_some_and(|p| p.is_cancellable())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Done | JobState::Cancelled | JobState::Error { .. })
    }

    /// Coarse percent-complete for `/reindex_status`, computed from whichever
    /// counter the current phase advances (§6.2: `progress_pct`).
    pub fn progress_pct(&self) -> u32 {
        let pct = |done: usize, total: usize| ((done * 100) / total.max(1)) as u32;
        match &self.state {
            JobState::Idle => 0,
            JobState::Running { phase: JobPhase::Scanning } => pct(self.scanned, self.total),
            JobState::Running { phase: JobPhase::Embedding } => pct(self.embedded, self.total),
            JobState::Running { phase: JobPhase::Finalizing } => 100,
            JobState::Done => 100,
            JobState::Cancelled | JobState::Error { .. } => pct(self.embedded.max(self.scanned), self.total),
        }
    }
}
