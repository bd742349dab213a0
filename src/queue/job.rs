//! Job records, snapshots and the pending-heap ordering.

use crate::cancel::CancelSignal;
use crate::engine::{EngineKind, EngineResult};
use crate::error::JobError;
use crate::progress::JobProgress;
use crate::request::{Fingerprint, GenerationSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

/// Opaque, process-unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        JobId(COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-submission scheduling options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobOptions {
    /// Lower values are dispatched first
    pub priority: i32,
    /// Falls back to the queue default when `None`
    pub max_attempts: Option<u32>,
    /// Per-attempt deadline; falls back to the queue default when `None`
    pub timeout: Option<Duration>,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub type JobOutcome = Result<EngineResult, JobError>;

/// Invoked exactly once with the terminal outcome
pub type JobCallback = Box<dyn FnOnce(JobOutcome) + Send + 'static>;

pub(crate) struct JobRecord {
    pub(crate) id: JobId,
    pub(crate) seq: u64,
    pub(crate) spec: Arc<GenerationSpec>,
    pub(crate) fingerprint: Fingerprint,
    pub(crate) priority: i32,
    pub(crate) state: JobState,
    pub(crate) attempts: u32,
    pub(crate) max_attempts: u32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) callback: Option<JobCallback>,
    pub(crate) cancel_requested: bool,
    pub(crate) cancel: CancelSignal,
    pub(crate) last_error: Option<JobError>,
    pub(crate) result: Option<EngineResult>,
    /// Latest report from the current attempt
    pub(crate) progress: Option<JobProgress>,
}

impl JobRecord {
    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            fingerprint: self.fingerprint.to_string(),
            prompt: self.spec.prompt.clone(),
            priority: self.priority,
            state: self.state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancel_requested: self.cancel_requested,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
            engine_used: self.result.as_ref().map(|r| r.engine_used),
            quality_score: self.result.as_ref().map(|r| r.quality_score),
            progress: self.progress.clone(),
        }
    }

    pub(crate) fn pending_entry(&self) -> PendingEntry {
        PendingEntry {
            priority: self.priority,
            seq: self.seq,
            id: self.id,
        }
    }
}

/// Point-in-time view of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub fingerprint: String,
    pub prompt: String,
    pub priority: i32,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub last_error: Option<String>,
    pub engine_used: Option<EngineKind>,
    pub quality_score: Option<f32>,
    pub progress: Option<JobProgress>,
}

/// Counters published on every transition.
///
/// `completed`, `failed` and `cancelled` are totals since construction and
/// are not reset by `clear_completed`. A job leaves `pending`/`active` only
/// after its terminal callback has returned, so an idle snapshot implies
/// every callback has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_concurrent: usize,
}

impl QueueStats {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.active == 0
    }
}

/// Heap entry; the max-heap pops the lowest priority value, then the oldest submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingEntry {
    pub(crate) priority: i32,
    pub(crate) seq: u64,
    pub(crate) id: JobId,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
