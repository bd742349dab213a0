//! In-process bus for job lifecycle events.
//!
//! Emission is best-effort: a dropped receiver never affects scheduling.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Submitted,
    Dispatched,
    /// An engine reported a new stage; `detail` is `"<percent>% <status>"`
    Progress,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub ts: String,
    pub job_id: u64,
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobEvent {
    pub fn with_now(job_id: u64, kind: JobEventKind, attempt: u32, detail: Option<String>) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            job_id,
            kind,
            attempt,
            detail,
        }
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: Sender<JobEvent>,
}

impl EventBus {
    pub fn new_pair() -> (Self, Receiver<JobEvent>) {
        let (sender, receiver) = channel();
        (Self { sender }, receiver)
    }

    /// Returns false once the receiver is gone
    pub fn emit(
        &self,
        job_id: u64,
        kind: JobEventKind,
        attempt: u32,
        detail: Option<String>,
    ) -> bool {
        self.sender
            .send(JobEvent::with_now(job_id, kind, attempt, detail))
            .is_ok()
    }
}
