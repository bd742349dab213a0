//! Progress reporting from engines back to the job queue.
//!
//! A [`ProgressReporter`] is handed to every attempt next to its cancel
//! signal. Engines call [`ProgressReporter::report`] with a percentage and a
//! short status; the queue keeps the latest value on the job record and
//! emits a `progress` event. A wrapping engine hands its base a
//! [`ProgressReporter::scaled`] copy so the base's 0..=100 maps onto a slice
//! of the outer range.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub type ProgressSink = Arc<dyn Fn(u8, &str) + Send + Sync>;

/// Latest progress recorded for a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub percent: u8,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    pub fn now(percent: u8, status: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            status: status.into(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct ProgressReporter {
    sink: Option<ProgressSink>,
    start: u8,
    end: u8,
}

impl ProgressReporter {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(u8, &str) + Send + Sync + 'static,
    {
        Self {
            sink: Some(Arc::new(sink)),
            start: 0,
            end: 100,
        }
    }

    /// Reporter that drops every update
    pub fn disabled() -> Self {
        Self {
            sink: None,
            start: 0,
            end: 100,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Report `percent` (clamped to 100) of this reporter's range
    pub fn report(&self, percent: u8, status: &str) {
        if let Some(sink) = &self.sink {
            sink(self.map(percent), status);
        }
    }

    /// Reporter whose 0..=100 covers `start..=end` of this one
    pub fn scaled(&self, start: u8, end: u8) -> Self {
        let (start, end) = (start.min(100), end.min(100).max(start.min(100)));
        Self {
            sink: self.sink.clone(),
            start: self.map(start),
            end: self.map(end),
        }
    }

    fn map(&self, percent: u8) -> u8 {
        let span = u32::from(self.end - self.start);
        let offset = span * u32::from(percent.min(100)) / 100;
        self.start + offset as u8
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.is_enabled())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}
