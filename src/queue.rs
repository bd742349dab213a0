//! Job Queue
//!
//! Bounded-concurrency, priority-ordered queue of generation jobs. A single
//! dispatch task pops the best pending entry whenever a slot is free and
//! hands it to a worker task, which runs it through the [`JobRunner`] under
//! the job's deadline and cancel signal. Failed attempts are retried with
//! backoff; every job reaches exactly one terminal outcome, delivered through
//! its callback. Runners report progress through a [`ProgressReporter`] and
//! the latest report shows up on the job's snapshot.

use crate::cancel::CancelSignal;
use crate::config::{RetryBackoff, SchedulerConfig};
use crate::engine::EngineResult;
use crate::error::{EngineError, JobError};
use crate::events::{EventBus, JobEventKind};
use crate::progress::{JobProgress, ProgressReporter};
use crate::request::GenerationSpec;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod job;

pub use job::{JobCallback, JobId, JobOptions, JobOutcome, JobSnapshot, JobState, QueueStats};
use job::{JobRecord, PendingEntry};

/// Executes one attempt of a job
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(
        &self,
        spec: Arc<GenerationSpec>,
        cancel: CancelSignal,
        progress: ProgressReporter,
    ) -> JobOutcome;

    /// Whether an active attempt for `spec` may be interrupted at an await point
    fn supports_cancellation(&self, _spec: &GenerationSpec) -> bool {
        true
    }
}

/// Scheduling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub max_concurrent_jobs: usize,
    pub default_max_attempts: u32,
    pub retry_delay: Duration,
    pub retry_backoff: RetryBackoff,
    pub job_timeout: Option<Duration>,
    pub max_pending_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for QueueConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            default_max_attempts: config.default_max_attempts.max(1),
            retry_delay: config.retry_delay(),
            retry_backoff: config.retry_backoff,
            job_timeout: config.job_timeout(),
            max_pending_jobs: config.max_pending_jobs,
        }
    }
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, JobRecord>,
    pending: BinaryHeap<PendingEntry>,
    /// Jobs in `Pending` state, including those waiting out a retry backoff
    pending_count: usize,
    active: usize,
    completed: usize,
    failed: usize,
    cancelled: usize,
    running: bool,
    /// Set once the owning `JobQueue` is dropped; nothing is queued again
    closed: bool,
    /// Bumped by every start so a superseded dispatcher exits
    epoch: u64,
    dispatcher: Option<JoinHandle<()>>,
    next_seq: u64,
}

struct Inner {
    config: QueueConfig,
    runner: Arc<dyn JobRunner>,
    state: Mutex<QueueState>,
    notify: Notify,
    stats_tx: watch::Sender<QueueStats>,
    events: Option<EventBus>,
}

/// Work handed from the dispatcher to a worker
struct Launch {
    id: JobId,
    spec: Arc<GenerationSpec>,
    cancel: CancelSignal,
    timeout: Option<Duration>,
    attempt: u32,
}

/// What a finished attempt turned into
enum Settlement {
    Terminal {
        state: JobState,
        outcome: JobOutcome,
        callback: Option<JobCallback>,
    },
    Retry {
        delay: Duration,
        error: JobError,
    },
    Orphaned,
}

/// Priority job queue
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new(config: QueueConfig, runner: Arc<dyn JobRunner>) -> Self {
        Self::with_events(config, runner, None)
    }

    pub fn with_events(
        config: QueueConfig,
        runner: Arc<dyn JobRunner>,
        events: Option<EventBus>,
    ) -> Self {
        let stats = QueueStats {
            max_concurrent: config.max_concurrent_jobs,
            ..QueueStats::default()
        };
        let (stats_tx, _) = watch::channel(stats);
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                stats_tx,
                events,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Enqueue a job; `callback` receives its terminal outcome exactly once.
    ///
    /// Fails without creating a job (and without calling `callback`) when the
    /// spec or options are invalid or the pending set is full.
    pub fn submit<F>(
        &self,
        spec: GenerationSpec,
        options: JobOptions,
        callback: F,
    ) -> Result<JobId, JobError>
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        spec.validate()?;
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.inner.config.default_max_attempts);
        if max_attempts == 0 {
            return Err(JobError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if options.timeout == Some(Duration::ZERO) {
            return Err(JobError::Validation("timeout must be positive".to_string()));
        }

        let id = JobId::next();
        let fingerprint = spec.fingerprint();
        let priority = options.priority;
        let queue_size;
        {
            let mut state = self.inner.state.lock();
            if state.pending_count >= self.inner.config.max_pending_jobs {
                warn!(
                    pending = state.pending_count,
                    max_pending = self.inner.config.max_pending_jobs,
                    "Generation queue is full, rejecting job"
                );
                return Err(JobError::QueueFull(state.pending_count));
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let record = JobRecord {
                id,
                seq,
                spec: Arc::new(spec),
                fingerprint,
                priority,
                state: JobState::Pending,
                attempts: 0,
                max_attempts,
                timeout: options.timeout.or(self.inner.config.job_timeout),
                submitted_at: Utc::now(),
                started_at: None,
                completed_at: None,
                callback: Some(Box::new(callback)),
                cancel_requested: false,
                cancel: CancelSignal::new(),
                last_error: None,
                result: None,
                progress: None,
            };
            state.pending.push(record.pending_entry());
            state.jobs.insert(id, record);
            state.pending_count += 1;
            queue_size = state.pending_count;
            self.inner.publish_stats(&state);
        }
        debug!(
            job_id = %id,
            fingerprint = %fingerprint.short(),
            priority,
            max_attempts,
            queue_size,
            "Enqueued generation job"
        );
        self.inner.emit(id, JobEventKind::Submitted, 0, None);
        self.inner.notify.notify_one();
        Ok(id)
    }

    /// Cancel a pending or active job; false when the job is unknown or already terminal
    pub fn cancel(&self, id: JobId) -> bool {
        let callback = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let Some(job) = state.jobs.get_mut(&id) else {
                return false;
            };
            match job.state {
                JobState::Pending => {
                    job.state = JobState::Cancelled;
                    job.completed_at = Some(Utc::now());
                    job.last_error = Some(JobError::Cancelled);
                    let callback = job.callback.take();
                    state.pending.retain(|entry| entry.id != id);
                    state.cancelled += 1;
                    callback
                }
                JobState::Active => {
                    if !job.cancel_requested {
                        job.cancel_requested = true;
                        job.cancel.cancel();
                        debug!(job_id = %id, "Cancellation requested for active job");
                    }
                    return true;
                }
                JobState::Completed | JobState::Failed | JobState::Cancelled => return false,
            }
        };

        info!(job_id = %id, "Cancelled pending job");
        self.inner.emit(id, JobEventKind::Cancelled, 0, None);
        if let Some(callback) = callback {
            callback(Err(JobError::Cancelled));
        }
        self.inner.release_pending(1);
        true
    }

    pub fn status(&self, id: JobId) -> Option<JobSnapshot> {
        self.inner.state.lock().jobs.get(&id).map(JobRecord::snapshot)
    }

    /// Snapshots of every tracked job, oldest first
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let state = self.inner.state.lock();
        let mut snapshots: Vec<JobSnapshot> = state.jobs.values().map(JobRecord::snapshot).collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.stats(&self.inner.state.lock())
    }

    /// Receiver that observes every stats change
    pub fn subscribe_stats(&self) -> watch::Receiver<QueueStats> {
        self.inner.stats_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Start dispatching; idempotent. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.running {
            return;
        }
        state.running = true;
        state.epoch += 1;
        let epoch = state.epoch;
        let inner = Arc::clone(&self.inner);
        state.dispatcher = Some(tokio::spawn(dispatch_loop(inner, epoch)));
        drop(state);
        info!(
            max_concurrent = self.inner.config.max_concurrent_jobs,
            "Job queue started"
        );
    }

    /// Stop dispatching; idempotent.
    ///
    /// Pending jobs stay queued and active attempts run to completion.
    pub async fn stop(&self) {
        let dispatcher = {
            let mut state = self.inner.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.dispatcher.take()
        };
        self.inner.notify.notify_one();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatcher task ended abnormally");
            }
        }
        info!("Job queue stopped");
    }

    /// Drop terminal job records, returning how many were removed
    pub fn clear_completed(&self) -> usize {
        let mut state = self.inner.state.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !job.state.is_terminal());
        let removed = before - state.jobs.len();
        if removed > 0 {
            debug!(removed, "Cleared terminal job records");
        }
        removed
    }

    /// Wait until nothing is pending or active; false if `timeout` elapsed first.
    ///
    /// Returns only after every terminal callback has returned.
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.subscribe_stats();
        let idle = async move { rx.wait_for(QueueStats::is_idle).await.is_ok() };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, idle).await.unwrap_or(false),
            None => idle.await,
        }
    }
}

impl Drop for JobQueue {
    /// Cancels every job that has not finished.
    ///
    /// Pending jobs, including those waiting out a retry backoff, get their
    /// callback here. Active attempts are signalled and report `Cancelled`
    /// when they settle.
    fn drop(&mut self) {
        let drained: Vec<(JobId, Option<JobCallback>)> = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.running = false;
            state.closed = true;
            state.dispatcher = None;
            state.pending.clear();

            let now = Utc::now();
            let mut drained = Vec::new();
            for job in state.jobs.values_mut() {
                match job.state {
                    JobState::Pending => {
                        job.state = JobState::Cancelled;
                        job.completed_at = Some(now);
                        job.last_error = Some(JobError::Cancelled);
                        drained.push((job.id, job.callback.take()));
                    }
                    JobState::Active if !job.cancel_requested => {
                        job.cancel_requested = true;
                        job.cancel.cancel();
                    }
                    _ => {}
                }
            }
            state.cancelled += drained.len();
            drained
        };
        self.inner.notify.notify_one();
        if drained.is_empty() {
            return;
        }

        info!(jobs = drained.len(), "Job queue dropped, cancelling pending jobs");
        let count = drained.len();
        for (id, callback) in drained {
            self.inner.emit(id, JobEventKind::Cancelled, 0, None);
            if let Some(callback) = callback {
                callback(Err(JobError::Cancelled));
            }
        }
        self.inner.release_pending(count);
    }
}

impl Inner {
    fn stats(&self, state: &QueueState) -> QueueStats {
        QueueStats {
            pending: state.pending_count,
            active: state.active,
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
            max_concurrent: self.config.max_concurrent_jobs,
        }
    }

    fn publish_stats(&self, state: &QueueState) {
        self.stats_tx.send_replace(self.stats(state));
    }

    /// Drop `count` cancelled jobs from the pending total once their callbacks have run
    fn release_pending(&self, count: usize) {
        let mut state = self.state.lock();
        state.pending_count = state.pending_count.saturating_sub(count);
        self.publish_stats(&state);
    }

    /// Free the slot of a settled attempt once its callback has run
    fn release_active(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        self.publish_stats(&state);
    }

    /// Keep the latest report of the current attempt
    fn record_progress(&self, id: JobId, attempt: u32, percent: u8, status: &str) {
        {
            let mut state = self.state.lock();
            let Some(job) = state.jobs.get_mut(&id) else {
                return;
            };
            if job.state != JobState::Active || job.attempts != attempt || job.cancel_requested {
                return;
            }
            job.progress = Some(JobProgress::now(percent, status));
        }
        debug!(job_id = %id, attempt, percent, status, "Generation progress");
        self.emit(
            id,
            JobEventKind::Progress,
            attempt,
            Some(format!("{}% {}", percent, status)),
        );
    }

    fn emit(&self, id: JobId, kind: JobEventKind, attempt: u32, detail: Option<String>) {
        if let Some(events) = &self.events {
            events.emit(id.as_u64(), kind, attempt, detail);
        }
    }

    /// Pop as many pending entries as there are free slots; `None` once this dispatcher is retired
    fn take_launches(&self, epoch: u64) -> Option<Vec<Launch>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.running || state.epoch != epoch {
            return None;
        }

        let mut launches = Vec::new();
        while state.active < self.config.max_concurrent_jobs {
            let Some(entry) = state.pending.pop() else {
                break;
            };
            let Some(job) = state.jobs.get_mut(&entry.id) else {
                continue;
            };
            if job.state != JobState::Pending {
                continue;
            }
            job.state = JobState::Active;
            job.started_at = Some(Utc::now());
            job.attempts += 1;
            job.progress = None;
            state.active += 1;
            state.pending_count -= 1;
            launches.push(Launch {
                id: job.id,
                spec: Arc::clone(&job.spec),
                cancel: job.cancel.clone(),
                timeout: job.timeout,
                attempt: job.attempts,
            });
        }
        if !launches.is_empty() {
            self.publish_stats(state);
        }
        Some(launches)
    }

    /// Record the outcome of one attempt and decide what happens next.
    ///
    /// A terminal attempt keeps its slot until [`Inner::release_active`].
    fn settle(&self, id: JobId, outcome: JobOutcome) -> Settlement {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(job) = state.jobs.get_mut(&id) else {
            state.active = state.active.saturating_sub(1);
            self.publish_stats(state);
            return Settlement::Orphaned;
        };

        let (next, outcome) = match outcome {
            _ if job.cancel_requested => (JobState::Cancelled, Err(JobError::Cancelled)),
            Ok(result) => (JobState::Completed, Ok(result)),
            Err(err) if err.is_retryable() && job.attempts < job.max_attempts => {
                job.state = JobState::Pending;
                job.started_at = None;
                job.last_error = Some(err.clone());
                let delay = self
                    .config
                    .retry_backoff
                    .delay(self.config.retry_delay, job.attempts);
                state.active = state.active.saturating_sub(1);
                state.pending_count += 1;
                self.publish_stats(state);
                return Settlement::Retry { delay, error: err };
            }
            Err(err) if err.is_retryable() => (
                JobState::Failed,
                Err(JobError::ExhaustedRetries {
                    attempts: job.attempts,
                    last: Box::new(err),
                }),
            ),
            Err(err) if err.is_cancellation() => (JobState::Cancelled, Err(err)),
            Err(err) => (JobState::Failed, Err(err)),
        };

        job.state = next;
        job.completed_at = Some(Utc::now());
        match &outcome {
            Ok(result) => job.result = Some(result.clone()),
            Err(err) => job.last_error = Some(err.clone()),
        }
        let callback = job.callback.take();
        match next {
            JobState::Completed => state.completed += 1,
            JobState::Cancelled => state.cancelled += 1,
            _ => state.failed += 1,
        }
        Settlement::Terminal {
            state: next,
            outcome,
            callback,
        }
    }

    /// Put a retried job back on the heap unless it was cancelled during backoff
    /// or the queue has been dropped
    fn requeue(&self, id: JobId) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return false;
        }
        match state.jobs.get(&id) {
            Some(job) if job.state == JobState::Pending => {
                let entry = job.pending_entry();
                state.pending.push(entry);
                true
            }
            _ => false,
        }
    }
}

async fn dispatch_loop(inner: Arc<Inner>, epoch: u64) {
    debug!(epoch, "Dispatcher running");
    loop {
        let notified = inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let Some(launches) = inner.take_launches(epoch) else {
            break;
        };
        for launch in launches {
            debug!(
                job_id = %launch.id,
                attempt = launch.attempt,
                prompt = %launch.spec.prompt,
                "Dispatching generation job"
            );
            inner.emit(launch.id, JobEventKind::Dispatched, launch.attempt, None);
            tokio::spawn(run_attempt(Arc::clone(&inner), launch));
        }

        notified.await;
    }
    debug!(epoch, "Dispatcher exited");
}

async fn run_attempt(inner: Arc<Inner>, launch: Launch) {
    let Launch {
        id,
        spec,
        cancel,
        timeout,
        attempt,
    } = launch;
    let cooperative = inner.runner.supports_cancellation(&spec);
    let progress = progress_reporter(Arc::downgrade(&inner), id, attempt);

    let mut task = {
        let runner = Arc::clone(&inner.runner);
        let spec = Arc::clone(&spec);
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run(spec, cancel, progress).await })
    };
    let deadline = async move {
        match timeout {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = tokio::select! {
        joined = &mut task => match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(JobError::Engine(EngineError::Failed(format!(
                "runner task failed: {}",
                e
            )))),
        },
        limit = &mut deadline => {
            // A non-cooperative runner keeps going detached; its result is dropped.
            if cooperative {
                task.abort();
            }
            Err(JobError::Timeout(limit))
        }
        _ = cancel.cancelled(), if cooperative => {
            task.abort();
            Err(JobError::Cancelled)
        }
    };

    match inner.settle(id, outcome) {
        Settlement::Terminal {
            state,
            outcome,
            callback,
        } => {
            match (&state, &outcome) {
                (JobState::Completed, Ok(result)) => {
                    info!(
                        job_id = %id,
                        attempt,
                        engine = %result.engine_used,
                        quality = result.quality_score,
                        "Generation job completed"
                    );
                    inner.emit(
                        id,
                        JobEventKind::Completed,
                        attempt,
                        Some(result.engine_used.to_string()),
                    );
                }
                (JobState::Cancelled, _) => {
                    info!(job_id = %id, attempt, "Generation job cancelled");
                    inner.emit(id, JobEventKind::Cancelled, attempt, None);
                }
                (_, Err(err)) => {
                    error!(job_id = %id, attempt, error = %err, "Generation job failed");
                    inner.emit(id, JobEventKind::Failed, attempt, Some(err.to_string()));
                }
                (_, Ok(_)) => {}
            }
            if let Some(callback) = callback {
                callback(outcome);
            }
            inner.release_active();
            inner.notify.notify_one();
        }
        Settlement::Retry { delay, error } => {
            inner.notify.notify_one();
            warn!(
                job_id = %id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Generation attempt failed, retrying"
            );
            inner.emit(id, JobEventKind::Retrying, attempt, Some(error.to_string()));
            tokio::time::sleep(delay).await;
            if inner.requeue(id) {
                inner.notify.notify_one();
            }
        }
        Settlement::Orphaned => {
            inner.notify.notify_one();
            warn!(job_id = %id, "Attempt finished for a job that is no longer tracked");
        }
    }
}

/// Reporter that records into the job's current attempt
fn progress_reporter(inner: Weak<Inner>, id: JobId, attempt: u32) -> ProgressReporter {
    ProgressReporter::new(move |percent, status| {
        if let Some(inner) = inner.upgrade() {
            inner.record_progress(id, attempt, percent, status);
        }
    })
}
