//! Integration tests for the Job Queue
//!
//! Tests cover:
//! - Priority ordering with FIFO tie-break
//! - Concurrency bound
//! - Retry until success and retry exhaustion
//! - Cancellation while pending, active and backing off
//! - Per-job deadlines, cooperative or not
//! - Exactly-once callbacks and lifecycle events
//! - Dropping a queue with unfinished jobs

use crate::integration::test_utils::{
    fast_queue_config, recording_callback, FlakyRunner, RecordingRunner, SlowRunner,
};
use forge_scheduler::error::{EngineError, JobError};
use forge_scheduler::events::{EventBus, JobEventKind};
use forge_scheduler::queue::{JobId, JobOptions, JobQueue, JobState};
use forge_scheduler::request::GenerationSpec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn wait_for_state(queue: &JobQueue, id: JobId, state: JobState) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if queue.status(id).map(|s| s.state) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "job {} never reached {}", id, state);
}

#[tokio::test]
async fn test_priority_then_fifo_dispatch() {
    let runner = Arc::new(RecordingRunner::new(Duration::from_millis(30)));
    let (bus, events) = EventBus::new_pair();
    let queue = JobQueue::with_events(fast_queue_config(2), runner.clone(), Some(bus));

    let a = queue
        .submit(GenerationSpec::new("A"), JobOptions::default().with_priority(5), |_| {})
        .unwrap();
    let b = queue
        .submit(GenerationSpec::new("B"), JobOptions::default().with_priority(1), |_| {})
        .unwrap();
    let c = queue
        .submit(GenerationSpec::new("C"), JobOptions::default().with_priority(1), |_| {})
        .unwrap();

    queue.start();
    assert!(queue.wait_idle(Some(Duration::from_secs(5))).await);

    let order = runner.order();
    let mut first_two = order[..2].to_vec();
    first_two.sort();
    assert_eq!(first_two, vec!["B", "C"]);
    assert_eq!(order[2], "A");
    assert_eq!(runner.peak.load(Ordering::SeqCst), 2);

    let dispatched: Vec<u64> = events
        .try_iter()
        .filter(|e| e.kind == JobEventKind::Dispatched)
        .map(|e| e.job_id)
        .collect();
    assert_eq!(dispatched, vec![b.as_u64(), c.as_u64(), a.as_u64()]);
    queue.stop().await;
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let runner = Arc::new(RecordingRunner::new(Duration::from_millis(10)));
    let queue = JobQueue::new(fast_queue_config(3), runner.clone());
    for i in 0..10 {
        queue
            .submit(GenerationSpec::new(format!("crate {}", i)), JobOptions::default(), |_| {})
            .unwrap();
    }
    queue.start();
    assert!(queue.wait_idle(Some(Duration::from_secs(5))).await);

    assert!(runner.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(runner.order().len(), 10);
    let stats = queue.stats();
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.max_concurrent, 3);
    queue.stop().await;
}

#[tokio::test]
async fn test_retry_until_third_attempt_succeeds() {
    let runner = Arc::new(FlakyRunner::new(
        2,
        JobError::Engine(EngineError::Request("connection reset".into())),
    ));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(
            GenerationSpec::new("lamp post"),
            JobOptions::default().with_max_attempts(3),
            callback,
        )
        .unwrap();
    queue.start();

    let outcome = outcomes.recv().await.unwrap();
    assert!(outcome.is_ok());
    let snapshot = queue.status(id).unwrap();
    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(snapshot.attempts, 3);
    assert_eq!(runner.calls(), 3);

    assert!(queue.wait_idle(Some(Duration::from_secs(1))).await);
    assert!(outcomes.try_recv().is_err());
    queue.stop().await;
}

#[tokio::test]
async fn test_retries_exhausted() {
    let runner = Arc::new(FlakyRunner::new(
        usize::MAX,
        JobError::Engine(EngineError::RateLimit("429".into())),
    ));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(
            GenerationSpec::new("lamp post"),
            JobOptions::default().with_max_attempts(2),
            callback,
        )
        .unwrap();
    queue.start();

    match outcomes.recv().await.unwrap() {
        Err(JobError::ExhaustedRetries { attempts, last }) => {
            assert_eq!(attempts, 2);
            assert_eq!(*last, JobError::Engine(EngineError::RateLimit("429".into())));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let snapshot = queue.status(id).unwrap();
    assert_eq!(snapshot.state, JobState::Failed);
    assert!(snapshot.last_error.is_some());
    assert_eq!(runner.calls(), 2);
    assert_eq!(queue.stats().failed, 1);
    queue.stop().await;
}

#[tokio::test]
async fn test_terminal_error_is_not_retried() {
    let runner = Arc::new(FlakyRunner::new(
        usize::MAX,
        JobError::Validation("unsupported reference image".into()),
    ));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    queue
        .submit(GenerationSpec::new("lamp post"), JobOptions::default(), callback)
        .unwrap();
    queue.start();

    assert!(matches!(
        outcomes.recv().await.unwrap(),
        Err(JobError::Validation(_))
    ));
    assert_eq!(runner.calls(), 1);
    queue.stop().await;
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    let runner = Arc::new(RecordingRunner::new(Duration::from_millis(1)));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(GenerationSpec::new("barrel"), JobOptions::default(), callback)
        .unwrap();

    assert!(queue.cancel(id));
    assert_eq!(outcomes.recv().await.unwrap().unwrap_err(), JobError::Cancelled);

    queue.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let snapshot = queue.status(id).unwrap();
    assert_eq!(snapshot.state, JobState::Cancelled);
    assert_eq!(snapshot.attempts, 0);
    assert!(snapshot.started_at.is_none());
    assert!(runner.order().is_empty());
    assert!(outcomes.try_recv().is_err());
    assert!(!queue.cancel(id));
    queue.stop().await;
}

#[tokio::test]
async fn test_cancel_active_cooperative_job() {
    let runner = Arc::new(SlowRunner::new(Duration::from_secs(30), true));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(GenerationSpec::new("windmill"), JobOptions::default(), callback)
        .unwrap();
    queue.start();
    wait_for_state(&queue, id, JobState::Active).await;

    assert!(queue.cancel(id));
    let outcome = tokio::time::timeout(Duration::from_secs(1), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.unwrap_err(), JobError::Cancelled);
    assert_eq!(queue.status(id).unwrap().state, JobState::Cancelled);
    assert_eq!(runner.finished.load(Ordering::SeqCst), 0);
    queue.stop().await;
}

#[tokio::test]
async fn test_cancel_active_non_cooperative_job_discards_result() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(50), false));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(GenerationSpec::new("windmill"), JobOptions::default(), callback)
        .unwrap();
    queue.start();
    wait_for_state(&queue, id, JobState::Active).await;

    assert!(queue.cancel(id));
    assert!(queue.status(id).unwrap().cancel_requested);
    assert_eq!(outcomes.recv().await.unwrap().unwrap_err(), JobError::Cancelled);
    assert_eq!(runner.finished.load(Ordering::SeqCst), 1);
    assert_eq!(queue.status(id).unwrap().state, JobState::Cancelled);

    assert!(queue.wait_idle(Some(Duration::from_secs(1))).await);
    assert!(outcomes.try_recv().is_err());
    queue.stop().await;
}

#[tokio::test]
async fn test_cancel_during_retry_backoff() {
    let runner = Arc::new(FlakyRunner::new(
        1,
        JobError::Engine(EngineError::Request("flaky".into())),
    ));
    let config = forge_scheduler::queue::QueueConfig {
        retry_delay: Duration::from_millis(200),
        ..fast_queue_config(1)
    };
    let queue = JobQueue::new(config, runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(GenerationSpec::new("anvil"), JobOptions::default(), callback)
        .unwrap();
    queue.start();

    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if runner.calls() == 1
                && queue.status(id).map(|s| s.state) == Some(JobState::Pending)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(result.is_ok());

    assert!(queue.cancel(id));
    assert_eq!(outcomes.recv().await.unwrap().unwrap_err(), JobError::Cancelled);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runner.calls(), 1);
    assert_eq!(queue.stats().pending, 0);
    queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_attempt_deadline() {
    let runner = Arc::new(SlowRunner::new(Duration::from_secs(60), true));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    queue
        .submit(
            GenerationSpec::new("castle"),
            JobOptions::default()
                .with_max_attempts(2)
                .with_timeout(Duration::from_millis(20)),
            callback,
        )
        .unwrap();
    queue.start();

    match outcomes.recv().await.unwrap() {
        Err(JobError::ExhaustedRetries { attempts, last }) => {
            assert_eq!(attempts, 2);
            assert_eq!(*last, JobError::Timeout(Duration::from_millis(20)));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(runner.finished.load(Ordering::SeqCst), 0);
    queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_cooperative_deadline_discards_late_result() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(200), false));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(
            GenerationSpec::new("clock tower"),
            JobOptions::default()
                .with_max_attempts(1)
                .with_timeout(Duration::from_millis(20)),
            callback,
        )
        .unwrap();
    queue.start();

    match outcomes.recv().await.unwrap() {
        Err(JobError::ExhaustedRetries { attempts, last }) => {
            assert_eq!(attempts, 1);
            assert_eq!(*last, JobError::Timeout(Duration::from_millis(20)));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(runner.finished.load(Ordering::SeqCst), 0);

    // The detached attempt finishes later; its result and progress are dropped
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(runner.finished.load(Ordering::SeqCst), 1);
    assert!(outcomes.try_recv().is_err());
    let snapshot = queue.status(id).unwrap();
    assert_eq!(snapshot.state, JobState::Failed);
    assert!(snapshot.engine_used.is_none());
    assert_eq!(snapshot.progress.map(|p| p.percent), Some(10));
    assert_eq!(queue.stats().failed, 1);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_idle_returns_after_callbacks() {
    let runner = Arc::new(RecordingRunner::new(Duration::from_millis(1)));
    let queue = JobQueue::new(fast_queue_config(2), runner);
    let delivered = Arc::new(AtomicUsize::new(0));
    for i in 0..4 {
        let delivered = Arc::clone(&delivered);
        queue
            .submit(
                GenerationSpec::new(format!("barrel {}", i)),
                JobOptions::default(),
                move |_| {
                    std::thread::sleep(Duration::from_millis(20));
                    delivered.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();
    }
    queue.start();

    assert!(queue.wait_idle(Some(Duration::from_secs(5))).await);
    assert_eq!(delivered.load(Ordering::SeqCst), 4);
    assert_eq!(queue.stats().completed, 4);
    queue.stop().await;
}

#[tokio::test]
async fn test_drop_cancels_pending_jobs() {
    let runner = Arc::new(RecordingRunner::new(Duration::from_millis(1)));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    queue
        .submit(GenerationSpec::new("crate"), JobOptions::default(), callback)
        .unwrap();
    let stats = queue.subscribe_stats();

    drop(queue);
    assert_eq!(outcomes.recv().await.unwrap().unwrap_err(), JobError::Cancelled);
    assert!(outcomes.recv().await.is_none());
    let stats = *stats.borrow();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.cancelled, 1);
    assert!(runner.order().is_empty());
}

#[tokio::test]
async fn test_drop_cancels_job_in_retry_backoff() {
    let runner = Arc::new(FlakyRunner::new(
        usize::MAX,
        JobError::Engine(EngineError::Request("flaky".into())),
    ));
    let config = forge_scheduler::queue::QueueConfig {
        retry_delay: Duration::from_millis(100),
        ..fast_queue_config(1)
    };
    let queue = JobQueue::new(config, runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(
            GenerationSpec::new("anvil"),
            JobOptions::default().with_max_attempts(3),
            callback,
        )
        .unwrap();
    queue.start();
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while runner.calls() == 0 || queue.status(id).map(|s| s.state) != Some(JobState::Pending) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(result.is_ok());

    drop(queue);
    assert_eq!(outcomes.recv().await.unwrap().unwrap_err(), JobError::Cancelled);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(runner.calls(), 1);
    assert!(outcomes.try_recv().is_err());
}

#[tokio::test]
async fn test_drop_cancels_active_job() {
    let runner = Arc::new(SlowRunner::new(Duration::from_secs(30), true));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    let (callback, mut outcomes) = recording_callback();
    let id = queue
        .submit(GenerationSpec::new("windmill"), JobOptions::default(), callback)
        .unwrap();
    queue.start();
    wait_for_state(&queue, id, JobState::Active).await;

    drop(queue);
    let outcome = tokio::time::timeout(Duration::from_secs(1), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.unwrap_err(), JobError::Cancelled);
    assert_eq!(runner.finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lifecycle_events() {
    let runner = Arc::new(FlakyRunner::new(
        1,
        JobError::Engine(EngineError::Timeout("slow".into())),
    ));
    let (bus, events) = EventBus::new_pair();
    let queue = JobQueue::with_events(fast_queue_config(1), runner, Some(bus));
    let (callback, mut outcomes) = recording_callback();
    queue
        .submit(GenerationSpec::new("bench"), JobOptions::default(), callback)
        .unwrap();
    queue.start();
    assert!(outcomes.recv().await.unwrap().is_ok());

    let kinds: Vec<JobEventKind> = events.try_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            JobEventKind::Submitted,
            JobEventKind::Dispatched,
            JobEventKind::Retrying,
            JobEventKind::Dispatched,
            JobEventKind::Completed,
        ]
    );
    queue.stop().await;
}

#[tokio::test]
async fn test_stop_keeps_pending_jobs() {
    let runner = Arc::new(RecordingRunner::new(Duration::from_millis(1)));
    let queue = JobQueue::new(fast_queue_config(1), runner.clone());
    queue.start();
    queue.stop().await;
    assert!(!queue.is_running());

    let id = queue
        .submit(GenerationSpec::new("crate"), JobOptions::default(), |_| {})
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.status(id).unwrap().state, JobState::Pending);

    queue.start();
    wait_for_state(&queue, id, JobState::Completed).await;
    assert_eq!(queue.clear_completed(), 1);
    assert!(queue.status(id).is_none());
    assert_eq!(queue.stats().completed, 1);
    queue.stop().await;
}
