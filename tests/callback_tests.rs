
use std::time::{Duration, Instant};

use test_harness::{fast_retry, CallbackSink, TEST_CALLBACK_KEY};

use stream_agent::callback::{CallbackNotifier, RetryPolicy};
use stream_agent::jobs::{CallbackTarget, JobStatus};

#[tokio::test]
async fn test_notify_delivers_event_with_key() {
    let sink = CallbackSink::start().await;
    let notifier = CallbackNotifier::new(fast_retry());

    let delivered = notifier
        .notify(&sink.target(), 42, JobStatus::Live, "Stream is now live.")
        .await;

    assert!(delivered);
    assert_eq!(sink.attempts(), 1);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].stream_id, 42);
    assert_eq!(events[0].status, JobStatus::Live);
    assert_eq!(events[0].details, "Stream is now live.");
    assert_eq!(sink.keys(), vec![Some(TEST_CALLBACK_KEY.to_string())]);
}

#[tokio::test]
async fn test_notify_retries_until_accepted() {
    let sink = CallbackSink::failing(2).await;
    let notifier = CallbackNotifier::new(fast_retry());

    let delivered = notifier
        .notify(&sink.target(), 1, JobStatus::Idle, "done")
        .await;

    assert!(delivered);
    assert_eq!(sink.attempts(), 3);
    assert_eq!(sink.statuses(1), vec![JobStatus::Idle]);
}

#[tokio::test]
async fn test_notify_gives_up_after_max_attempts() {
    let sink = CallbackSink::failing(10).await;
    let policy = RetryPolicy {
        retry_delay: Duration::from_millis(100),
        ..fast_retry()
    };
    let notifier = CallbackNotifier::new(policy);

    let started = Instant::now();
    let delivered = notifier
        .notify(&sink.target(), 1, JobStatus::Error, "boom")
        .await;

    assert!(!delivered);
    assert_eq!(sink.attempts(), 3);
    assert!(sink.events().is_empty());
    // Two pauses between three attempts.
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_notify_unreachable_controller_returns_false() {
    let notifier = CallbackNotifier::new(RetryPolicy {
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
        attempt_timeout: Duration::from_millis(500),
    });
    let target = CallbackTarget {
        url: "http://127.0.0.1:1/callback".to_string(),
        key: "k".to_string(),
    };

    assert!(!notifier.notify(&target, 9, JobStatus::Live, "").await);
}

#[test]
fn test_default_policy_constants() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.retry_delay, Duration::from_secs(2));
    assert_eq!(policy.attempt_timeout, Duration::from_secs(10));
}
