//! End-to-end lifecycle tests through the `Agent` facade.


use std::path::{Path, PathBuf};
use std::time::Duration;

use test_harness::{
    sh, CallbackSink, MediaServer, TestAgent, UploadSink, TEST_CALLBACK_KEY, TEST_WARMUP,
};

use stream_agent::error::AgentError;
use stream_agent::jobs::{CallbackTarget, JobStatus};

/// Script that stays alive only while its staged input (`$1`) exists.
const NEEDS_INPUT: &str = r#"test -f "$1" || exit 9; sleep 30"#;

#[tokio::test]
async fn test_start_stages_input_and_goes_live() {
    let t = TestAgent::new();
    let media = MediaServer::start().await;
    let sink = CallbackSink::start().await;

    let argv = sh(NEEDS_INPUT, &["-i", media.url("a.mp4").as_str()]);
    let job_id = t.agent.start_job(7, &argv, sink.target()).await.unwrap();

    let record = t.agent.registry().get(job_id).await.unwrap();
    assert_eq!(record.stream_id, 7);
    let staged_input = record.staging_dir.join("a.mp4");
    assert_eq!(std::fs::read_to_string(&staged_input).unwrap(), "media-a.mp4");

    assert!(sink.wait_for_events(7, 1, Duration::from_secs(3)).await);
    assert_eq!(sink.statuses(7), vec![JobStatus::Live]);
    assert!(t.agent.registry().contains(job_id).await);

    // Killed from outside the agent.
    std::process::Command::new("kill")
        .args(["-9".to_string(), job_id.to_string()])
        .status()
        .unwrap();

    assert!(sink.wait_for_events(7, 2, Duration::from_secs(3)).await);
    assert_eq!(sink.statuses(7), vec![JobStatus::Live, JobStatus::Error]);
    assert!(!t.agent.registry().contains(job_id).await);
    assert!(!record.staging_dir.exists());
}

#[tokio::test]
async fn test_unstageable_command_never_launches() {
    let t = TestAgent::new();
    let media = MediaServer::start().await;
    let sink = CallbackSink::start().await;
    let marker = t.staging.path().join("launched");

    let script = format!("touch {}; sleep 30", marker.display());
    let argv = sh(&script, &["-i", media.url("missing").as_str()]);
    let err = t.agent.start_job(1, &argv, sink.target()).await.unwrap_err();

    assert!(matches!(err, AgentError::Staging { .. }));
    assert_eq!(t.agent.registry().len().await, 0);
    assert_eq!(t.staged_dirs(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!marker.exists());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_launch_failure_tears_down_staging() {
    let t = TestAgent::new();
    let media = MediaServer::start().await;
    let sink = CallbackSink::start().await;

    let argv = vec![
        "no_such_media_binary_1234".to_string(),
        "-i".to_string(),
        media.url("a.mp4"),
    ];
    let err = t.agent.start_job(1, &argv, sink.target()).await.unwrap_err();

    assert!(matches!(err, AgentError::Launch { .. }));
    assert_eq!(t.agent.registry().len().await, 0);
    assert_eq!(t.staged_dirs(), 0);
}

#[tokio::test]
async fn test_multiple_jobs_per_stream_and_stop() {
    let t = TestAgent::new();
    let sink = CallbackSink::start().await;

    for _ in 0..3 {
        t.agent
            .start_job(5, &sh("sleep 30", &[]), sink.target())
            .await
            .unwrap();
    }
    t.agent
        .start_job(6, &sh("sleep 30", &[]), sink.target())
        .await
        .unwrap();

    let health = t.agent.health().await;
    assert_eq!(health.running_streams, vec![5, 6]);
    assert_eq!(health.process_count, 4);

    assert_eq!(t.agent.stop_job(5).await, 3);
    assert!(t.agent.registry().find_by_stream(5).await.is_empty());
    assert_eq!(t.agent.stop_job(5).await, 0);

    let health = t.agent.health().await;
    assert_eq!(health.running_streams, vec![6]);
    assert_eq!(health.process_count, 1);

    assert_eq!(t.agent.shutdown().await, 1);
    assert_eq!(t.staged_dirs(), 0);
}

#[tokio::test]
async fn test_early_failure_reports_error_only() {
    let t = TestAgent::new();
    let sink = CallbackSink::start().await;

    let job_id = t
        .agent
        .start_job(11, &sh("exit 1", &[]), sink.target())
        .await
        .unwrap();

    assert!(sink.wait_for_events(11, 1, Duration::from_secs(3)).await);
    assert!(!t.agent.registry().contains(job_id).await);
    tokio::time::sleep(TEST_WARMUP).await;
    assert_eq!(sink.statuses(11), vec![JobStatus::Error]);
    assert_eq!(t.staged_dirs(), 0);
}

#[tokio::test]
async fn test_thumbnail_runs_and_uploads() {
    let t = TestAgent::new();
    let media = MediaServer::start().await;
    let upload = UploadSink::start().await;

    // Copies the staged input to the output path given as the last argument.
    let argv = sh(
        r#"cp "$1" "$2""#,
        &["-i", media.url("frame.jpg").as_str(), "thumb.jpg"],
    );
    let target = CallbackTarget {
        url: upload.url.clone(),
        key: TEST_CALLBACK_KEY.to_string(),
    };
    t.agent.generate_thumbnail(3, &argv, target).await.unwrap();

    let uploads = upload.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].body, b"media-frame.jpg");
    assert_eq!(uploads[0].key.as_deref(), Some(TEST_CALLBACK_KEY));
    assert_eq!(uploads[0].stream_id.as_deref(), Some("3"));
    assert_eq!(t.staged_dirs(), 0);
}

#[tokio::test]
async fn test_thumbnail_command_failure() {
    let t = TestAgent::new();
    let upload = UploadSink::start().await;

    let target = CallbackTarget {
        url: upload.url.clone(),
        key: TEST_CALLBACK_KEY.to_string(),
    };
    let err = t
        .agent
        .generate_thumbnail(3, &sh("exit 5", &["out.jpg"]), target)
        .await
        .unwrap_err();

    match err {
        AgentError::Runtime { outcome } => assert_eq!(outcome.code, Some(5)),
        other => panic!("unexpected error: {other}"),
    }
    assert!(upload.uploads().is_empty());
    assert_eq!(t.staged_dirs(), 0);
}

#[tokio::test]
async fn test_thumbnail_timeout_is_failure() {
    let t = TestAgent::with_config(|c| c.oneshot_timeout = Duration::from_millis(300));
    let upload = UploadSink::start().await;

    let target = CallbackTarget {
        url: upload.url.clone(),
        key: TEST_CALLBACK_KEY.to_string(),
    };
    let err = t
        .agent
        .generate_thumbnail(3, &sh("sleep 10", &["out.jpg"]), target)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Timeout(_)));
    assert!(upload.uploads().is_empty());
}

#[tokio::test]
async fn test_test_run_missing_binary() {
    let t = TestAgent::with_config(|c| c.binary = "no_such_media_binary_1234".to_string());

    let err = t.agent.test_run().await.unwrap_err();
    assert!(matches!(err, AgentError::Launch { .. }));
}

#[tokio::test]
async fn test_staging_dir_is_private_per_job() {
    let t = TestAgent::new();
    let media = MediaServer::start().await;
    let sink = CallbackSink::start().await;

    let argv = sh(NEEDS_INPUT, &["-i", media.url("a.mp4").as_str()]);
    let first = t.agent.start_job(2, &argv, sink.target()).await.unwrap();
    let second = t.agent.start_job(2, &argv, sink.target()).await.unwrap();

    let a = t.agent.registry().get(first).await.unwrap().staging_dir;
    let b = t.agent.registry().get(second).await.unwrap().staging_dir;
    assert_ne!(a, b);
    assert!(a.starts_with(t.staging.path()));
    assert!(Path::new(&b).join("a.mp4").exists());

    assert_eq!(t.agent.stop_job(2).await, 2);
    assert!(!a.exists());
    assert!(!b.exists());
}

#[tokio::test]
async fn test_thumbnail_with_relative_staging_dir() {
    let relative = PathBuf::from(format!("target/agent-staging-{}", uuid::Uuid::new_v4()));
    let t = TestAgent::with_config(|c| c.staging_dir = relative.clone());
    let media = MediaServer::start().await;
    let upload = UploadSink::start().await;

    // Runs inside the staging directory, so the staged input must be absolute.
    let argv = sh(
        r#"cp "$1" "$2""#,
        &["-i", media.url("frame.jpg").as_str(), "thumb.jpg"],
    );
    let target = CallbackTarget {
        url: upload.url.clone(),
        key: TEST_CALLBACK_KEY.to_string(),
    };
    t.agent.generate_thumbnail(4, &argv, target).await.unwrap();

    let uploads = upload.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].body, b"media-frame.jpg");
    assert_eq!(std::fs::read_dir(&relative).unwrap().count(), 0);

    std::fs::remove_dir_all(&relative).unwrap();
}

#[tokio::test]
async fn test_start_racing_stop_stays_consistent() {
    let t = TestAgent::new();
    let sink = CallbackSink::start().await;
    let argv = sh("sleep 30", &[]);

    let first = t.agent.start_job(9, &argv, sink.target()).await.unwrap();

    let (started, stopped) = tokio::join!(
        t.agent.start_job(9, &argv, sink.target()),
        t.agent.stop_job(9),
    );
    let second = started.unwrap();
    let first_record_gone = !t.agent.registry().contains(first).await;

    // The earlier job is always stopped; the racing one may or may not be.
    assert!(first_record_gone);
    assert!(stopped == 1 || stopped == 2);
    let remaining = t.agent.registry().find_by_stream(9).await;
    if stopped == 2 {
        assert!(remaining.is_empty());
    } else {
        assert_eq!(remaining, vec![second]);
    }
    assert_eq!(stopped + remaining.len(), 2);

    // Whatever survived is stopped by the next request, and nothing twice.
    assert_eq!(t.agent.stop_job(9).await, 2 - stopped);
    assert_eq!(t.agent.stop_job(9).await, 0);
    assert!(t.agent.registry().is_empty().await);
    assert_eq!(t.staged_dirs(), 0);
}
