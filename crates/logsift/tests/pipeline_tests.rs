//! End-to-end tests: files go through the queue and worker pool into the
//! result store.

mod common;

use std::path::Path;
use std::time::Duration;

use common::{ConfigBuilder, LogFileBuilder, TestHarness};
use logsift::{JobEventKind, JobState, LogProcessor, RecordStatus, ResultStore};

#[test]
fn test_single_file_end_to_end() {
    let harness = TestHarness::with_config(
        ConfigBuilder::new()
            .keywords(&["security", "breach", "timeout"])
            .chunk_size(16)
            .build(),
    );

    let content = LogFileBuilder::new()
        .entry_with_ip("2023-05-15T14:30:45.123Z", "ERROR", "Failed to authenticate user", "192.168.1.1")
        .entry("2023-05-15T14:30:46.000Z", "WARN", "security token near expiry")
        .blank()
        .raw("This is just some text without proper log format")
        .raw(r#"[2023-05-15T14:31:00Z] ERROR upstream timeout {"error": "timeout", "attempts": 3,}"#)
        .entry_with_ip("2023-05-15T14:31:05Z", "INFO", "possible breach blocked", "10.0.0.9")
        .crlf()
        .build();

    let job_id = harness.submit("app.log", &content);
    let pool = harness.start_pool();
    let counts = harness.drain();
    pool.shutdown();
    pool.wait();

    assert_eq!(counts.completed, 1);
    let record = harness.store.find(&job_id).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.user_id.as_deref(), Some("test-user"));
    assert_eq!(record.file_name.as_deref(), Some("app.log"));
    assert_eq!(record.stats.total_entries, 5);
    assert_eq!(record.stats.error_count, 2);
    assert_eq!(record.stats.warning_count, 1);
    assert_eq!(record.stats.ip_addresses, vec!["192.168.1.1", "10.0.0.9"]);
    assert_eq!(record.stats.keyword_count("security"), 1);
    assert_eq!(record.stats.keyword_count("breach"), 1);
    assert_eq!(record.stats.keyword_count("timeout"), 1);
    assert_eq!(record.metadata["attempts"], 1);

    let job = harness.queue.get(&job_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
}

#[test]
fn test_pool_result_matches_direct_processing() {
    let harness = TestHarness::with_config(ConfigBuilder::new().keywords(&["db"]).chunk_size(3).build());

    let mut builder = LogFileBuilder::new();
    for i in 0..200 {
        let level = ["INFO", "WARN", "ERROR", "DEBUG"][i % 4];
        builder = builder.entry_with_ip(
            &format!("2024-02-01T00:00:{:02}Z", i % 60),
            level,
            &format!("request {} hit db shard {}", i, i % 7),
            &format!("10.0.{}.{}", i % 3, i % 250),
        );
    }
    let content = builder.build();

    let job_id = harness.submit("big.log", &content);
    let pool = harness.start_pool();
    harness.drain();
    pool.shutdown();
    pool.wait();

    let expected = LogProcessor::new(&["db".to_string()], 64 * 1024)
        .process_reader(content.as_bytes(), "direct", &logsift::processor::NoopProgress)
        .unwrap();
    let record = harness.store.find(&job_id).unwrap().unwrap();
    assert_eq!(record.stats, expected);
    assert_eq!(record.stats.total_entries, 200);
}

#[test]
fn test_small_files_are_served_first() {
    let harness = TestHarness::with_config(ConfigBuilder::new().worker_concurrency(1).build());

    let big = harness.queue.enqueue("/nonexistent/big.log", "u", "big.log", 5_000_000).unwrap();
    let small = harness.queue.enqueue("/nonexistent/small.log", "u", "small.log", 50).unwrap();
    let medium = harness.queue.enqueue("/nonexistent/medium.log", "u", "medium.log", 5_000).unwrap();

    let order: Vec<String> = std::iter::from_fn(|| harness.queue.lease().unwrap())
        .map(|job| job.id)
        .collect();
    assert_eq!(order, vec![small, medium, big]);
}

#[test]
fn test_missing_file_fails_with_error_metadata() {
    let harness = TestHarness::with_config(ConfigBuilder::new().max_attempts(3).build());
    let mut failures = harness.events.subscribe();

    let job_id = harness
        .queue
        .enqueue("/nonexistent/logsift/gone.log", "test-user", "gone.log", 10)
        .unwrap();
    let pool = harness.start_pool();
    let counts = harness.drain();
    pool.shutdown();
    pool.wait();

    assert_eq!(counts.failed, 1);
    let job = harness.queue.get(&job_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);

    let record = harness.store.find(&job_id).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert!(record.metadata["error"].as_str().unwrap().contains("gone.log"));
    assert_eq!(record.metadata["attempts"], 3);
    assert_eq!(record.stats.total_entries, 0);

    let kinds: Vec<JobEventKind> = std::iter::from_fn(|| failures.try_recv().ok())
        .filter(|event| event.job_id == job_id)
        .map(|event| event.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            JobEventKind::Waiting,
            JobEventKind::Active,
            JobEventKind::Delayed,
            JobEventKind::Active,
            JobEventKind::Delayed,
            JobEventKind::Active,
            JobEventKind::Failed,
        ]
    );
}

#[test]
fn test_file_appearing_before_retry_completes() {
    let harness = TestHarness::with_config(
        ConfigBuilder::new()
            .max_attempts(5)
            .base_backoff_ms(200)
            .build(),
    );

    let path = harness.input_dir.join("late.log");
    let job_id = harness
        .queue
        .enqueue(&path.to_string_lossy(), "u", "late.log", 20)
        .unwrap();
    let pool = harness.start_pool();

    harness.wait_for(|c| c.delayed == 1);
    std::fs::write(&path, "INFO finally here\n").unwrap();
    let counts = harness.wait_for(|c| c.completed == 1);
    pool.shutdown();
    pool.wait();

    assert_eq!(counts.completed, 1);
    let job = harness.queue.get(&job_id).unwrap().unwrap();
    assert!(job.attempts >= 2 && job.attempts < 5);

    let record = harness.store.find(&job_id).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.stats.total_entries, 1);
    assert_eq!(record.metadata["attempts"], job.attempts);
    // A successful save replaces the failure written by the earlier attempt.
    assert!(record.metadata.contains_key("original_file_path"));
    assert!(!record.metadata.contains_key("error"));
}

#[test]
fn test_cleanup_deletes_processed_files() {
    let harness = TestHarness::with_config(ConfigBuilder::new().delete_files(true).build());
    let job_id = harness.submit("done.log", "INFO ok\nERROR bad\n");
    let file_ref = harness.queue.get(&job_id).unwrap().unwrap().file_ref;

    let pool = harness.start_pool();
    harness.drain();
    pool.shutdown();
    pool.wait();

    assert!(!Path::new(&file_ref).exists());
    assert_eq!(harness.store.find(&job_id).unwrap().unwrap().stats.error_count, 1);
}

#[test]
fn test_files_kept_without_cleanup() {
    let harness = TestHarness::new();
    let job_id = harness.submit("keep.log", "INFO ok\n");
    let file_ref = harness.queue.get(&job_id).unwrap().unwrap().file_ref;

    let pool = harness.start_pool();
    harness.drain();
    pool.shutdown();
    pool.wait();

    assert!(Path::new(&file_ref).exists());
}

#[test]
fn test_many_files_each_processed_once() {
    let harness = TestHarness::with_config(ConfigBuilder::new().worker_concurrency(4).build());
    let mut job_ids = Vec::new();
    for i in 0..30 {
        let content = format!("INFO file {}\nWARN half\n", i);
        job_ids.push(harness.submit(&format!("f{}.log", i), &content));
    }

    let pool = harness.start_pool();
    let counts = harness.wait_for(|c| c.completed == 30);
    pool.shutdown();
    pool.wait();

    assert_eq!(counts.completed, 30);
    assert_eq!(counts.failed, 0);
    for job_id in &job_ids {
        let job = harness.queue.get(job_id).unwrap().unwrap();
        assert_eq!(job.attempts, 1, "job {} ran more than once", job_id);
    }
    assert_eq!(harness.store.list(Some("test-user"), 100).unwrap().len(), 30);
}

#[test]
fn test_cancel_waiting_job() {
    let harness = TestHarness::new();
    let job_id = harness.submit("cancel.log", "INFO x\n");

    assert!(harness.queue.remove(&job_id).unwrap());
    assert!(harness.queue.get(&job_id).unwrap().is_none());
    assert_eq!(harness.queue.counts_by_state().unwrap().total(), 0);
}

#[test]
fn test_pool_shutdown_is_prompt_when_idle() {
    let harness = TestHarness::new();
    let pool = harness.start_pool();
    std::thread::sleep(Duration::from_millis(50));

    let started = std::time::Instant::now();
    pool.shutdown();
    pool.wait();
    assert!(started.elapsed() < Duration::from_secs(2));
}
