use super::*;
use crate::clock::ManualClock;
use crate::config::MatchcastConfig;
use crate::error::{ErrorClass, PublishError};
use crate::events::{EventBus, PipelineEvent};
use crate::identity::{ArtifactIdentity, MatchId};
use crate::store::{JsonMatchStore, MatchStore, NewMatchRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ok,
    Transient,
    Malformed,
    Auth,
    Quota,
}

/// Remote host answering from a script; succeeds once the script runs out
#[derive(Default)]
struct ScriptedHost {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedHost {
    fn with_script(replies: &[Reply]) -> Self {
        Self {
            script: Mutex::new(replies.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RemoteHost for ScriptedHost {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn publish(&self, video: &Path, _metadata: &PublicationMetadata) -> AttemptOutcome<String> {
        tokio::task::yield_now().await;
        let call = {
            let mut calls = self.calls.lock();
            calls.push(video.to_path_buf());
            calls.len()
        };
        let reply = self.script.lock().pop_front().unwrap_or(Reply::Ok);

        match reply {
            Reply::Ok => AttemptOutcome::Success(format!("https://videos.example.com/v/{}", call)),
            Reply::Transient => AttemptOutcome::Transient("503: unavailable".to_string()),
            Reply::Malformed => AttemptOutcome::Permanent(PublishError::Malformed {
                details: "415: unsupported media".to_string(),
            }),
            Reply::Auth => AttemptOutcome::Permanent(PublishError::Auth {
                details: "401: invalid token".to_string(),
            }),
            Reply::Quota => AttemptOutcome::QuotaExceeded("403: quotaExceeded".to_string()),
        }
    }
}

struct Fixture {
    publisher: Publisher,
    queue: Arc<PublicationQueue>,
    ledger: Arc<QuotaLedger>,
    store: Arc<JsonMatchStore>,
    host: Arc<ScriptedHost>,
    clock: Arc<ManualClock>,
}

fn noon() -> DateTime<Utc> {
    // 04:00 in Los Angeles
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

fn fixture(budget: u32, script: &[Reply]) -> Fixture {
    let mut config = MatchcastConfig::default().publisher;
    config.daily_budget_units = budget;

    let clock = Arc::new(ManualClock::new(noon()));
    let queue = Arc::new(PublicationQueue::in_memory());
    let ledger = Arc::new(QuotaLedger::new(
        budget,
        chrono_tz::America::Los_Angeles,
        0,
        clock.clone(),
    ));
    let store = Arc::new(JsonMatchStore::in_memory());
    let host = Arc::new(ScriptedHost::with_script(script));

    let publisher = Publisher::new(
        queue.clone(),
        ledger.clone(),
        host.clone(),
        store.clone(),
        &config,
    )
    .with_retry_policy(
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)).without_jitter(),
    );

    Fixture {
        publisher,
        queue,
        ledger,
        store,
        host,
        clock,
    }
}

fn metadata(title: &str) -> PublicationMetadata {
    PublicationMetadata {
        title: title.to_string(),
        description: String::new(),
        tags: Vec::new(),
        category_id: "20".to_string(),
        privacy_status: "public".to_string(),
        collection: None,
    }
}

/// Create `count` records and queue one task per record, in id order
async fn queue_matches(fx: &Fixture, count: usize) -> Vec<String> {
    let mut keys = Vec::new();
    for i in 0..count {
        let started_at = noon() + ChronoDuration::minutes(5 * i as i64);
        let record = fx
            .store
            .create(NewMatchRecord {
                started_at,
                ended_at: started_at + ChronoDuration::minutes(4),
                stats: None,
                video_path: PathBuf::from(format!("matches/{}.mp4", i + 1)),
                clip_path: PathBuf::from(format!("matches/{}_result_screen.mp4", i + 1)),
            })
            .await
            .unwrap();

        let task = PublicationTask::new(
            ArtifactIdentity::Match { id: record.id },
            record.video_path.clone(),
            metadata(&format!("Match #{}", record.id)),
        );
        keys.push(fx.publisher.enqueue(task).await.unwrap().key().to_string());
    }
    keys
}

#[tokio::test]
async fn test_budget_of_six_publishes_six_of_eight_in_order() {
    let fx = fixture(6, &[]);
    let keys = queue_matches(&fx, 8).await;

    let report = fx.publisher.drain(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.uploaded, 6);
    assert_eq!(report.deferred, 2);
    assert!(report.quota_exhausted);
    assert_eq!(fx.ledger.consumed(), 6);

    let published: Vec<PathBuf> = (1..=6)
        .map(|i| PathBuf::from(format!("matches/{}.mp4", i)))
        .collect();
    assert_eq!(fx.host.calls(), published);

    let pending: Vec<String> = fx.queue.pending().await.into_iter().map(|t| t.key).collect();
    assert_eq!(pending, keys[6..].to_vec());

    let record = fx.store.get(MatchId(3)).await.unwrap();
    assert_eq!(
        record.remote_url.as_deref(),
        Some("https://videos.example.com/v/3")
    );
    assert!(fx.store.get(MatchId(7)).await.unwrap().remote_url.is_none());
}

#[tokio::test]
async fn test_enqueue_is_idempotent_by_identity() {
    let fx = fixture(6, &[]);
    let identity = ArtifactIdentity::Match { id: MatchId(9) };

    let first = fx
        .publisher
        .enqueue(PublicationTask::new(
            identity,
            PathBuf::from("matches/9-20240115_143052.mp4"),
            metadata("first"),
        ))
        .await
        .unwrap();
    let second = fx
        .publisher
        .enqueue(PublicationTask::new(
            identity,
            PathBuf::from("elsewhere/9-20240115_143052.mp4"),
            metadata("second"),
        ))
        .await
        .unwrap();

    assert!(first.is_created());
    assert_eq!(
        second,
        Enqueued::Existing {
            key: "match-9".to_string(),
            state: TaskState::Pending
        }
    );
    let tasks = fx.queue.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].metadata.title, "first");
}

#[tokio::test]
async fn test_repeated_drains_never_exceed_budget() {
    let fx = fixture(6, &[Reply::Transient, Reply::Ok, Reply::Transient]);
    queue_matches(&fx, 10).await;

    let mut uploaded = 0;
    for _ in 0..3 {
        let report = fx.publisher.drain(&CancellationToken::new()).await.unwrap();
        uploaded += report.uploaded;
        assert!(fx.ledger.consumed() <= 6);
    }

    // Every attempt is charged, including the two retries
    assert_eq!(fx.host.calls().len(), 6);
    assert_eq!(uploaded, 4);
    assert_eq!(fx.queue.counts().await.pending, 6);
}

#[tokio::test]
async fn test_transient_failures_retry_then_fail() {
    let fx = fixture(10, &[Reply::Transient, Reply::Transient, Reply::Transient]);
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let publisher = fx.publisher.with_event_bus(bus);
    let keys = {
        let mut keys = Vec::new();
        for id in [1u64, 2] {
            let task = PublicationTask::new(
                ArtifactIdentity::Match { id: MatchId(id) },
                PathBuf::from(format!("matches/{}.mp4", id)),
                metadata("m"),
            );
            keys.push(publisher.enqueue(task).await.unwrap().key().to_string());
        }
        keys
    };

    let report = publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.uploaded, 1);

    let failed = fx.queue.get(&keys[0]).await.unwrap();
    assert_eq!(failed.attempts, 3);
    assert!(matches!(failed.state, TaskState::Failed { .. }));
    assert_eq!(fx.ledger.consumed(), 4);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::PublicationFailed { key, .. } = event {
            assert_eq!(key, keys[0]);
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    // Failed tasks are left alone by later drains
    let report = publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report, DrainReport::default());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let fx = fixture(10, &[Reply::Malformed]);
    let keys = queue_matches(&fx, 2).await;

    let report = fx.publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.uploaded, 1);
    assert_eq!(fx.host.calls().len(), 2);

    let task = fx.queue.get(&keys[0]).await.unwrap();
    assert_eq!(task.attempts, 1);
    match task.state {
        TaskState::Failed { reason } => assert!(reason.contains("415")),
        other => panic!("unexpected state {}", other),
    }
}

#[tokio::test]
async fn test_rejected_credentials_stop_the_drain() {
    let fx = fixture(10, &[Reply::Auth]);
    queue_matches(&fx, 3).await;

    let report = fx.publisher.drain(&CancellationToken::new()).await.unwrap();
    assert!(report.auth_rejected);
    assert_eq!(report.failed, 1);
    assert_eq!(report.deferred, 2);
    assert_eq!(fx.host.calls().len(), 1);
    assert_eq!(fx.queue.counts().await.pending, 2);
}

#[tokio::test]
async fn test_quota_resets_at_boundary() {
    let fx = fixture(2, &[]);
    queue_matches(&fx, 4).await;

    let first = fx.publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.uploaded, 2);

    let blocked = fx.publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(blocked.uploaded, 0);
    assert_eq!(blocked.deferred, 2);

    // Midnight in Los Angeles is 08:00 UTC in January
    fx.clock
        .set(Utc.with_ymd_and_hms(2024, 1, 16, 8, 0, 0).unwrap());
    let next_day = fx.publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(next_day.uploaded, 2);
    assert_eq!(fx.queue.counts().await.uploaded, 4);
}

#[tokio::test]
async fn test_quota_exceeded_response_defers_task() {
    let fx = fixture(6, &[Reply::Ok, Reply::Quota]);
    let keys = queue_matches(&fx, 3).await;

    let report = fx.publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.deferred, 2);
    assert!(report.quota_exhausted);

    let task = fx.queue.get(&keys[1]).await.unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(fx.ledger.remaining(), 0);
}

#[tokio::test]
async fn test_already_published_record_is_skipped() {
    let fx = fixture(6, &[]);
    let keys = queue_matches(&fx, 1).await;
    fx.store
        .set_remote_url(MatchId(1), "https://videos.example.com/v/old")
        .await
        .unwrap();

    let report = fx.publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(fx.host.calls().is_empty());
    assert_eq!(fx.ledger.consumed(), 0);
    assert!(matches!(
        fx.queue.get(&keys[0]).await.unwrap().state,
        TaskState::Skipped { .. }
    ));
}

#[tokio::test]
async fn test_dry_run_transfers_nothing() {
    let fx = fixture(6, &[]);
    let publisher = fx.publisher.dry_run(true);
    for id in 1..=8u64 {
        publisher
            .enqueue(PublicationTask::new(
                ArtifactIdentity::Match { id: MatchId(id) },
                PathBuf::from(format!("matches/{}.mp4", id)),
                metadata("m"),
            ))
            .await
            .unwrap();
    }

    let report = publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.would_publish, 6);
    assert_eq!(report.deferred, 2);
    assert!(fx.host.calls().is_empty());
    assert_eq!(fx.ledger.consumed(), 0);
    assert_eq!(fx.queue.counts().await.pending, 8);
}

#[tokio::test]
async fn test_cancelled_drain_defers_everything() {
    let fx = fixture(6, &[]);
    queue_matches(&fx, 3).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = fx.publisher.drain(&cancel).await.unwrap();
    assert_eq!(report.deferred, 3);
    assert!(fx.host.calls().is_empty());
}

#[tokio::test]
async fn test_interrupted_transfer_returns_to_pending() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");

    let queue = PublicationQueue::open(&path).await.unwrap();
    let task = PublicationTask::new(
        ArtifactIdentity::Match { id: MatchId(5) },
        PathBuf::from("matches/5.mp4"),
        metadata("m"),
    );
    queue.enqueue(task).await.unwrap();
    queue.begin("match-5").await.unwrap();
    assert!(matches!(
        queue.begin("match-5").await,
        Err(PublishError::InvalidTransition { .. })
    ));
    drop(queue);

    let reopened = PublicationQueue::open(&path).await.unwrap();
    assert_eq!(
        reopened.get("match-5").await.unwrap().state,
        TaskState::Pending
    );
}

#[tokio::test]
async fn test_failed_tasks_need_explicit_requeue() {
    let fx = fixture(6, &[Reply::Malformed]);
    let keys = queue_matches(&fx, 1).await;
    fx.publisher.drain(&CancellationToken::new()).await.unwrap();

    assert!(matches!(
        fx.queue.force_reset(&keys[0], metadata("x")).await,
        Ok(())
    ));
    fx.publisher.drain(&CancellationToken::new()).await.unwrap();
    let task = fx.queue.get(&keys[0]).await.unwrap();
    assert!(task.state.is_uploaded());

    // Uploaded is terminal for a plain retry
    assert!(matches!(
        fx.queue.retry_failed(&keys[0]).await,
        Err(PublishError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_retry_failed_requeues() {
    let fx = fixture(6, &[Reply::Malformed]);
    let keys = queue_matches(&fx, 1).await;
    fx.publisher.drain(&CancellationToken::new()).await.unwrap();

    fx.queue.retry_failed(&keys[0]).await.unwrap();
    let task = fx.queue.get(&keys[0]).await.unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.attempts, 0);
    assert!(!task.forced);
}

/// Host that settles another queued task while the first transfer runs
struct InterferingHost {
    queue: Arc<PublicationQueue>,
    settle: String,
    calls: Mutex<usize>,
}

#[async_trait]
impl RemoteHost for InterferingHost {
    fn name(&self) -> &'static str {
        "interfering"
    }

    async fn publish(&self, _video: &Path, _metadata: &PublicationMetadata) -> AttemptOutcome<String> {
        let first = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls == 1
        };
        if first {
            self.queue
                .skip(&self.settle, "published by another run")
                .await
                .unwrap();
        }
        AttemptOutcome::Success("https://videos.example.com/v/1".to_string())
    }
}

#[tokio::test]
async fn test_task_settled_elsewhere_keeps_its_quota_unit() {
    let config = MatchcastConfig::default().publisher;
    let clock = Arc::new(ManualClock::new(noon()));
    let queue = Arc::new(PublicationQueue::in_memory());
    let ledger = Arc::new(QuotaLedger::new(6, chrono_tz::America::Los_Angeles, 0, clock));
    let host = Arc::new(InterferingHost {
        queue: queue.clone(),
        settle: "match-2".to_string(),
        calls: Mutex::new(0),
    });
    let publisher = Publisher::new(
        queue.clone(),
        ledger.clone(),
        host.clone(),
        Arc::new(JsonMatchStore::in_memory()),
        &config,
    );
    for id in [1u64, 2] {
        publisher
            .enqueue(PublicationTask::new(
                ArtifactIdentity::Match { id: MatchId(id) },
                PathBuf::from(format!("matches/{}.mp4", id)),
                metadata("m"),
            ))
            .await
            .unwrap();
    }

    let report = publisher.drain(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(*host.calls.lock(), 1);
    assert_eq!(ledger.consumed(), 1);
    assert_eq!(ledger.remaining(), 5);
    assert!(matches!(
        queue.get("match-2").await.unwrap().state,
        TaskState::Skipped { .. }
    ));
}

#[tokio::test]
async fn test_dry_run_skips_published_records_first() {
    let fx = fixture(2, &[]);
    let keys = queue_matches(&fx, 3).await;
    fx.store
        .set_remote_url(MatchId(1), "https://videos.example.com/v/old")
        .await
        .unwrap();
    let publisher = fx.publisher.dry_run(true);

    let report = publisher.drain(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.would_publish, 2);
    assert_eq!(report.deferred, 0);
    assert!(!report.quota_exhausted);
    assert!(fx.host.calls().is_empty());
    assert_eq!(fx.ledger.consumed(), 0);
    // Nothing is written, not even the skip
    assert_eq!(fx.queue.get(&keys[0]).await.unwrap().state, TaskState::Pending);
}

#[tokio::test]
async fn test_dry_run_opens_without_endpoint() {
    let dir = TempDir::new().unwrap();
    let mut config = MatchcastConfig::default().publisher;
    config.endpoint = None;
    config.queue_path = dir.path().join("queue.json").display().to_string();
    config.ledger_path = dir.path().join("quota.json").display().to_string();
    let store: Arc<dyn MatchStore> = Arc::new(JsonMatchStore::in_memory());

    let publisher = match Publisher::open(&config, Arc::clone(&store), true).await {
        Ok(publisher) => publisher,
        Err(e) => panic!("dry run should not need an endpoint: {}", e),
    };
    let report = publisher.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report, DrainReport::default());

    let error = match Publisher::open(&config, store, false).await {
        Ok(_) => panic!("publishing without an endpoint should be refused"),
        Err(e) => e,
    };
    assert_eq!(error.class(), ErrorClass::Configuration);
}

#[tokio::test]
async fn test_failed_write_keeps_task_pending() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");
    let queue = PublicationQueue::open(&path).await.unwrap();
    queue
        .enqueue(PublicationTask::new(
            ArtifactIdentity::Match { id: MatchId(5) },
            PathBuf::from("matches/5.mp4"),
            metadata("m"),
        ))
        .await
        .unwrap();

    // A directory where the temp file goes makes every write fail
    std::fs::create_dir(dir.path().join("queue.json.tmp")).unwrap();

    assert!(matches!(
        queue.begin("match-5").await,
        Err(PublishError::Persist(_))
    ));
    assert_eq!(queue.get("match-5").await.unwrap().state, TaskState::Pending);
    assert_eq!(queue.pending().await.len(), 1);

    let refused = queue
        .enqueue(PublicationTask::new(
            ArtifactIdentity::Match { id: MatchId(6) },
            PathBuf::from("matches/6.mp4"),
            metadata("m"),
        ))
        .await;
    assert!(matches!(refused, Err(PublishError::Persist(_))));
    assert!(queue.get("match-6").await.is_none());

    std::fs::remove_dir(dir.path().join("queue.json.tmp")).unwrap();
    queue.begin("match-5").await.unwrap();
    assert_eq!(queue.counts().await.in_flight, 1);
}

fn assert_each_path_published_once(calls: &[PathBuf]) {
    let mut unique = calls.to_vec();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), calls.len(), "duplicate transfer in {:?}", calls);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_drains_share_budget() {
    let fx = fixture(6, &[]);
    queue_matches(&fx, 8).await;
    let publisher = Arc::new(fx.publisher);
    let cancel = CancellationToken::new();

    let first = tokio::spawn({
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        async move { publisher.drain(&cancel).await }
    });
    let second = tokio::spawn({
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        async move { publisher.drain(&cancel).await }
    });
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.uploaded + second.uploaded, 6);
    assert_eq!(fx.ledger.consumed(), 6);
    let calls = fx.host.calls();
    assert_eq!(calls.len(), 6);
    assert_each_path_published_once(&calls);

    let counts = fx.queue.counts().await;
    assert_eq!(counts.uploaded, 6);
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_enqueue_during_drain() {
    let fx = fixture(6, &[]);
    queue_matches(&fx, 3).await;
    let publisher = Arc::new(fx.publisher);
    let cancel = CancellationToken::new();

    let drain = tokio::spawn({
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        async move { publisher.drain(&cancel).await }
    });
    for id in 100..105u64 {
        publisher
            .enqueue(PublicationTask::new(
                ArtifactIdentity::Match { id: MatchId(id) },
                PathBuf::from(format!("matches/{}.mp4", id)),
                metadata("late"),
            ))
            .await
            .unwrap();
        tokio::task::yield_now().await;
    }
    drain.await.unwrap().unwrap();
    publisher.drain(&cancel).await.unwrap();

    assert_eq!(fx.ledger.consumed(), 6);
    let calls = fx.host.calls();
    assert_eq!(calls.len(), 6);
    assert_each_path_published_once(&calls);

    let counts = fx.queue.counts().await;
    assert_eq!(counts.uploaded, 6);
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.in_flight, 0);
}
