//! End-to-end tests for the repost pipeline
//!
//! Drive videos through download, promotion, posting and expiry using the
//! real stores and jobs, with scripted external services.

mod common;

use common::{drain_events, TestPipeline, DAY, T0};
use async_trait::async_trait;
use reposter_server::background_jobs::{
    create_coordinator, BackgroundJob, HookEvent, JobContext, JobError, JobSchedule,
};
use reposter_server::clock::Clock;
use reposter_server::config::{DownloadQueueSettings, StorageSettings};
use reposter_server::download_queue::{DownloadErrorKind, DownloadOutcome};
use reposter_server::error::PipelineError;
use reposter_server::events::LifecycleEvent;
use reposter_server::pipeline_store::{JobStatus, PostStatus, VideoStatus};
use reposter_server::storage::{blob_key, PromoteOutcome};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_video_moves_from_download_to_expiry() {
    let pipeline = TestPipeline::new();
    let mut events = pipeline.subscribe();
    pipeline.enqueue("a", 0);
    let (mut coordinator, handle) = pipeline.coordinator(CancellationToken::new()).await;

    coordinator.trigger_job("download_drain").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    let video = pipeline.video("a");
    assert_eq!(video.status, VideoStatus::Downloaded);
    let local_path = video.local_path.expect("local path recorded");
    assert!(Path::new(&local_path).exists());

    coordinator.trigger_job("promotion").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    let video = pipeline.video("a");
    assert_eq!(video.durable_path, Some(blob_key("a", ".mp4")));
    assert_eq!(video.durable_expires_at, Some(T0 + 7 * DAY));

    let post = pipeline
        .scheduler()
        .schedule("a", "main-account", T0 + 600, Some("reposted"))
        .unwrap();
    coordinator.trigger_job("post_dispatch").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    assert_eq!(
        pipeline.scheduler().get_post(post.id).unwrap().status,
        PostStatus::Queued
    );

    pipeline.clock.advance_secs(600);
    coordinator.trigger_job("post_dispatch").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    let post = pipeline.scheduler().get_post(post.id).unwrap();
    assert_eq!(post.status, PostStatus::Posted);
    assert_eq!(post.post_id, Some(format!("remote-{}", post.id)));
    assert_eq!(pipeline.publisher.published_videos(), vec!["a".to_string()]);
    assert_eq!(pipeline.video("a").status, VideoStatus::Posted);

    pipeline.clock.set(T0 + 6 * DAY);
    coordinator.trigger_job("storage_reaper").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    assert_eq!(pipeline.video("a").status, VideoStatus::Posted);

    pipeline.clock.set(T0 + 8 * DAY);
    coordinator.trigger_job("storage_reaper").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    let video = pipeline.video("a");
    assert_eq!(video.status, VideoStatus::Expired);
    assert!(video.local_path.is_none());
    assert!(!Path::new(&local_path).exists());

    let reaper = handle.get_job("storage_reaper").await.unwrap();
    let last_run = reaper.last_run.unwrap();
    assert_eq!(last_run.status, "success");
    assert_eq!(last_run.triggered_by, "manual");

    let kinds: Vec<_> = drain_events(&mut events)
        .iter()
        .map(|e| e.kind())
        .collect();
    for kind in [
        "download_completed",
        "video_promoted",
        "post_succeeded",
        "reaper_summary",
    ] {
        assert!(kinds.contains(&kind), "missing {} in {:?}", kind, kinds);
    }
}

#[test]
fn test_concurrent_workers_never_share_a_lease() {
    let pipeline = TestPipeline::new();
    for i in 0..24 {
        pipeline.enqueue(&format!("v{}", i), i % 3);
    }
    let queue = Arc::clone(pipeline.queue());

    let leased: Vec<i64> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..6)
            .map(|n| {
                let queue = Arc::clone(&queue);
                scope.spawn(move || {
                    let worker = format!("worker-{}", n);
                    let mut mine = Vec::new();
                    while let Some(job) = queue.lease_next(&worker).unwrap() {
                        assert_eq!(job.lease_owner.as_deref(), Some(worker.as_str()));
                        mine.push(job.id);
                    }
                    mine
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = leased.iter().copied().collect();
    assert_eq!(leased.len(), 24);
    assert_eq!(unique.len(), 24);
    assert_eq!(queue.stats().unwrap().in_progress, 24);
}

#[test]
fn test_priority_wins_over_arrival_order() {
    let pipeline = TestPipeline::new();
    for (video_id, priority) in [("old-low", 0), ("old-high", 5), ("new-low", 0), ("new-high", 5)] {
        pipeline.enqueue(video_id, priority);
        pipeline.clock.advance_secs(1);
    }

    let order: Vec<String> = std::iter::from_fn(|| pipeline.queue().lease_next("w").unwrap())
        .map(|job| job.video_id)
        .collect();
    assert_eq!(order, vec!["old-high", "new-high", "old-low", "new-low"]);
}

#[tokio::test]
async fn test_download_fails_for_good_after_three_attempts() {
    let pipeline = TestPipeline::new();
    let mut events = pipeline.subscribe();
    pipeline.downloader.fail("a", DownloadErrorKind::Connection);
    pipeline.enqueue("a", 0);
    let queue = pipeline.queue();
    let registry = &pipeline.components.downloaders;
    let cancel = CancellationToken::new();

    let mut outcomes = Vec::new();
    for wait in [0, 30, 60] {
        pipeline.clock.advance_secs(wait);
        let job = queue.lease_next("w").unwrap().expect("job is leasable");
        outcomes.push(queue.process(registry, job, "w", &cancel).await.unwrap());
    }

    assert!(matches!(outcomes[0], DownloadOutcome::Retrying { attempts: 1, .. }));
    assert!(matches!(outcomes[1], DownloadOutcome::Retrying { attempts: 2, .. }));
    assert_eq!(outcomes[2], DownloadOutcome::Failed { attempts: 3 });
    assert!(queue.lease_next("w").unwrap().is_none());
    assert_eq!(pipeline.video("a").status, VideoStatus::Failed);

    let failures: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::DownloadFailed(f) => Some(f),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].video_id, "a");
    assert_eq!(failures[0].attempts, 3);

    // An operator retry after the outage gets a fresh budget.
    pipeline.downloader.heal("a");
    let job = queue.list_jobs(Some(JobStatus::Failed), 10, 0).unwrap().remove(0);
    queue.retry_failed(job.id).unwrap();
    let job = queue.lease_next("w").unwrap().unwrap();
    assert!(matches!(
        queue.process(registry, job, "w", &cancel).await.unwrap(),
        DownloadOutcome::Completed { .. }
    ));
}

#[test]
fn test_enqueue_rejects_second_active_job() {
    let pipeline = TestPipeline::new();
    pipeline.enqueue("a", 0);
    let err = pipeline
        .queue()
        .enqueue("a", "https://videos.example/a", 9)
        .unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateJob { .. }));
}

#[tokio::test]
async fn test_schedule_validation() {
    let pipeline = TestPipeline::new();
    pipeline.enqueue("ready", 0);
    pipeline.enqueue("not-downloaded", 0);
    let job = pipeline.queue().lease_next("w").unwrap().unwrap();
    assert_eq!(job.video_id, "ready");
    pipeline
        .queue()
        .process(
            &pipeline.components.downloaders,
            job,
            "w",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let scheduler = pipeline.scheduler();
    assert!(matches!(
        scheduler.schedule("ready", "acct", T0 - 3_600, None),
        Err(PipelineError::InvalidSchedule(_))
    ));
    assert!(matches!(
        scheduler.schedule("not-downloaded", "acct", T0 + 60, None),
        Err(PipelineError::InvalidSchedule(_))
    ));
    assert!(matches!(
        scheduler.schedule("ready", "  ", T0 + 60, None),
        Err(PipelineError::InvalidSchedule(_))
    ));
    assert!(matches!(
        scheduler.schedule("missing", "acct", T0 + 60, None),
        Err(PipelineError::NotFound { .. })
    ));
    // Slightly in the past is still accepted.
    let post = scheduler.schedule("ready", "acct", T0 - 30, None).unwrap();
    assert_eq!(post.status, PostStatus::Queued);
}

#[tokio::test]
async fn test_promotion_is_idempotent() {
    let pipeline = TestPipeline::new();
    pipeline.enqueue("a", 0);
    let (mut coordinator, _) = pipeline.coordinator(CancellationToken::new()).await;
    coordinator.trigger_job("download_drain").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    let local_path = pipeline.video("a").local_path.unwrap();

    let storage = pipeline.storage();
    let first = storage.promote("a", Path::new(&local_path)).await.unwrap();
    pipeline.clock.advance_days(1);
    let second = storage.promote("a", Path::new(&local_path)).await.unwrap();

    let durable_path = blob_key("a", ".mp4");
    assert_eq!(
        first,
        PromoteOutcome::Promoted {
            durable_path: durable_path.clone(),
            expires_at: T0 + 7 * DAY,
        }
    );
    assert_eq!(second, PromoteOutcome::AlreadyPromoted { durable_path });
    // Expiry is not pushed out by the second call.
    assert_eq!(pipeline.video("a").durable_expires_at, Some(T0 + 7 * DAY));
    assert_eq!(storage.stats().await.unwrap().total_files, 1);
}

#[tokio::test]
async fn test_reaper_failure_on_one_artifact_spares_the_rest() {
    let pipeline = TestPipeline::with_settings(
        DownloadQueueSettings::default(),
        StorageSettings {
            retention_days: 2,
            ..Default::default()
        },
    );
    for video_id in ["a", "b", "c"] {
        pipeline.enqueue(video_id, 0);
    }
    let (mut coordinator, handle) = pipeline.coordinator(CancellationToken::new()).await;
    coordinator.trigger_job("download_drain").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    coordinator.trigger_job("promotion").await.unwrap();
    coordinator.wait_for_running_jobs().await;

    pipeline.blobs.fail_delete(&blob_key("b", ".mp4"));
    pipeline.clock.advance_days(3);
    let report = pipeline.storage().reap(pipeline.clock.now()).await.unwrap();
    assert_eq!((report.deleted, report.errors, report.total), (2, 1, 3));
    assert_eq!(pipeline.video("a").status, VideoStatus::Expired);
    assert_eq!(pipeline.video("b").status, VideoStatus::Downloaded);
    assert_eq!(pipeline.video("c").status, VideoStatus::Expired);

    // The job reports the partial failure and the next run finishes the work.
    pipeline.blobs.heal();
    coordinator.trigger_job("storage_reaper").await.unwrap();
    coordinator.wait_for_running_jobs().await;
    assert_eq!(pipeline.video("b").status, VideoStatus::Expired);
    let last_run = handle.get_job("storage_reaper").await.unwrap().last_run.unwrap();
    assert_eq!(last_run.status, "success");
}

/// Blocks until released so overlapping triggers can be observed.
struct GateJob {
    started: Notify,
    release: Notify,
    runs: AtomicUsize,
}

#[async_trait]
impl BackgroundJob for GateJob {
    fn id(&self) -> &'static str {
        "gate"
    }

    fn name(&self) -> &'static str {
        "Gate"
    }

    fn description(&self) -> &'static str {
        "Waits for the test to release it"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Hook(HookEvent::OnDownloadComplete)
    }

    async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_job_never_runs_twice_at_once() {
    let pipeline = TestPipeline::new();
    let shutdown = CancellationToken::new();
    let (mut coordinator, handle) =
        create_coordinator(pipeline.components.clone(), shutdown.clone());
    let gate = Arc::new(GateJob {
        started: Notify::new(),
        release: Notify::new(),
        runs: AtomicUsize::new(0),
    });
    coordinator.register_job(gate.clone()).await;
    let coordinator_task = tokio::spawn(async move { coordinator.run().await });

    assert!(matches!(
        handle.trigger_job("does_not_exist").await,
        Err(JobError::NotFound)
    ));

    handle.trigger_job("gate").await.unwrap();
    gate.started.notified().await;
    assert!(handle.is_job_running("gate").await);
    assert!(matches!(
        handle.trigger_job("gate").await,
        Err(JobError::AlreadyRunning)
    ));

    gate.release.notify_one();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while handle.is_job_running("gate").await {
        assert!(std::time::Instant::now() < deadline, "gate job never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gate.runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        handle.get_job("gate").await.unwrap().last_run.unwrap().status,
        "success"
    );

    shutdown.cancel();
    coordinator_task.await.unwrap();
}
