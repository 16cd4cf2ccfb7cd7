use super::downloader::{DownloadError, DownloadErrorKind, DownloadRequest, DownloaderRegistry};
use crate::clock::Clock;
use crate::config::DownloadQueueSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{DownloadCompleted, DownloadFailed, EventBus, LifecycleEvent};
use crate::pipeline_store::runtime_settings::{setting_or, DOWNLOAD_MAX_CONCURRENT};
use crate::pipeline_store::{
    DownloadJob, DownloadQueueStats, EnqueueOutcome, FullPipelineStore,
    JobStatus, NewVideo, SourceStore, VideoStore,
};
use crate::retry_policy::RetryPolicy;
use crate::server::metrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to a leased job.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Completed { path: PathBuf, size: u64 },
    /// Back to pending, not leasable before `next_attempt_at`.
    Retrying { attempts: u32, next_attempt_at: i64 },
    Failed { attempts: u32 },
    /// Lease given back without consuming an attempt.
    Released,
}

/// Persistent, priority-ordered queue of videos waiting to be downloaded.
///
/// Workers lease one job at a time. Every transition on a leased job is
/// fenced by the worker id, so a worker whose lease expired and was handed
/// to someone else cannot complete or fail the job.
pub struct DownloadQueue {
    store: Arc<dyn FullPipelineStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    settings: DownloadQueueSettings,
    events: EventBus,
}

impl DownloadQueue {
    pub fn new(
        store: Arc<dyn FullPipelineStore>,
        clock: Arc<dyn Clock>,
        settings: DownloadQueueSettings,
        events: EventBus,
    ) -> Self {
        Self {
            policy: RetryPolicy::new(&settings.retry),
            store,
            clock,
            settings,
            events,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Worker pool size for a drain: the settings table value when present,
    /// the configured one otherwise.
    pub fn max_concurrent(&self) -> usize {
        setting_or(
            self.store.as_ref(),
            DOWNLOAD_MAX_CONCURRENT,
            self.settings.max_concurrent,
            |n| *n > 0,
        )
    }

    /// Records a discovered video. Returns false if it was already known.
    pub fn register_video(&self, video: &NewVideo) -> PipelineResult<bool> {
        if let Some(source_id) = &video.source_id {
            if self.store.get_source(source_id)?.is_none() {
                return Err(PipelineError::not_found("source", source_id));
            }
        }
        let inserted = self.store.insert_video(video, self.clock.now())?;
        if inserted {
            debug!("Registered video {}", video.video_id);
        }
        Ok(inserted)
    }

    pub fn enqueue(&self, video_id: &str, url: &str, priority: i32) -> PipelineResult<DownloadJob> {
        let service = self.settings.default_service.clone();
        self.enqueue_with_service(video_id, url, priority, &service)
    }

    pub fn enqueue_with_service(
        &self,
        video_id: &str,
        url: &str,
        priority: i32,
        service: &str,
    ) -> PipelineResult<DownloadJob> {
        let now = self.clock.now();
        match self
            .store
            .insert_download_job(video_id, url, priority, service, now)?
        {
            EnqueueOutcome::Inserted(job) => {
                info!(
                    video_id,
                    job_id = job.id,
                    priority,
                    "Enqueued download via {}",
                    service
                );
                Ok(job)
            }
            EnqueueOutcome::Duplicate => Err(PipelineError::DuplicateJob {
                video_id: video_id.to_string(),
            }),
            EnqueueOutcome::UnknownVideo => Err(PipelineError::not_found("video", video_id)),
            EnqueueOutcome::NotEnqueueable(status) => Err(PipelineError::InvalidState(format!(
                "video {} is {} and cannot be downloaded again",
                video_id,
                status.as_db_str()
            ))),
        }
    }

    /// Leases the highest-priority, oldest eligible job, if any.
    pub fn lease_next(&self, worker: &str) -> PipelineResult<Option<DownloadJob>> {
        let job = self.store.lease_next_download(
            worker,
            self.clock.now(),
            self.settings.lease_timeout_secs as i64,
        )?;
        if let Some(job) = &job {
            debug!(
                "Worker {} leased download job {} (attempt {})",
                worker,
                job.id,
                job.attempts + 1
            );
        }
        Ok(job)
    }

    fn lease_lost(job: &DownloadJob, worker: &str) -> PipelineError {
        PipelineError::InvalidState(format!(
            "worker {} no longer holds the lease on download job {}",
            worker, job.id
        ))
    }

    pub fn complete(
        &self,
        job: &DownloadJob,
        worker: &str,
        local_path: &Path,
        file_size: u64,
    ) -> PipelineResult<()> {
        let now = self.clock.now();
        let local_path = local_path.to_string_lossy();
        if !self
            .store
            .complete_download(job.id, worker, &local_path, file_size, now)?
        {
            return Err(Self::lease_lost(job, worker));
        }

        metrics::record_download_outcome(&job.service, "completed");
        self.events
            .emit(LifecycleEvent::DownloadCompleted(DownloadCompleted {
                job_id: job.id,
                video_id: job.video_id.clone(),
                local_path: local_path.into_owned(),
                file_size,
                at: now,
            }));
        Ok(())
    }

    /// Records a failed attempt and either schedules a retry or fails the
    /// job for good.
    pub fn fail(
        &self,
        job: &DownloadJob,
        worker: &str,
        error: &DownloadError,
    ) -> PipelineResult<DownloadOutcome> {
        let now = self.clock.now();
        let attempts = job.attempts + 1;
        let reason = error.to_string();

        if error.is_retryable() && self.policy.should_retry(attempts) {
            let next_attempt_at = self.policy.next_attempt_at(now, attempts);
            if !self
                .store
                .retry_download(job.id, worker, attempts, next_attempt_at, &reason, now)?
            {
                return Err(Self::lease_lost(job, worker));
            }
            warn!(
                video_id = %job.video_id,
                job_id = job.id,
                attempts,
                "Download failed, retrying in {}s: {}",
                next_attempt_at - now,
                reason
            );
            metrics::record_download_outcome(&job.service, "retrying");
            return Ok(DownloadOutcome::Retrying {
                attempts,
                next_attempt_at,
            });
        }

        if !self
            .store
            .fail_download(job.id, worker, attempts, &reason, now)?
        {
            return Err(Self::lease_lost(job, worker));
        }
        metrics::record_download_outcome(&job.service, "failed");
        self.events.emit(LifecycleEvent::DownloadFailed(DownloadFailed {
            job_id: job.id,
            video_id: job.video_id.clone(),
            attempts,
            reason,
            at: now,
        }));
        Ok(DownloadOutcome::Failed { attempts })
    }

    /// Gives a leased job back to the queue without consuming an attempt.
    pub fn release(&self, job: &DownloadJob, worker: &str) -> PipelineResult<bool> {
        let released = self
            .store
            .release_download(job.id, worker, self.clock.now())?;
        if released {
            debug!("Worker {} released download job {}", worker, job.id);
        }
        Ok(released)
    }

    /// Returns every job whose lease expired at or before `now` to pending.
    pub fn release_expired_leases(&self, now: i64) -> PipelineResult<usize> {
        let released = self.store.release_expired_downloads(now)?;
        if released > 0 {
            warn!("Recovered {} download jobs with expired leases", released);
        }
        Ok(released)
    }

    /// Runs one leased job through its downloader and records the outcome.
    ///
    /// When `cancel` fires mid-download the lease is released instead.
    pub async fn process(
        &self,
        registry: &DownloaderRegistry,
        job: DownloadJob,
        worker: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<DownloadOutcome> {
        let Some(downloader) = registry.get(&job.service) else {
            let error = DownloadError::new(
                DownloadErrorKind::UnknownService,
                format!("no downloader registered for service {}", job.service),
            );
            return self.fail(&job, worker, &error);
        };

        let request = DownloadRequest {
            job_id: job.id,
            video_id: job.video_id.clone(),
            url: job.url.clone(),
        };
        let started = Instant::now();
        // The download must not outlive the lease, or lease recovery could
        // hand the job to another worker while this one is still writing.
        let lease = self.lease_duration();
        let result = tokio::select! {
            result = tokio::time::timeout(lease, downloader.download(&request)) => {
                result.unwrap_or_else(|_| {
                    Err(DownloadError::new(
                        DownloadErrorKind::Timeout,
                        format!("download did not finish within its {}s lease", lease.as_secs()),
                    ))
                })
            }
            _ = cancel.cancelled() => {
                self.release(&job, worker)?;
                return Ok(DownloadOutcome::Released);
            }
        };
        metrics::record_download_duration(&job.service, started.elapsed());

        match result {
            Ok(file) => {
                self.complete(&job, worker, &file.path, file.size)?;
                Ok(DownloadOutcome::Completed {
                    path: file.path,
                    size: file.size,
                })
            }
            Err(error) => self.fail(&job, worker, &error),
        }
    }

    /// How long a worker may hold a job before recovery takes it back.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.settings.lease_timeout_secs)
    }

    pub fn get_job(&self, id: i64) -> PipelineResult<DownloadJob> {
        self.store
            .get_download_job(id)?
            .ok_or_else(|| PipelineError::not_found("download job", id))
    }

    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> PipelineResult<Vec<DownloadJob>> {
        Ok(self.store.list_download_jobs(status, limit, offset)?)
    }

    /// Puts a permanently failed job back in the queue with a fresh attempt
    /// budget.
    pub fn retry_failed(&self, id: i64) -> PipelineResult<DownloadJob> {
        let job = self.get_job(id)?;
        if job.status != JobStatus::Failed {
            return Err(PipelineError::InvalidState(format!(
                "download job {} is {}, only failed jobs can be retried",
                id,
                job.status.as_db_str()
            )));
        }
        if !self.store.requeue_failed_download(id, self.clock.now())? {
            return Err(PipelineError::DuplicateJob {
                video_id: job.video_id,
            });
        }
        info!("Re-queued failed download job {}", id);
        self.get_job(id)
    }

    pub fn stats(&self) -> PipelineResult<DownloadQueueStats> {
        let stats = self.store.download_queue_stats()?;
        metrics::set_download_queue_depth(&stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::download_queue::{DownloadedFile, Downloader};
    use crate::pipeline_store::{
        NewSource, SettingsStore, SqlitePipelineStore, VideoMetadata, VideoStatus,
    };
    use async_trait::async_trait;

    const T0: i64 = 1_700_000_000;

    fn queue() -> (DownloadQueue, Arc<SqlitePipelineStore>, ManualClock, EventBus) {
        queue_with(DownloadQueueSettings::default())
    }

    fn queue_with(
        settings: DownloadQueueSettings,
    ) -> (DownloadQueue, Arc<SqlitePipelineStore>, ManualClock, EventBus) {
        let store = Arc::new(SqlitePipelineStore::in_memory().unwrap());
        let clock = ManualClock::new(T0);
        let events = EventBus::new();
        let queue = DownloadQueue::new(
            store.clone(),
            Arc::new(clock.clone()),
            settings,
            events.clone(),
        );
        (queue, store, clock, events)
    }

    fn video(id: &str) -> NewVideo {
        NewVideo {
            video_id: id.to_string(),
            source_id: None,
            original_url: format!("https://videos.example/{}", id),
            metadata: VideoMetadata::default(),
            duration_secs: None,
        }
    }

    fn transient() -> DownloadError {
        DownloadError::new(DownloadErrorKind::Connection, "connection reset")
    }

    #[test]
    fn register_checks_source() {
        let (queue, store, _, _) = queue();
        let mut v = video("a");
        v.source_id = Some("src".into());
        assert!(matches!(
            queue.register_video(&v),
            Err(PipelineError::NotFound { entity: "source", .. })
        ));

        store
            .upsert_source(
                &NewSource {
                    source_id: "src".into(),
                    source_type: "hashtag".into(),
                    source_value: "#cats".into(),
                    configuration: None,
                },
                T0,
            )
            .unwrap();
        assert!(queue.register_video(&v).unwrap());
        assert!(!queue.register_video(&v).unwrap());
    }

    #[test]
    fn enqueue_maps_store_outcomes() {
        let (queue, _, _, _) = queue();
        queue.register_video(&video("a")).unwrap();

        let job = queue.enqueue("a", "https://x/a", 1).unwrap();
        assert_eq!(job.service, "http");
        assert!(matches!(
            queue.enqueue("a", "https://x/a", 1),
            Err(PipelineError::DuplicateJob { .. })
        ));
        assert!(matches!(
            queue.enqueue("nope", "https://x/nope", 1),
            Err(PipelineError::NotFound { entity: "video", .. })
        ));

        let leased = queue.lease_next("w").unwrap().unwrap();
        queue
            .complete(&leased, "w", Path::new("/tmp/a.mp4"), 5)
            .unwrap();
        assert!(matches!(
            queue.enqueue("a", "https://x/a", 1),
            Err(PipelineError::InvalidState(_))
        ));
    }

    #[test]
    fn retries_with_backoff_then_fails_terminally() {
        let (queue, store, clock, events) = queue();
        let mut rx = events.subscribe();
        queue.register_video(&video("a")).unwrap();
        queue.enqueue("a", "https://x/a", 0).unwrap();

        let job = queue.lease_next("w").unwrap().unwrap();
        assert_eq!(
            queue.fail(&job, "w", &transient()).unwrap(),
            DownloadOutcome::Retrying {
                attempts: 1,
                next_attempt_at: T0 + 30
            }
        );
        assert_eq!(
            store.get_video("a").unwrap().unwrap().status,
            VideoStatus::Pending
        );
        // gated by backoff
        assert!(queue.lease_next("w").unwrap().is_none());

        clock.advance_secs(30);
        let job = queue.lease_next("w").unwrap().unwrap();
        assert_eq!(
            queue.fail(&job, "w", &transient()).unwrap(),
            DownloadOutcome::Retrying {
                attempts: 2,
                next_attempt_at: T0 + 30 + 60
            }
        );

        clock.advance_secs(60);
        let job = queue.lease_next("w").unwrap().unwrap();
        assert_eq!(
            queue.fail(&job, "w", &transient()).unwrap(),
            DownloadOutcome::Failed { attempts: 3 }
        );
        assert_eq!(
            store.get_video("a").unwrap().unwrap().status,
            VideoStatus::Failed
        );

        match rx.try_recv().unwrap() {
            LifecycleEvent::DownloadFailed(e) => {
                assert_eq!(e.attempts, 3);
                assert_eq!(e.video_id, "a");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn not_found_fails_immediately() {
        let (queue, _, _, _) = queue();
        queue.register_video(&video("a")).unwrap();
        queue.enqueue("a", "https://x/a", 0).unwrap();
        let job = queue.lease_next("w").unwrap().unwrap();
        let gone = DownloadError::new(DownloadErrorKind::NotFound, "404");
        assert_eq!(
            queue.fail(&job, "w", &gone).unwrap(),
            DownloadOutcome::Failed { attempts: 1 }
        );
    }

    #[test]
    fn lost_lease_is_rejected() {
        let (queue, _, clock, _) = queue();
        queue.register_video(&video("a")).unwrap();
        queue.enqueue("a", "https://x/a", 0).unwrap();
        let job = queue.lease_next("w1").unwrap().unwrap();

        clock.advance_secs(601);
        assert_eq!(queue.release_expired_leases(clock.now()).unwrap(), 1);
        let again = queue.lease_next("w2").unwrap().unwrap();
        assert_eq!(again.attempts, 0);

        assert!(matches!(
            queue.complete(&job, "w1", Path::new("/tmp/a.mp4"), 1),
            Err(PipelineError::InvalidState(_))
        ));
        queue
            .complete(&again, "w2", Path::new("/tmp/a.mp4"), 1)
            .unwrap();
    }

    #[test]
    fn retry_failed_resets_attempts() {
        let (queue, _, _, _) = queue();
        queue.register_video(&video("a")).unwrap();
        let job = queue.enqueue("a", "https://x/a", 0).unwrap();
        assert!(matches!(
            queue.retry_failed(job.id),
            Err(PipelineError::InvalidState(_))
        ));

        let leased = queue.lease_next("w").unwrap().unwrap();
        let gone = DownloadError::new(DownloadErrorKind::NotFound, "404");
        queue.fail(&leased, "w", &gone).unwrap();

        let requeued = queue.retry_failed(job.id).unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.attempts, 0);
        assert_eq!(queue.stats().unwrap().pending, 1);
    }

    #[test]
    fn max_concurrent_prefers_settings_table() {
        let (queue, store, _, _) = queue();
        assert_eq!(queue.max_concurrent(), 3);
        store
            .set_setting("download_queue", "max_concurrent", "5", false, T0)
            .unwrap();
        assert_eq!(queue.max_concurrent(), 5);
    }

    struct Stalling;

    #[async_trait]
    impl Downloader for Stalling {
        fn name(&self) -> &str {
            "http"
        }
        async fn download(&self, _: &DownloadRequest) -> Result<DownloadedFile, DownloadError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancelled_download_releases_lease() {
        let (queue, _, _, _) = queue();
        queue.register_video(&video("a")).unwrap();
        queue.enqueue("a", "https://x/a", 0).unwrap();
        let job = queue.lease_next("w").unwrap().unwrap();

        let mut registry = DownloaderRegistry::new();
        registry.register(Arc::new(Stalling));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = queue.process(&registry, job, "w", &cancel).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Released);
        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.in_progress, 0);
    }

    #[tokio::test]
    async fn stalled_download_gives_up_when_lease_runs_out() {
        let (queue, store, _, _) = queue_with(DownloadQueueSettings {
            lease_timeout_secs: 1,
            ..Default::default()
        });
        queue.register_video(&video("a")).unwrap();
        queue.enqueue("a", "https://x/a", 0).unwrap();
        let job = queue.lease_next("w").unwrap().unwrap();

        let mut registry = DownloaderRegistry::new();
        registry.register(Arc::new(Stalling));
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            queue.process(&registry, job.clone(), "w", &CancellationToken::new()),
        )
        .await
        .expect("download outlived its lease")
        .unwrap();

        assert!(matches!(outcome, DownloadOutcome::Retrying { attempts: 1, .. }));
        let stored = queue.get_job(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.lease_owner.is_none());
        assert_eq!(
            store.get_video("a").unwrap().unwrap().status,
            VideoStatus::Pending
        );
    }

    #[tokio::test]
    async fn unknown_service_fails_without_retry() {
        let (queue, _, _, _) = queue();
        queue.register_video(&video("a")).unwrap();
        queue
            .enqueue_with_service("a", "https://x/a", 0, "carrier-pigeon")
            .unwrap();
        let job = queue.lease_next("w").unwrap().unwrap();
        let outcome = queue
            .process(&DownloaderRegistry::new(), job, "w", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Failed { attempts: 1 });
    }
}
