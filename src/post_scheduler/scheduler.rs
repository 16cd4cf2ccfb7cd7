use super::publisher::{PublishError, PublishRequest, Publisher};
use crate::clock::Clock;
use crate::config::PostSchedulerSettings;
use crate::error::{ErrorClass, PipelineError, PipelineResult};
use crate::events::{EventBus, LifecycleEvent, PostFailed, PostSucceeded};
use crate::pipeline_store::runtime_settings::{setting_or, POST_MAX_CONCURRENT};
use crate::pipeline_store::{
    FullPipelineStore, PostStats, PostStatus, PostStore, ScheduledPost, VideoStore,
};
use crate::retry_policy::RetryPolicy;
use crate::server::metrics;
use crate::storage::StorageTierManager;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Posted { remote_post_id: String },
    Retrying { attempts: u32, next_attempt_at: i64 },
    Failed { attempts: u32 },
    /// The post was no longer queued when we tried to claim it.
    Skipped,
}

/// Lazily pages through posts that are due, oldest schedule first.
///
/// The set is bounded by the `now` given at creation and the cursor only
/// moves forward, so iteration always ends. Creating a new iterator starts
/// over from the beginning.
pub struct DuePosts<'a> {
    store: &'a dyn FullPipelineStore,
    now: i64,
    page_size: usize,
    cursor: Option<(i64, i64)>,
    buffer: VecDeque<ScheduledPost>,
    exhausted: bool,
}

impl<'a> DuePosts<'a> {
    fn fetch_page(&mut self) -> PipelineResult<()> {
        let page = self
            .store
            .list_due_posts(self.now, self.cursor, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some((last.scheduled_time, last.id));
        }
        self.buffer.extend(page);
        Ok(())
    }

    /// `(scheduled_time, id)` of the last post fetched.
    pub fn cursor(&self) -> Option<(i64, i64)> {
        self.cursor
    }
}

impl Iterator for DuePosts<'_> {
    type Item = PipelineResult<ScheduledPost>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Publishes downloaded videos at their scheduled time.
///
/// Post states: `queued → posting → posted | failed`, with failed attempts
/// going back to `queued` until the retry budget runs out.
pub struct PostScheduler {
    store: Arc<dyn FullPipelineStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    settings: PostSchedulerSettings,
    events: EventBus,
    storage: Arc<StorageTierManager>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl PostScheduler {
    pub fn new(
        store: Arc<dyn FullPipelineStore>,
        clock: Arc<dyn Clock>,
        settings: PostSchedulerSettings,
        events: EventBus,
        storage: Arc<StorageTierManager>,
        publisher: Option<Arc<dyn Publisher>>,
    ) -> Self {
        if publisher.is_none() {
            warn!("No publisher configured, scheduled posts will not be dispatched");
        }
        Self {
            policy: RetryPolicy::new(&settings.retry),
            store,
            clock,
            settings,
            events,
            storage,
            publisher,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn can_publish(&self) -> bool {
        self.publisher.is_some()
    }

    pub fn max_concurrent(&self) -> usize {
        setting_or(
            self.store.as_ref(),
            POST_MAX_CONCURRENT,
            self.settings.max_concurrent,
            |n| *n > 0,
        )
    }

    fn check_schedule_time(&self, when: i64) -> PipelineResult<()> {
        let earliest = self.clock.now() - self.settings.schedule_grace_secs as i64;
        if when < earliest {
            return Err(PipelineError::InvalidSchedule(format!(
                "scheduled time {} is in the past",
                when
            )));
        }
        Ok(())
    }

    pub fn schedule(
        &self,
        video_id: &str,
        account: &str,
        when: i64,
        caption: Option<&str>,
    ) -> PipelineResult<ScheduledPost> {
        if account.trim().is_empty() {
            return Err(PipelineError::InvalidSchedule(
                "account must not be empty".to_string(),
            ));
        }
        self.check_schedule_time(when)?;
        let video = self
            .store
            .get_video(video_id)?
            .ok_or_else(|| PipelineError::not_found("video", video_id))?;
        if !video.status.has_artifact() {
            return Err(PipelineError::InvalidSchedule(format!(
                "video {} has no downloaded artifact ({})",
                video_id,
                video.status.as_db_str()
            )));
        }

        let post = self
            .store
            .insert_post(video_id, account, when, caption, self.clock.now())?;
        info!(
            video_id,
            account,
            post_id = post.id,
            "Scheduled post for {}",
            when
        );
        Ok(post)
    }

    /// Queued posts due at `now` whose backoff has elapsed.
    pub fn due_jobs(&self, now: i64) -> DuePosts<'_> {
        DuePosts {
            store: self.store.as_ref(),
            now,
            page_size: self.settings.page_size.max(1),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Claims `post` and hands it to the publisher.
    pub async fn dispatch(&self, post: &ScheduledPost) -> PipelineResult<DispatchOutcome> {
        let Some(publisher) = &self.publisher else {
            return Err(PipelineError::Configuration(
                "no publisher configured".to_string(),
            ));
        };
        let Some(claimed) = self.store.claim_post(
            post.id,
            self.clock.now(),
            self.settings.lease_timeout_secs as i64,
        )?
        else {
            debug!("Post {} is no longer queued, skipping", post.id);
            return Ok(DispatchOutcome::Skipped);
        };

        // Restoring media and publishing both have to finish inside the
        // lease. Past it, lease recovery requeues the post and it could go
        // live twice.
        let lease = self.lease_duration();
        let started = Instant::now();
        let result = match tokio::time::timeout(lease, self.publish(publisher.as_ref(), &claimed))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::retryable(format!(
                "publish did not finish within its {}s lease",
                lease.as_secs()
            ))),
        };
        metrics::record_publish_duration(started.elapsed());

        match result {
            Ok(remote_post_id) => self.record_success(&claimed, remote_post_id),
            Err(error) => self.record_failure(&claimed, &error),
        }
    }

    /// How long a claimed post may stay in `posting`.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.settings.lease_timeout_secs)
    }

    async fn publish(
        &self,
        publisher: &dyn Publisher,
        post: &ScheduledPost,
    ) -> Result<String, PublishError> {
        let request = self.prepare(post).await.map_err(|e| {
            if e.class() == ErrorClass::Transient {
                PublishError::retryable(e.to_string())
            } else {
                PublishError::permanent(e.to_string())
            }
        })?;
        publisher.publish(&request).await
    }

    async fn prepare(&self, post: &ScheduledPost) -> PipelineResult<PublishRequest> {
        let video = self
            .store
            .get_video(&post.video_id)?
            .ok_or_else(|| PipelineError::not_found("video", &post.video_id))?;
        let media_path = self.storage.restore_local(&video).await?;
        Ok(PublishRequest {
            post_id: post.id,
            video_id: post.video_id.clone(),
            account: post.account.clone(),
            caption: post.caption.clone(),
            media_path,
            metadata: video.metadata,
        })
    }

    fn record_success(
        &self,
        post: &ScheduledPost,
        remote_post_id: String,
    ) -> PipelineResult<DispatchOutcome> {
        let now = self.clock.now();
        if !self.store.complete_post(post.id, &remote_post_id, now)? {
            error!(
                "Post {} was published as {} but its lease was lost",
                post.id, remote_post_id
            );
            return Err(PipelineError::InvalidState(format!(
                "post {} is no longer posting",
                post.id
            )));
        }
        metrics::record_post_outcome("posted");
        self.events.emit(LifecycleEvent::PostSucceeded(PostSucceeded {
            post_id: post.id,
            video_id: post.video_id.clone(),
            account: post.account.clone(),
            remote_post_id: remote_post_id.clone(),
            at: now,
        }));
        Ok(DispatchOutcome::Posted { remote_post_id })
    }

    fn record_failure(
        &self,
        post: &ScheduledPost,
        error: &PublishError,
    ) -> PipelineResult<DispatchOutcome> {
        let now = self.clock.now();
        let attempts = post.attempts + 1;

        if error.retryable && self.policy.should_retry(attempts) {
            let next_attempt_at = self.policy.next_attempt_at(now, attempts);
            if !self
                .store
                .retry_post(post.id, attempts, next_attempt_at, &error.message, now)?
            {
                return Err(PipelineError::InvalidState(format!(
                    "post {} is no longer posting",
                    post.id
                )));
            }
            warn!(
                video_id = %post.video_id,
                account = %post.account,
                attempts,
                "Publish of post {} failed, retrying in {}s: {}",
                post.id,
                next_attempt_at - now,
                error
            );
            metrics::record_post_outcome("retrying");
            return Ok(DispatchOutcome::Retrying {
                attempts,
                next_attempt_at,
            });
        }

        if !self
            .store
            .fail_post(post.id, attempts, &error.message, now)?
        {
            return Err(PipelineError::InvalidState(format!(
                "post {} is no longer posting",
                post.id
            )));
        }
        metrics::record_post_outcome("failed");
        self.events.emit(LifecycleEvent::PostFailed(PostFailed {
            post_id: post.id,
            video_id: post.video_id.clone(),
            account: post.account.clone(),
            attempts,
            reason: error.message.clone(),
            at: now,
        }));
        Ok(DispatchOutcome::Failed { attempts })
    }

    /// Moves a queued, never-attempted post to a new time.
    pub fn reschedule(&self, post_id: i64, when: i64) -> PipelineResult<ScheduledPost> {
        self.check_schedule_time(when)?;
        let post = self.get_post(post_id)?;
        if !self
            .store
            .reschedule_post(post_id, when, self.clock.now())?
        {
            return Err(PipelineError::InvalidState(format!(
                "post {} is {} after {} attempts and can no longer be rescheduled",
                post_id,
                post.status.as_db_str(),
                post.attempts
            )));
        }
        self.get_post(post_id)
    }

    /// Withdraws a queued post. It ends as `failed` with reason `cancelled`.
    pub fn cancel(&self, post_id: i64) -> PipelineResult<()> {
        let post = self.get_post(post_id)?;
        if !self.store.cancel_post(post_id, self.clock.now())? {
            return Err(PipelineError::InvalidState(format!(
                "post {} is {} and cannot be cancelled",
                post_id,
                post.status.as_db_str()
            )));
        }
        info!("Cancelled post {}", post_id);
        Ok(())
    }

    /// Returns posts stuck in `posting` past their lease to `queued`.
    pub fn release_expired_leases(&self, now: i64) -> PipelineResult<usize> {
        let released = self.store.release_expired_posts(now)?;
        if released > 0 {
            warn!("Recovered {} posts with expired leases", released);
        }
        Ok(released)
    }

    pub fn get_post(&self, post_id: i64) -> PipelineResult<ScheduledPost> {
        self.store
            .get_post(post_id)?
            .ok_or_else(|| PipelineError::not_found("post", post_id))
    }

    pub fn list_posts(
        &self,
        status: Option<PostStatus>,
        limit: usize,
        offset: usize,
    ) -> PipelineResult<Vec<ScheduledPost>> {
        Ok(self.store.list_posts(status, limit, offset)?)
    }

    pub fn stats(&self) -> PipelineResult<PostStats> {
        let stats = self.store.post_stats()?;
        metrics::set_post_queue_depth(&stats);
        Ok(stats)
    }
}
