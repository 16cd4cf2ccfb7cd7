use super::models::*;
use anyhow::Result;

/// Discovery sources. Only read by the queue to tag provenance.
pub trait SourceStore: Send + Sync {
    fn upsert_source(&self, source: &NewSource, now: i64) -> Result<()>;
    fn get_source(&self, source_id: &str) -> Result<Option<Source>>;
    fn list_sources(&self, status: Option<SourceStatus>) -> Result<Vec<Source>>;
    fn set_source_status(&self, source_id: &str, status: SourceStatus) -> Result<bool>;
    fn record_source_scraped(&self, source_id: &str, now: i64) -> Result<bool>;
}

pub trait VideoStore: Send + Sync {
    /// Inserts a video in `pending`. Returns false if the id is already known.
    fn insert_video(&self, video: &NewVideo, now: i64) -> Result<bool>;

    fn get_video(&self, video_id: &str) -> Result<Option<Video>>;

    fn list_videos(
        &self,
        status: Option<VideoStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Video>>;

    /// Records the durable location of a video. Refused (false) unless the
    /// video has a local path and no durable path yet.
    fn set_video_durable(
        &self,
        video_id: &str,
        durable_path: &str,
        uploaded_at: i64,
        expires_at: i64,
        now: i64,
    ) -> Result<bool>;

    /// Videos with a local artifact that have not been promoted yet.
    fn list_unpromoted_videos(&self, limit: usize) -> Result<Vec<Video>>;

    /// Promoted videos whose expiry is at or before `now` and that are not
    /// already expired. Videos mid-publish are left alone.
    fn list_expired_videos(&self, now: i64, limit: usize) -> Result<Vec<Video>>;

    fn mark_video_expired(&self, video_id: &str, now: i64) -> Result<bool>;

    fn set_local_path(&self, video_id: &str, local_path: &str, now: i64) -> Result<bool>;

    fn clear_local_path(&self, video_id: &str, now: i64) -> Result<bool>;

    /// Recomputes `durable_expires_at = durable_uploaded_at + retention_secs`
    /// for every promoted, non-expired video. Returns the number of rows touched.
    fn retag_durable_expiry(&self, retention_secs: i64, now: i64) -> Result<usize>;
}

pub trait DownloadQueueStore: Send + Sync {
    fn insert_download_job(
        &self,
        video_id: &str,
        url: &str,
        priority: i32,
        service: &str,
        now: i64,
    ) -> Result<EnqueueOutcome>;

    fn get_download_job(&self, id: i64) -> Result<Option<DownloadJob>>;

    fn list_download_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DownloadJob>>;

    /// Atomically leases the best eligible pending job (PENDING → IN_PROGRESS)
    /// and marks its video `downloading`.
    fn lease_next_download(
        &self,
        worker: &str,
        now: i64,
        lease_secs: i64,
    ) -> Result<Option<DownloadJob>>;

    /// The lease-holding transitions below only apply while `worker` still
    /// owns the lease; false means the lease was lost.
    fn complete_download(
        &self,
        id: i64,
        worker: &str,
        local_path: &str,
        file_size: u64,
        now: i64,
    ) -> Result<bool>;

    fn retry_download(
        &self,
        id: i64,
        worker: &str,
        attempts: u32,
        next_attempt_at: i64,
        error: &str,
        now: i64,
    ) -> Result<bool>;

    fn fail_download(
        &self,
        id: i64,
        worker: &str,
        attempts: u32,
        error: &str,
        now: i64,
    ) -> Result<bool>;

    /// Returns a leased job to pending without consuming an attempt.
    fn release_download(&self, id: i64, worker: &str, now: i64) -> Result<bool>;

    fn release_expired_downloads(&self, now: i64) -> Result<usize>;

    /// Puts a failed job back to pending with its attempts reset.
    fn requeue_failed_download(&self, id: i64, now: i64) -> Result<bool>;

    fn download_queue_stats(&self) -> Result<DownloadQueueStats>;
}

pub trait PostStore: Send + Sync {
    fn insert_post(
        &self,
        video_id: &str,
        account: &str,
        scheduled_time: i64,
        caption: Option<&str>,
        now: i64,
    ) -> Result<ScheduledPost>;

    fn get_post(&self, id: i64) -> Result<Option<ScheduledPost>>;

    fn list_posts(
        &self,
        status: Option<PostStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ScheduledPost>>;

    /// A page of queued posts due at `now`, ordered by `(scheduled_time, id)`
    /// and starting strictly after `after`.
    fn list_due_posts(
        &self,
        now: i64,
        after: Option<(i64, i64)>,
        limit: usize,
    ) -> Result<Vec<ScheduledPost>>;

    /// QUEUED → POSTING. The video moves to `posting` if it was `downloaded`.
    /// Returns the claimed row as stored, `None` if the post was not queued.
    fn claim_post(&self, id: i64, now: i64, lease_secs: i64) -> Result<Option<ScheduledPost>>;

    fn complete_post(&self, id: i64, post_id: &str, now: i64) -> Result<bool>;

    fn retry_post(
        &self,
        id: i64,
        attempts: u32,
        next_attempt_at: i64,
        error: &str,
        now: i64,
    ) -> Result<bool>;

    fn fail_post(&self, id: i64, attempts: u32, error: &str, now: i64) -> Result<bool>;

    /// Only applies while the post is queued and never attempted.
    fn reschedule_post(&self, id: i64, scheduled_time: i64, now: i64) -> Result<bool>;

    fn cancel_post(&self, id: i64, now: i64) -> Result<bool>;

    fn release_expired_posts(&self, now: i64) -> Result<usize>;

    fn post_stats(&self) -> Result<PostStats>;
}

pub trait SettingsStore: Send + Sync {
    fn set_setting(
        &self,
        category: &str,
        key: &str,
        value: &str,
        encrypted: bool,
        now: i64,
    ) -> Result<()>;

    fn get_setting(&self, category: &str, key: &str) -> Result<Option<Setting>>;

    /// Encrypted values come back as [`REDACTED_VALUE`].
    fn list_settings(&self, category: Option<&str>) -> Result<Vec<Setting>>;

    fn delete_setting(&self, category: &str, key: &str) -> Result<bool>;
}

/// Everything the pipeline persists, behind one handle.
pub trait FullPipelineStore:
    SourceStore + VideoStore + DownloadQueueStore + PostStore + SettingsStore
{
}

impl<T> FullPipelineStore for T where
    T: SourceStore + VideoStore + DownloadQueueStore + PostStore + SettingsStore
{
}
