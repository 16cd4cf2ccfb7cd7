use crate::pipeline_store::{DownloadQueueStats, PostStats};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DownloadCompleted {
    pub job_id: i64,
    pub video_id: String,
    pub local_path: String,
    pub file_size: u64,
    pub at: i64,
}

/// A download that will not be retried.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DownloadFailed {
    pub job_id: i64,
    pub video_id: String,
    pub attempts: u32,
    pub reason: String,
    pub at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VideoPromoted {
    pub video_id: String,
    pub durable_path: String,
    pub expires_at: i64,
    pub at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PostSucceeded {
    pub post_id: i64,
    pub video_id: String,
    pub account: String,
    pub remote_post_id: String,
    pub at: i64,
}

/// A publish that will not be retried.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PostFailed {
    pub post_id: i64,
    pub video_id: String,
    pub account: String,
    pub attempts: u32,
    pub reason: String,
    pub at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReaperSummary {
    pub deleted: usize,
    pub errors: usize,
    pub total: usize,
    pub at: i64,
}

/// Periodic digest of the queues and the durable tier.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailySummary {
    pub downloads: DownloadQueueStats,
    pub posts: PostStats,
    pub durable_files: usize,
    pub durable_size_bytes: u64,
    /// Terminal download and post failures on record.
    pub errors: usize,
    pub at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Online,
    Offline,
}

/// Reported when the pipeline comes up and when it goes down.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemStatus {
    pub state: SystemState,
    /// `ok`, `unavailable`, `enabled` (not checked) or `disabled`.
    pub durable_tier: String,
    pub publisher_configured: bool,
    pub message: Option<String>,
    pub at: i64,
}

/// Everything the pipeline reports to observers and notifiers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LifecycleEvent {
    DownloadCompleted(DownloadCompleted),
    DownloadFailed(DownloadFailed),
    VideoPromoted(VideoPromoted),
    PostSucceeded(PostSucceeded),
    PostFailed(PostFailed),
    ReaperSummary(ReaperSummary),
    DailySummary(DailySummary),
    SystemStatus(SystemStatus),
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::DownloadCompleted(_) => "download_completed",
            LifecycleEvent::DownloadFailed(_) => "download_failed",
            LifecycleEvent::VideoPromoted(_) => "video_promoted",
            LifecycleEvent::PostSucceeded(_) => "post_succeeded",
            LifecycleEvent::PostFailed(_) => "post_failed",
            LifecycleEvent::ReaperSummary(_) => "reaper_summary",
            LifecycleEvent::DailySummary(_) => "daily_summary",
            LifecycleEvent::SystemStatus(_) => "system_status",
        }
    }

    /// Events an operator should hear about.
    pub fn is_alert(&self) -> bool {
        match self {
            LifecycleEvent::DownloadFailed(_) | LifecycleEvent::PostFailed(_) => true,
            LifecycleEvent::ReaperSummary(summary) => summary.errors > 0,
            LifecycleEvent::SystemStatus(status) => status.state == SystemState::Offline,
            _ => false,
        }
    }
}
