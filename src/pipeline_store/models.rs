//! Rows of the pipeline database and their status machines.

use serde::{Deserialize, Serialize};

/// Lifecycle of a discovery source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Paused,
    Error,
}

impl SourceStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Paused => "paused",
            SourceStatus::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SourceStatus::Active),
            "paused" => Some(SourceStatus::Paused),
            "error" => Some(SourceStatus::Error),
            _ => None,
        }
    }
}

/// A configured place videos are discovered from (an account, a hashtag...).
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub source_id: String,
    pub source_type: String,
    pub source_value: String,
    pub configuration: Option<serde_json::Value>,
    pub status: SourceStatus,
    pub last_scraped_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub source_id: String,
    pub source_type: String,
    pub source_value: String,
    pub configuration: Option<serde_json::Value>,
}

/// Where a video is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Pending,
    Downloading,
    Downloaded,
    Posting,
    Posted,
    Failed,
    Expired,
}

impl VideoStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Downloading => "downloading",
            VideoStatus::Downloaded => "downloaded",
            VideoStatus::Posting => "posting",
            VideoStatus::Posted => "posted",
            VideoStatus::Failed => "failed",
            VideoStatus::Expired => "expired",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VideoStatus::Pending),
            "downloading" => Some(VideoStatus::Downloading),
            "downloaded" => Some(VideoStatus::Downloaded),
            "posting" => Some(VideoStatus::Posting),
            "posted" => Some(VideoStatus::Posted),
            "failed" => Some(VideoStatus::Failed),
            "expired" => Some(VideoStatus::Expired),
            _ => None,
        }
    }

    /// True once a local artifact exists and has not been reaped.
    pub fn has_artifact(&self) -> bool {
        matches!(
            self,
            VideoStatus::Downloaded | VideoStatus::Posting | VideoStatus::Posted
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

/// A video as handed over by the discovery producer.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub video_id: String,
    pub source_id: Option<String>,
    pub original_url: String,
    pub metadata: VideoMetadata,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Video {
    pub video_id: String,
    pub source_id: Option<String>,
    pub original_url: String,
    /// Set once the download completed.
    pub local_path: Option<String>,
    /// Blob key in the durable tier, set on promotion.
    pub durable_path: Option<String>,
    pub metadata: VideoMetadata,
    pub status: VideoStatus,
    pub file_size: Option<u64>,
    pub duration_secs: Option<i64>,
    pub durable_uploaded_at: Option<i64>,
    pub durable_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Status of a download queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed, // terminal
    Failed,    // terminal
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A download queue entry.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadJob {
    pub id: i64,
    pub video_id: String,
    pub url: String,
    /// Higher runs first.
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: u32,
    /// Name of the downloader service that handles this job.
    pub service: String,
    pub error_message: Option<String>,
    /// Backoff gate: the job is not leased before this time.
    pub next_attempt_at: Option<i64>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

/// Result of trying to insert a download job.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Inserted(DownloadJob),
    /// A pending or in-progress job already exists for the video.
    Duplicate,
    UnknownVideo,
    /// The video is past the download stage (downloaded, posted, expired...).
    NotEnqueueable(VideoStatus),
}

/// Status of a scheduled post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Queued,
    Posting,
    Posted, // terminal
    Failed, // terminal
}

impl PostStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Posted | PostStatus::Failed)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            PostStatus::Queued => "queued",
            PostStatus::Posting => "posting",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(PostStatus::Queued),
            "posting" => Some(PostStatus::Posting),
            "posted" => Some(PostStatus::Posted),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledPost {
    pub id: i64,
    pub video_id: String,
    /// Destination account on the publishing platform.
    pub account: String,
    pub scheduled_time: i64,
    pub status: PostStatus,
    pub attempts: u32,
    /// Remote identifier assigned by the platform once published.
    pub post_id: Option<String>,
    pub caption: Option<String>,
    pub error_message: Option<String>,
    pub next_attempt_at: Option<i64>,
    pub lease_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub posted_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Setting {
    pub category: String,
    pub key: String,
    pub value: String,
    pub encrypted: bool,
    pub updated_at: i64,
}

/// Placeholder returned instead of the value of encrypted settings in listings.
pub const REDACTED_VALUE: &str = "***";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DownloadQueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PostStats {
    pub queued: usize,
    pub posting: usize,
    pub posted: usize,
    pub failed: usize,
}
