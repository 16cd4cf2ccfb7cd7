use crate::pipeline_store::VideoMetadata;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    pub post_id: i64,
    pub video_id: String,
    pub account: String,
    pub caption: Option<String>,
    /// Local copy of the video, restored from the durable tier if needed.
    pub media_path: PathBuf,
    pub metadata: VideoMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishError {
    pub retryable: bool,
    pub message: String,
}

impl PublishError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PublishError {}

/// Posts a video to the destination platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the platform's id for the new post.
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError>;
}
