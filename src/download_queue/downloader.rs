use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// What a downloader is asked to fetch.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub job_id: i64,
    pub video_id: String,
    pub url: String,
}

/// A finished download sitting at its final local path.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    Connection,
    Timeout,
    /// The content is gone for good.
    NotFound,
    HttpStatus,
    /// Writing to the local tier failed.
    Storage,
    /// No downloader is registered for the job's service.
    UnknownService,
    Unknown,
}

impl DownloadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadErrorKind::Connection => "connection",
            DownloadErrorKind::Timeout => "timeout",
            DownloadErrorKind::NotFound => "not_found",
            DownloadErrorKind::HttpStatus => "http_status",
            DownloadErrorKind::Storage => "storage",
            DownloadErrorKind::UnknownService => "unknown_service",
            DownloadErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadError {
    pub kind: DownloadErrorKind,
    pub message: String,
}

impl DownloadError {
    pub fn new(kind: DownloadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            DownloadErrorKind::NotFound | DownloadErrorKind::UnknownService
        )
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for DownloadError {}

/// Fetches a video into the local tier.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Matches the `service` column of download jobs.
    fn name(&self) -> &str;

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadedFile, DownloadError>;
}

/// Downloaders by service name.
#[derive(Default, Clone)]
pub struct DownloaderRegistry {
    downloaders: HashMap<String, Arc<dyn Downloader>>,
}

impl DownloaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any downloader already registered under the same name.
    pub fn register(&mut self, downloader: Arc<dyn Downloader>) {
        self.downloaders
            .insert(downloader.name().to_string(), downloader);
    }

    pub fn get(&self, service: &str) -> Option<Arc<dyn Downloader>> {
        self.downloaders.get(service).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.downloaders.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.downloaders.is_empty()
    }
}
