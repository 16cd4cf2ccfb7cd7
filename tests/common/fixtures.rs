use super::constants::{SERVICE, VIDEO_BYTES};
use async_trait::async_trait;
use reposter_server::download_queue::{
    DownloadError, DownloadErrorKind, DownloadRequest, DownloadedFile, Downloader,
};
use reposter_server::post_scheduler::{PublishError, PublishRequest, Publisher};
use reposter_server::storage::{
    BlobInfo, BlobMetadata, BlobStore, FsBlobStore, LocalTier, StorageError, StorageResult,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Writes a fixed payload into the local tier, or fails for videos it was
/// told to fail.
pub struct ScriptedDownloader {
    local: LocalTier,
    failures: Mutex<HashMap<String, DownloadErrorKind>>,
    pub calls: AtomicUsize,
}

impl ScriptedDownloader {
    pub fn new(local: LocalTier) -> Self {
        Self {
            local,
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, video_id: &str, kind: DownloadErrorKind) {
        self.failures
            .lock()
            .unwrap()
            .insert(video_id.to_string(), kind);
    }

    pub fn heal(&self, video_id: &str) {
        self.failures.lock().unwrap().remove(video_id);
    }
}

#[async_trait]
impl Downloader for ScriptedDownloader {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadedFile, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.failures.lock().unwrap().get(&request.video_id).copied();
        if let Some(kind) = failure {
            return Err(DownloadError::new(kind, "scripted failure"));
        }
        let storage_error = |e: std::io::Error| DownloadError::new(DownloadErrorKind::Storage, e.to_string());
        self.local.ensure_dirs().await.map_err(storage_error)?;
        let path = self.local.path_for(&request.video_id, ".mp4");
        tokio::fs::write(&path, VIDEO_BYTES)
            .await
            .map_err(storage_error)?;
        Ok(DownloadedFile {
            path,
            size: VIDEO_BYTES.len() as u64,
        })
    }
}

/// Accepts every post unless told to reject it.
#[derive(Default)]
pub struct RecordingPublisher {
    pub requests: Mutex<Vec<PublishRequest>>,
    reject: Mutex<HashSet<String>>,
}

impl RecordingPublisher {
    /// Every publish for `video_id` fails with a retryable error.
    pub fn reject(&self, video_id: &str) {
        self.reject.lock().unwrap().insert(video_id.to_string());
    }

    pub fn published_videos(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.video_id.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        if self.reject.lock().unwrap().contains(&request.video_id) {
            return Err(PublishError::retryable("platform rejected the upload"));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(format!("remote-{}", request.post_id))
    }
}

/// Filesystem blob store whose deletes fail for selected keys.
pub struct FlakyBlobStore {
    inner: FsBlobStore,
    failing_deletes: Mutex<HashSet<String>>,
}

impl FlakyBlobStore {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: FsBlobStore::new(root, "videos"),
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_deletes.lock().unwrap().clear();
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    fn container(&self) -> &str {
        self.inner.container()
    }

    async fn ensure_container(&self) -> StorageResult<()> {
        self.inner.ensure_container().await
    }

    async fn put(&self, key: &str, path: &Path, metadata: &BlobMetadata) -> StorageResult<u64> {
        self.inner.put(key, path, metadata).await
    }

    async fn head(&self, key: &str) -> StorageResult<Option<BlobInfo>> {
        self.inner.head(key).await
    }

    async fn fetch(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        self.inner.fetch(key, dest).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(StorageError::delete_failed(format!("scripted failure for {}", key)));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<BlobInfo>> {
        self.inner.list(prefix).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}
