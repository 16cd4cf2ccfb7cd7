//! Fixtures shared by the coordinator and job tests.

use super::context::{JobContext, PipelineComponents};
use super::job::HookEvent;
use crate::clock::{Clock, ManualClock};
use crate::config::{DownloadQueueSettings, PostSchedulerSettings, StorageSettings};
use crate::download_queue::{
    DownloadError, DownloadErrorKind, DownloadQueue, DownloadRequest, DownloadedFile, Downloader,
    DownloaderRegistry,
};
use crate::events::EventBus;
use crate::pipeline_store::{
    DownloadQueueStore, NewVideo, SqlitePipelineStore, VideoMetadata, VideoStore,
};
use crate::post_scheduler::{PostScheduler, PublishError, PublishRequest, Publisher};
use crate::storage::{BlobStore, FsBlobStore, LocalTier, StorageTierManager};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const T0: i64 = 1_700_000_000;

/// Writes a small file into the local tier instead of downloading.
pub struct FileDownloader {
    name: String,
    local: LocalTier,
    fail_with: Option<DownloadErrorKind>,
}

impl FileDownloader {
    pub fn new(name: &str, root: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            local: LocalTier::new(root),
            fail_with: None,
        }
    }

    pub fn failing(mut self, kind: DownloadErrorKind) -> Self {
        self.fail_with = Some(kind);
        self
    }
}

#[async_trait]
impl Downloader for FileDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadedFile, DownloadError> {
        if let Some(kind) = self.fail_with {
            return Err(DownloadError::new(kind, "scripted failure"));
        }
        let path = self.local.path_for(&request.video_id, ".mp4");
        tokio::fs::create_dir_all(self.local.root())
            .await
            .map_err(|e| DownloadError::new(DownloadErrorKind::Storage, e.to_string()))?;
        tokio::fs::write(&path, b"video-bytes")
            .await
            .map_err(|e| DownloadError::new(DownloadErrorKind::Storage, e.to_string()))?;
        Ok(DownloadedFile { path, size: 11 })
    }
}

/// Accepts every post and remembers what it was asked to publish.
#[derive(Default)]
pub struct RecordingPublisher {
    pub requests: Mutex<Vec<PublishRequest>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(format!("remote-{}", request.post_id))
    }
}

pub struct TestPipeline {
    pub dir: TempDir,
    pub store: Arc<SqlitePipelineStore>,
    pub clock: ManualClock,
    pub events: EventBus,
    pub components: PipelineComponents,
}

/// A pipeline with a filesystem durable tier, no downloaders and no publisher.
pub fn pipeline() -> TestPipeline {
    TestPipeline::with_dir(TempDir::new().unwrap(), DownloaderRegistry::new(), None)
}

pub fn test_components(dir: &TempDir, clock: &ManualClock) -> PipelineComponents {
    let store = Arc::new(SqlitePipelineStore::in_memory().unwrap());
    build_components(dir, store, clock, EventBus::new(), DownloaderRegistry::new(), None)
}

fn build_components(
    dir: &TempDir,
    store: Arc<SqlitePipelineStore>,
    clock: &ManualClock,
    events: EventBus,
    downloaders: DownloaderRegistry,
    publisher: Option<Arc<dyn Publisher>>,
) -> PipelineComponents {
    let blobs = FsBlobStore::new(dir.path().join("durable"), "videos");
    std::fs::create_dir_all(blobs.container_dir()).unwrap();
    let storage = Arc::new(StorageTierManager::new(
        store.clone(),
        Some(Arc::new(blobs) as Arc<dyn BlobStore>),
        LocalTier::new(dir.path().join("videos")),
        StorageSettings::default(),
        Arc::new(clock.clone()),
        events.clone(),
    ));
    let download_queue = Arc::new(DownloadQueue::new(
        store.clone(),
        Arc::new(clock.clone()),
        DownloadQueueSettings::default(),
        events.clone(),
    ));
    let post_scheduler = Arc::new(PostScheduler::new(
        store.clone(),
        Arc::new(clock.clone()),
        PostSchedulerSettings::default(),
        events.clone(),
        storage.clone(),
        publisher,
    ));
    PipelineComponents {
        store,
        clock: Arc::new(clock.clone()),
        download_queue,
        downloaders: Arc::new(downloaders),
        post_scheduler,
        storage,
        events,
    }
}

impl TestPipeline {
    pub fn with_dir(
        dir: TempDir,
        downloaders: DownloaderRegistry,
        publisher: Option<Arc<dyn Publisher>>,
    ) -> Self {
        let store = Arc::new(SqlitePipelineStore::in_memory().unwrap());
        let clock = ManualClock::new(T0);
        let events = EventBus::new();
        let components = build_components(
            &dir,
            store.clone(),
            &clock,
            events.clone(),
            downloaders,
            publisher,
        );
        Self {
            dir,
            store,
            clock,
            events,
            components,
        }
    }

    pub fn add_video(&self, video_id: &str) {
        self.store
            .insert_video(
                &NewVideo {
                    video_id: video_id.to_string(),
                    source_id: None,
                    original_url: format!("https://videos.example/{}", video_id),
                    metadata: VideoMetadata::default(),
                    duration_secs: None,
                },
                self.clock.now(),
            )
            .unwrap();
    }

    /// Registers a video and walks it through a successful download.
    pub fn add_downloaded_video(&self, video_id: &str) -> PathBuf {
        self.add_video(video_id);
        let now = self.clock.now();
        let job = match self
            .store
            .insert_download_job(video_id, "https://videos.example/x", 0, "http", now)
            .unwrap()
        {
            crate::pipeline_store::EnqueueOutcome::Inserted(job) => job,
            other => panic!("unexpected {:?}", other),
        };
        self.store.lease_next_download("fixture", now, 60).unwrap();
        let local = self.components.storage.local();
        std::fs::create_dir_all(local.root()).unwrap();
        let path = local.path_for(video_id, ".mp4");
        std::fs::write(&path, b"video-bytes").unwrap();
        self.store
            .complete_download(job.id, "fixture", &path.to_string_lossy(), 11, now)
            .unwrap();
        path
    }

    /// A job context over these components plus the hook receiver.
    pub fn context(&self) -> (JobContext, mpsc::Receiver<HookEvent>) {
        let (hook_tx, hook_rx) = mpsc::channel(16);
        let ctx = JobContext::new(CancellationToken::new(), self.components.clone(), hook_tx);
        (ctx, hook_rx)
    }
}
