use super::constants::T0;
use super::fixtures::{FlakyBlobStore, RecordingPublisher, ScriptedDownloader};
use reposter_server::background_jobs::jobs::{
    DailySummaryJob, DownloadDrainJob, LeaseRecoveryJob, PostDispatchJob, PromotionJob,
    StorageReaperJob, SystemStatusJob,
};
use reposter_server::background_jobs::{
    create_coordinator, CoordinatorHandle, LifecycleCoordinator, PipelineComponents,
};
use reposter_server::clock::ManualClock;
use reposter_server::config::{DownloadQueueSettings, PostSchedulerSettings, StorageSettings};
use reposter_server::download_queue::{DownloadQueue, DownloaderRegistry};
use reposter_server::events::{EventBus, LifecycleEvent};
use reposter_server::pipeline_store::{NewVideo, SqlitePipelineStore, Video, VideoMetadata, VideoStore};
use reposter_server::post_scheduler::{PostScheduler, Publisher};
use reposter_server::storage::{BlobStore, LocalTier, StorageTierManager};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A fully wired pipeline over a temporary directory.
pub struct TestPipeline {
    pub dir: TempDir,
    pub clock: ManualClock,
    pub events: EventBus,
    pub store: Arc<SqlitePipelineStore>,
    pub downloader: Arc<ScriptedDownloader>,
    pub publisher: Arc<RecordingPublisher>,
    pub blobs: Arc<FlakyBlobStore>,
    pub components: PipelineComponents,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_settings(DownloadQueueSettings::default(), StorageSettings::default())
    }

    pub fn with_settings(download: DownloadQueueSettings, storage: StorageSettings) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let clock = ManualClock::new(T0);
        let events = EventBus::new();
        let store = Arc::new(SqlitePipelineStore::in_memory().expect("Failed to open store"));

        let local = LocalTier::new(dir.path().join("videos"));
        let blobs = Arc::new(FlakyBlobStore::new(&dir.path().join("durable")));
        std::fs::create_dir_all(dir.path().join("durable").join("videos"))
            .expect("Failed to create durable container");

        let storage = Arc::new(StorageTierManager::new(
            store.clone(),
            Some(blobs.clone() as Arc<dyn BlobStore>),
            local.clone(),
            storage,
            Arc::new(clock.clone()),
            events.clone(),
        ));

        let downloader = Arc::new(ScriptedDownloader::new(local));
        let mut downloaders = DownloaderRegistry::new();
        downloaders.register(downloader.clone());

        let download_queue = Arc::new(DownloadQueue::new(
            store.clone(),
            Arc::new(clock.clone()),
            download,
            events.clone(),
        ));

        let publisher = Arc::new(RecordingPublisher::default());
        let post_scheduler = Arc::new(PostScheduler::new(
            store.clone(),
            Arc::new(clock.clone()),
            PostSchedulerSettings::default(),
            events.clone(),
            storage.clone(),
            Some(publisher.clone() as Arc<dyn Publisher>),
        ));

        let components = PipelineComponents {
            store: store.clone(),
            clock: Arc::new(clock.clone()),
            download_queue,
            downloaders: Arc::new(downloaders),
            post_scheduler,
            storage,
            events: events.clone(),
        };

        Self {
            dir,
            clock,
            events,
            store,
            downloader,
            publisher,
            blobs,
            components,
        }
    }

    pub fn queue(&self) -> &Arc<DownloadQueue> {
        &self.components.download_queue
    }

    pub fn scheduler(&self) -> &Arc<PostScheduler> {
        &self.components.post_scheduler
    }

    pub fn storage(&self) -> &Arc<StorageTierManager> {
        &self.components.storage
    }

    /// Registers a discovered video.
    pub fn register(&self, video_id: &str) {
        let added = self
            .queue()
            .register_video(&NewVideo {
                video_id: video_id.to_string(),
                source_id: None,
                original_url: format!("https://videos.example/{}", video_id),
                metadata: VideoMetadata {
                    title: Some(format!("Video {}", video_id)),
                    ..Default::default()
                },
                duration_secs: Some(15),
            })
            .expect("Failed to register video");
        assert!(added, "video {} registered twice", video_id);
    }

    /// Registers and enqueues a video for download.
    pub fn enqueue(&self, video_id: &str, priority: i32) {
        self.register(video_id);
        self.queue()
            .enqueue(
                video_id,
                &format!("https://videos.example/{}", video_id),
                priority,
            )
            .expect("Failed to enqueue");
    }

    pub fn video(&self, video_id: &str) -> Video {
        self.store
            .get_video(video_id)
            .expect("Failed to read video")
            .unwrap_or_else(|| panic!("video {} not found", video_id))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// A coordinator with every pipeline job registered at production-like
    /// intervals.
    pub async fn coordinator(
        &self,
        shutdown: CancellationToken,
    ) -> (LifecycleCoordinator, CoordinatorHandle) {
        let (mut coordinator, handle) = create_coordinator(self.components.clone(), shutdown);
        coordinator
            .register_job(Arc::new(LeaseRecoveryJob::new(Duration::from_secs(60))))
            .await;
        coordinator
            .register_job(Arc::new(DownloadDrainJob::new(Duration::from_secs(10))))
            .await;
        coordinator
            .register_job(Arc::new(PromotionJob::new(Duration::from_secs(60))))
            .await;
        coordinator
            .register_job(Arc::new(PostDispatchJob::new(Duration::from_secs(30))))
            .await;
        coordinator
            .register_job(Arc::new(StorageReaperJob::new(Duration::from_secs(86_400))))
            .await;
        coordinator
            .register_job(Arc::new(DailySummaryJob::new(Duration::from_secs(86_400))))
            .await;
        coordinator.register_job(Arc::new(SystemStatusJob)).await;
        (coordinator, handle)
    }
}

/// Drains every event currently buffered on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
