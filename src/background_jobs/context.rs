use super::job::HookEvent;
use crate::clock::Clock;
use crate::download_queue::{DownloadQueue, DownloaderRegistry};
use crate::events::EventBus;
use crate::pipeline_store::FullPipelineStore;
use crate::post_scheduler::PostScheduler;
use crate::storage::StorageTierManager;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The pipeline components the jobs drive.
#[derive(Clone)]
pub struct PipelineComponents {
    pub store: Arc<dyn FullPipelineStore>,
    pub clock: Arc<dyn Clock>,
    pub download_queue: Arc<DownloadQueue>,
    pub downloaders: Arc<DownloaderRegistry>,
    pub post_scheduler: Arc<PostScheduler>,
    pub storage: Arc<StorageTierManager>,
    pub events: EventBus,
}

/// Context provided to jobs during execution.
///
/// Every execution gets its own child cancellation token.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,
    pub components: PipelineComponents,
    hook_sender: mpsc::Sender<HookEvent>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        components: PipelineComponents,
        hook_sender: mpsc::Sender<HookEvent>,
    ) -> Self {
        Self {
            cancellation_token,
            components,
            hook_sender,
        }
    }

    /// Same components, different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            components: self.components.clone(),
            hook_sender: self.hook_sender.clone(),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Asks the coordinator to run the jobs listening to `event`.
    /// Dropped when the coordinator is backed up.
    pub fn fire_hook(&self, event: HookEvent) {
        if self.hook_sender.try_send(event).is_err() {
            debug!("Hook {} dropped, coordinator busy or stopped", event);
        }
    }

    pub fn store(&self) -> &Arc<dyn FullPipelineStore> {
        &self.components.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.components.clock
    }

    pub fn download_queue(&self) -> &Arc<DownloadQueue> {
        &self.components.download_queue
    }

    pub fn downloaders(&self) -> &Arc<DownloaderRegistry> {
        &self.components.downloaders
    }

    pub fn post_scheduler(&self) -> &Arc<PostScheduler> {
        &self.components.post_scheduler
    }

    pub fn storage(&self) -> &Arc<StorageTierManager> {
        &self.components.storage
    }

    pub fn events(&self) -> &EventBus {
        &self.components.events
    }
}
