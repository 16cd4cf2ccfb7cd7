use super::models::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};

/// Receives every lifecycle event.
///
/// There is one required method per event kind, so adding a kind breaks
/// every handler until it decides what to do with it.
#[async_trait]
pub trait LifecycleEventHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn download_completed(&self, event: &DownloadCompleted) -> Result<()>;
    async fn download_failed(&self, event: &DownloadFailed) -> Result<()>;
    async fn video_promoted(&self, event: &VideoPromoted) -> Result<()>;
    async fn post_succeeded(&self, event: &PostSucceeded) -> Result<()>;
    async fn post_failed(&self, event: &PostFailed) -> Result<()>;
    async fn reaper_summary(&self, event: &ReaperSummary) -> Result<()>;
    async fn daily_summary(&self, event: &DailySummary) -> Result<()>;
    async fn system_status(&self, event: &SystemStatus) -> Result<()>;
}

/// Routes `event` to the matching handler method.
pub async fn handle_event(handler: &dyn LifecycleEventHandler, event: &LifecycleEvent) -> Result<()> {
    match event {
        LifecycleEvent::DownloadCompleted(e) => handler.download_completed(e).await,
        LifecycleEvent::DownloadFailed(e) => handler.download_failed(e).await,
        LifecycleEvent::VideoPromoted(e) => handler.video_promoted(e).await,
        LifecycleEvent::PostSucceeded(e) => handler.post_succeeded(e).await,
        LifecycleEvent::PostFailed(e) => handler.post_failed(e).await,
        LifecycleEvent::ReaperSummary(e) => handler.reaper_summary(e).await,
        LifecycleEvent::DailySummary(e) => handler.daily_summary(e).await,
        LifecycleEvent::SystemStatus(e) => handler.system_status(e).await,
    }
}

/// Writes every event to the log.
pub struct TracingEventHandler;

#[async_trait]
impl LifecycleEventHandler for TracingEventHandler {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn download_completed(&self, e: &DownloadCompleted) -> Result<()> {
        info!(
            video_id = %e.video_id,
            job_id = e.job_id,
            bytes = e.file_size,
            "Download completed: {}",
            e.local_path
        );
        Ok(())
    }

    async fn download_failed(&self, e: &DownloadFailed) -> Result<()> {
        error!(
            video_id = %e.video_id,
            job_id = e.job_id,
            attempts = e.attempts,
            "Download failed permanently: {}",
            e.reason
        );
        Ok(())
    }

    async fn video_promoted(&self, e: &VideoPromoted) -> Result<()> {
        info!(
            video_id = %e.video_id,
            expires_at = e.expires_at,
            "Video promoted to durable tier as {}",
            e.durable_path
        );
        Ok(())
    }

    async fn post_succeeded(&self, e: &PostSucceeded) -> Result<()> {
        info!(
            video_id = %e.video_id,
            account = %e.account,
            "Post {} published as {}",
            e.post_id,
            e.remote_post_id
        );
        Ok(())
    }

    async fn post_failed(&self, e: &PostFailed) -> Result<()> {
        error!(
            video_id = %e.video_id,
            account = %e.account,
            attempts = e.attempts,
            "Post {} failed permanently: {}",
            e.post_id,
            e.reason
        );
        Ok(())
    }

    async fn reaper_summary(&self, e: &ReaperSummary) -> Result<()> {
        if e.errors > 0 {
            warn!(
                "Storage reaper finished with errors: {} deleted, {} errors, {} total",
                e.deleted, e.errors, e.total
            );
        } else {
            info!(
                "Storage reaper finished: {} deleted of {}",
                e.deleted, e.total
            );
        }
        Ok(())
    }

    async fn daily_summary(&self, e: &DailySummary) -> Result<()> {
        info!(
            downloads_pending = e.downloads.pending,
            downloads_completed = e.downloads.completed,
            posts_queued = e.posts.queued,
            posts_posted = e.posts.posted,
            durable_files = e.durable_files,
            "Daily summary: {} errors on record",
            e.errors
        );
        Ok(())
    }

    async fn system_status(&self, e: &SystemStatus) -> Result<()> {
        info!(
            durable_tier = %e.durable_tier,
            publisher = e.publisher_configured,
            "Pipeline {:?}{}",
            e.state,
            e.message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
        );
        Ok(())
    }
}

/// Forwards events an operator reads to an external notification service
/// as JSON: failures, published posts, summaries and status changes.
///
/// Message rendering and delivery (email, chat...) belong to that service.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, url })
    }

    async fn send(&self, event: LifecycleEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .context("Failed to reach notification webhook")?;
        if !response.status().is_success() {
            anyhow::bail!(
                "Notification webhook rejected {} event with status {}",
                event.kind(),
                response.status()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl LifecycleEventHandler for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn download_completed(&self, _e: &DownloadCompleted) -> Result<()> {
        Ok(())
    }

    async fn download_failed(&self, e: &DownloadFailed) -> Result<()> {
        self.send(LifecycleEvent::DownloadFailed(e.clone())).await
    }

    async fn video_promoted(&self, _e: &VideoPromoted) -> Result<()> {
        Ok(())
    }

    async fn post_succeeded(&self, e: &PostSucceeded) -> Result<()> {
        self.send(LifecycleEvent::PostSucceeded(e.clone())).await
    }

    async fn post_failed(&self, e: &PostFailed) -> Result<()> {
        self.send(LifecycleEvent::PostFailed(e.clone())).await
    }

    async fn reaper_summary(&self, e: &ReaperSummary) -> Result<()> {
        if e.errors == 0 {
            return Ok(());
        }
        self.send(LifecycleEvent::ReaperSummary(e.clone())).await
    }

    async fn daily_summary(&self, e: &DailySummary) -> Result<()> {
        self.send(LifecycleEvent::DailySummary(e.clone())).await
    }

    async fn system_status(&self, e: &SystemStatus) -> Result<()> {
        self.send(LifecycleEvent::SystemStatus(e.clone())).await
    }
}
