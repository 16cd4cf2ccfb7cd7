//! Daily summary background job.
//!
//! Emits a `DailySummary` event built from the queue, post and storage
//! statistics. Notifiers decide how it is rendered.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::events::{DailySummary, LifecycleEvent};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct DailySummaryJob {
    interval: Duration,
}

impl DailySummaryJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

/// Current totals across the pipeline.
pub async fn build_summary(ctx: &JobContext) -> Result<DailySummary, JobError> {
    let downloads = ctx.download_queue().stats()?;
    let posts = ctx.post_scheduler().stats()?;
    let storage = ctx.storage().stats().await?;
    Ok(DailySummary {
        errors: downloads.failed + posts.failed,
        downloads,
        posts,
        durable_files: storage.total_files,
        durable_size_bytes: storage.total_size_bytes,
        at: ctx.clock().now(),
    })
}

#[async_trait]
impl BackgroundJob for DailySummaryJob {
    fn id(&self) -> &'static str {
        "daily_summary"
    }

    fn name(&self) -> &'static str {
        "Daily Summary"
    }

    fn description(&self) -> &'static str {
        "Report queue, post and storage totals"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let summary = build_summary(ctx).await?;
        debug!(
            "Daily summary: {} errors, {} durable files",
            summary.errors, summary.durable_files
        );
        ctx.events().emit(LifecycleEvent::DailySummary(summary));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::test_support;
    use crate::download_queue::{DownloadError, DownloadErrorKind};

    #[tokio::test]
    async fn summary_counts_queue_and_failures() {
        let pipeline = test_support::pipeline();
        pipeline.add_downloaded_video("done");
        pipeline.add_video("queued");
        pipeline.add_video("broken");
        let queue = pipeline.components.download_queue.clone();
        queue.enqueue("queued", "https://x/q", 0).unwrap();
        queue.enqueue("broken", "https://x/b", 5).unwrap();
        let leased = queue.lease_next("w").unwrap().unwrap();
        assert_eq!(leased.video_id, "broken");
        queue
            .fail(
                &leased,
                "w",
                &DownloadError::new(DownloadErrorKind::NotFound, "gone"),
            )
            .unwrap();

        let mut rx = pipeline.events.subscribe();
        let (ctx, _) = pipeline.context();
        DailySummaryJob::new(Duration::from_secs(86_400))
            .execute(&ctx)
            .await
            .unwrap();

        let summary = loop {
            match rx.try_recv().unwrap() {
                LifecycleEvent::DailySummary(summary) => break summary,
                _ => continue,
            }
        };
        assert_eq!(summary.downloads.pending, 1);
        assert_eq!(summary.downloads.completed, 1);
        assert_eq!(summary.downloads.failed, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.posts.queued, 0);
        assert_eq!(summary.at, test_support::T0);
    }
}
