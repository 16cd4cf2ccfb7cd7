//! Promotion background job.
//!
//! Copies downloaded videos into the durable tier and tags them with
//! their retention expiry. Runs on an interval and right after a drain
//! that completed downloads.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::storage::PromotionSweep;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

const BATCH_SIZE: usize = 50;

pub struct PromotionJob {
    interval: Duration,
}

impl PromotionJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl BackgroundJob for PromotionJob {
    fn id(&self) -> &'static str {
        "promotion"
    }

    fn name(&self) -> &'static str {
        "Durable Promotion"
    }

    fn description(&self) -> &'static str {
        "Upload downloaded videos to the durable tier"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnDownloadComplete],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let storage = ctx.storage();
        if !storage.is_durable_enabled() {
            debug!("Durable tier disabled, skipping promotion");
            return Ok(());
        }

        let mut total = PromotionSweep::default();
        loop {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let sweep = storage.promote_pending(BATCH_SIZE).await?;
            let progress = sweep.promoted + sweep.already_promoted;
            let seen = progress + sweep.failed;
            total.promoted += sweep.promoted;
            total.already_promoted += sweep.already_promoted;
            total.failed += sweep.failed;
            // Failed videos come back in the next batch; stop once a batch
            // makes no progress.
            if progress == 0 || seen < BATCH_SIZE {
                break;
            }
        }

        if total.promoted + total.already_promoted + total.failed > 0 {
            info!(
                "Promotion: {} promoted, {} already durable, {} failed",
                total.promoted, total.already_promoted, total.failed
            );
        }
        if total.failed > 0 {
            return Err(JobError::ExecutionFailed(format!(
                "{} videos could not be promoted",
                total.failed
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::test_support;
    use crate::pipeline_store::VideoStore;
    use crate::storage::blob_key;

    #[tokio::test]
    async fn promotes_every_downloaded_video() {
        let pipeline = test_support::pipeline();
        pipeline.add_downloaded_video("a");
        pipeline.add_downloaded_video("b");
        pipeline.add_video("not-downloaded");
        let (ctx, _) = pipeline.context();

        PromotionJob::new(Duration::from_secs(60))
            .execute(&ctx)
            .await
            .unwrap();

        for id in ["a", "b"] {
            let video = pipeline.store.get_video(id).unwrap().unwrap();
            assert_eq!(
                video.durable_path.as_deref(),
                Some(blob_key(id, ".mp4").as_str())
            );
            assert_eq!(
                video.durable_expires_at,
                Some(test_support::T0 + 7 * 86_400)
            );
        }
        let untouched = pipeline.store.get_video("not-downloaded").unwrap().unwrap();
        assert!(untouched.durable_path.is_none());
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let pipeline = test_support::pipeline();
        pipeline.add_downloaded_video("a");
        let (ctx, _) = pipeline.context();
        let job = PromotionJob::new(Duration::from_secs(60));

        job.execute(&ctx).await.unwrap();
        let first = pipeline.store.get_video("a").unwrap().unwrap();
        pipeline.clock.advance_days(1);
        job.execute(&ctx).await.unwrap();
        let second = pipeline.store.get_video("a").unwrap().unwrap();

        assert_eq!(first.durable_uploaded_at, second.durable_uploaded_at);
        assert_eq!(first.durable_expires_at, second.durable_expires_at);
    }

    #[test]
    fn listens_to_download_completion() {
        let schedule = PromotionJob::new(Duration::from_secs(60)).schedule();
        assert!(schedule.listens_to(HookEvent::OnDownloadComplete));
        assert_eq!(schedule.interval(), Some(Duration::from_secs(60)));
    }
}
