//! Post dispatch background job.
//!
//! Publishes every queued post that is due, a bounded number at a time.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::error::PipelineResult;
use crate::post_scheduler::DispatchOutcome;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PostDispatchJob {
    interval: Duration,
}

impl PostDispatchJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl BackgroundJob for PostDispatchJob {
    fn id(&self) -> &'static str {
        "post_dispatch"
    }

    fn name(&self) -> &'static str {
        "Post Dispatch"
    }

    fn description(&self) -> &'static str {
        "Publish scheduled posts that are due"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // A publish cut off halfway may already be live on the platform.
        ShutdownBehavior::WaitForCompletion
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let scheduler = ctx.post_scheduler();
        if !scheduler.can_publish() {
            debug!("No publisher configured, skipping post dispatch");
            return Ok(());
        }

        let now = ctx.clock().now();
        let concurrency = scheduler.max_concurrent();
        let cancel = &ctx.cancellation_token;

        // Posts already in flight finish on shutdown, no new ones start.
        let outcomes: Vec<PipelineResult<Option<DispatchOutcome>>> =
            stream::iter(scheduler.due_jobs(now))
                .map(move |due| async move {
                    let post = due?;
                    if cancel.is_cancelled() {
                        return Ok(None);
                    }
                    scheduler.dispatch(&post).await.map(Some)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let (mut posted, mut retrying, mut failed, mut skipped) = (0, 0, 0, 0);
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(Some(DispatchOutcome::Posted { .. })) => posted += 1,
                Ok(Some(DispatchOutcome::Retrying { .. })) => retrying += 1,
                Ok(Some(DispatchOutcome::Failed { .. })) => failed += 1,
                Ok(Some(DispatchOutcome::Skipped)) | Ok(None) => skipped += 1,
                Err(e) => {
                    warn!("Post dispatch error: {}", e);
                    errors.push(e.to_string());
                }
            }
        }

        if posted + retrying + failed > 0 {
            info!(
                "Post dispatch: {} posted, {} retrying, {} failed, {} skipped",
                posted, retrying, failed, skipped
            );
        }
        if !errors.is_empty() {
            return Err(JobError::ExecutionFailed(errors.join("; ")));
        }
        Ok(())
    }
}
