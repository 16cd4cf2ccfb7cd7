//! Storage reaper background job.
//!
//! Deletes durable artifacts whose retention expired and marks their
//! videos `expired`. Runs once a day by default.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

pub struct StorageReaperJob {
    interval: Duration,
}

impl StorageReaperJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl BackgroundJob for StorageReaperJob {
    fn id(&self) -> &'static str {
        "storage_reaper"
    }

    fn name(&self) -> &'static str {
        "Storage Reaper"
    }

    fn description(&self) -> &'static str {
        "Delete durable artifacts past their retention"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Whatever is left is picked up on the next run.
        ShutdownBehavior::Cancellable
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let storage = ctx.storage();
        if !storage.is_durable_enabled() {
            debug!("Durable tier disabled, skipping reaper");
            return Ok(());
        }

        let report = tokio::select! {
            report = storage.reap(ctx.clock().now()) => report?,
            _ = ctx.cancellation_token.cancelled() => return Err(JobError::Cancelled),
        };

        // Refreshes the durable usage gauges.
        if let Err(e) = storage.stats().await {
            warn!("Failed to collect storage stats: {}", e);
        }

        if report.errors > 0 {
            return Err(JobError::ExecutionFailed(format!(
                "{} of {} expired artifacts could not be reaped",
                report.errors, report.total
            )));
        }
        Ok(())
    }
}
