//! Lease recovery background job.
//!
//! Returns download jobs and posts whose worker lease expired to the
//! queue, and refreshes the queue depth gauges. Also runs at startup to
//! pick up work left behind by a previous process.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub struct LeaseRecoveryJob {
    interval: Duration,
}

impl LeaseRecoveryJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl BackgroundJob for LeaseRecoveryJob {
    fn id(&self) -> &'static str {
        "lease_recovery"
    }

    fn name(&self) -> &'static str {
        "Lease Recovery"
    }

    fn description(&self) -> &'static str {
        "Requeue downloads and posts whose lease expired"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let now = ctx.clock().now();
        let downloads = ctx.download_queue().release_expired_leases(now)?;
        let posts = ctx.post_scheduler().release_expired_leases(now)?;
        if downloads + posts > 0 {
            info!(
                "Lease recovery: {} downloads and {} posts back in the queue",
                downloads, posts
            );
        } else {
            debug!("Lease recovery: no expired leases");
        }

        ctx.download_queue().stats()?;
        ctx.post_scheduler().stats()?;
        Ok(())
    }
}
