//! Download drain background job.
//!
//! Leases pending download jobs and runs them through their downloaders
//! with a bounded pool of workers until nothing eligible is left.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::download_queue::DownloadOutcome;
use crate::error::PipelineResult;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct DrainTally {
    completed: usize,
    retrying: usize,
    failed: usize,
    released: usize,
    errors: usize,
}

impl DrainTally {
    fn merge(&mut self, other: DrainTally) {
        self.completed += other.completed;
        self.retrying += other.retrying;
        self.failed += other.failed;
        self.released += other.released;
        self.errors += other.errors;
    }

    fn processed(&self) -> usize {
        self.completed + self.retrying + self.failed + self.released
    }
}

pub struct DownloadDrainJob {
    interval: Duration,
}

impl DownloadDrainJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

/// One worker: lease, download, record, repeat.
async fn drain_worker(ctx: &JobContext, worker: String) -> PipelineResult<DrainTally> {
    let queue = ctx.download_queue();
    let mut tally = DrainTally::default();

    while !ctx.is_cancelled() {
        let Some(job) = queue.lease_next(&worker)? else {
            break;
        };
        let job_id = job.id;
        match queue
            .process(ctx.downloaders(), job, &worker, &ctx.cancellation_token)
            .await
        {
            Ok(DownloadOutcome::Completed { .. }) => tally.completed += 1,
            Ok(DownloadOutcome::Retrying { .. }) => tally.retrying += 1,
            Ok(DownloadOutcome::Failed { .. }) => tally.failed += 1,
            Ok(DownloadOutcome::Released) => tally.released += 1,
            Err(e) => {
                warn!("Worker {} could not finish download job {}: {}", worker, job_id, e);
                tally.errors += 1;
            }
        }
    }
    Ok(tally)
}

#[async_trait]
impl BackgroundJob for DownloadDrainJob {
    fn id(&self) -> &'static str {
        "download_drain"
    }

    fn name(&self) -> &'static str {
        "Download Drain"
    }

    fn description(&self) -> &'static str {
        "Download pending videos into the local tier"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Interrupted downloads give their lease back.
        ShutdownBehavior::Cancellable
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let workers = ctx.download_queue().max_concurrent();
        let run_id = Uuid::new_v4().simple().to_string();
        let results: Vec<PipelineResult<DrainTally>> = stream::iter(0..workers)
            .map(|n| drain_worker(ctx, format!("drain-{}-{}", &run_id[..8], n)))
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut tally = DrainTally::default();
        let mut worker_errors = Vec::new();
        for result in results {
            match result {
                Ok(worker_tally) => tally.merge(worker_tally),
                Err(e) => worker_errors.push(e.to_string()),
            }
        }

        if tally.completed > 0 {
            ctx.fire_hook(HookEvent::OnDownloadComplete);
        }
        if tally.processed() > 0 {
            info!(
                "Download drain: {} completed, {} retrying, {} failed, {} released",
                tally.completed, tally.retrying, tally.failed, tally.released
            );
        } else {
            debug!("Download drain: nothing to do");
        }
        if let Err(e) = ctx.download_queue().stats() {
            warn!("Failed to refresh download queue stats: {}", e);
        }

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if !worker_errors.is_empty() {
            return Err(JobError::ExecutionFailed(worker_errors.join("; ")));
        }
        if tally.errors > 0 {
            return Err(JobError::ExecutionFailed(format!(
                "{} download jobs could not be recorded",
                tally.errors
            )));
        }
        Ok(())
    }
}
