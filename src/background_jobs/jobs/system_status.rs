//! System status reporting.
//!
//! Announces the pipeline as online once the coordinator starts. The
//! coordinator reports it offline on shutdown with [`system_status`].

use crate::background_jobs::{
    context::{JobContext, PipelineComponents},
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use crate::events::{LifecycleEvent, SystemState, SystemStatus};
use async_trait::async_trait;
use tracing::warn;

/// Builds a status event. `check_durable` checks the durable tier instead of only
/// reporting whether one is configured.
pub async fn system_status(
    components: &PipelineComponents,
    state: SystemState,
    check_durable: bool,
    message: Option<String>,
) -> SystemStatus {
    let storage = &components.storage;
    let durable_tier = if !storage.is_durable_enabled() {
        "disabled"
    } else if !check_durable {
        "enabled"
    } else {
        match storage.health_check().await {
            Ok(()) => "ok",
            Err(e) => {
                warn!("Durable tier health check failed: {}", e);
                "unavailable"
            }
        }
    };
    SystemStatus {
        state,
        durable_tier: durable_tier.to_string(),
        publisher_configured: components.post_scheduler.can_publish(),
        message,
        at: components.clock.now(),
    }
}

pub struct SystemStatusJob;

#[async_trait]
impl BackgroundJob for SystemStatusJob {
    fn id(&self) -> &'static str {
        "system_status"
    }

    fn name(&self) -> &'static str {
        "System Status"
    }

    fn description(&self) -> &'static str {
        "Announce that the pipeline is online"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Hook(HookEvent::OnStartup)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let status = system_status(&ctx.components, SystemState::Online, true, None).await;
        ctx.events().emit(LifecycleEvent::SystemStatus(status));
        Ok(())
    }
}
