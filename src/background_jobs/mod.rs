//! Lifecycle coordination: the periodic jobs that move videos through the
//! pipeline, and the coordinator that schedules them.

mod context;
mod coordinator;
mod handle;
mod job;
pub mod jobs;
#[cfg(test)]
pub(crate) mod test_support;

pub use context::{JobContext, PipelineComponents};
pub use coordinator::{create_coordinator, LifecycleCoordinator};
pub use handle::{CoordinatorHandle, JobInfo, JobRunInfo, JobScheduleInfo};
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
