//! Repost pipeline engine library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod clock;
pub mod config;
pub mod download_queue;
pub mod error;
pub mod events;
pub mod pipeline_store;
pub mod post_scheduler;
pub mod retry_policy;
pub mod server;
pub mod sqlite_persistence;
pub mod storage;

// Re-export commonly used types for convenience
pub use background_jobs::{create_coordinator, CoordinatorHandle, PipelineComponents};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PipelineError, PipelineResult};
pub use pipeline_store::{FullPipelineStore, SqlitePipelineStore};
pub use server::run_server;
