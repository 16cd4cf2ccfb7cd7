//! Persistent state shared by every pipeline component: sources, videos,
//! the download queue, scheduled posts and runtime settings.

mod models;
pub mod runtime_settings;
mod schema;
mod sqlite_store;
mod trait_def;

pub use models::*;
pub use schema::PIPELINE_VERSIONED_SCHEMAS;
pub use sqlite_store::SqlitePipelineStore;
pub use trait_def::{
    DownloadQueueStore, FullPipelineStore, PostStore, SettingsStore, SourceStore, VideoStore,
};
