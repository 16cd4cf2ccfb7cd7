//! Common test infrastructure
//!
//! Integration tests build a complete pipeline over a temporary directory
//! with scripted downloaders, publishers and blob stores, and drive time
//! through a [`ManualClock`](reposter_server::clock::ManualClock).
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPipeline;
//!
//! #[tokio::test]
//! async fn test_download() {
//!     let pipeline = TestPipeline::new();
//!     pipeline.register("a");
//!     pipeline.queue().enqueue("a", "https://videos.example/a", 0).unwrap();
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fixtures;
mod pipeline;
mod server;
mod webhook;

pub use constants::*;
pub use fixtures::{FlakyBlobStore, RecordingPublisher, ScriptedDownloader};
pub use pipeline::{drain_events, TestPipeline};
#[allow(unused_imports)]
pub use server::TestServer;
#[allow(unused_imports)]
pub use webhook::WebhookReceiver;
