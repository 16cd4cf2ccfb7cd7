//! Post scheduler: time-ordered publishing of downloaded videos.

mod http_publisher;
mod publisher;
mod scheduler;

pub use http_publisher::HttpPublisher;
pub use publisher::{PublishError, PublishRequest, Publisher};
pub use scheduler::{DispatchOutcome, DuePosts, PostScheduler};
