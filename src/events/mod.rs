//! Lifecycle events: what happened to a video, who gets told.

mod bus;
mod dispatcher;
mod handler;
mod models;

pub use bus::EventBus;
pub use dispatcher::EventDispatcher;
pub use handler::{handle_event, LifecycleEventHandler, TracingEventHandler, WebhookNotifier};
pub use models::{
    DailySummary, DownloadCompleted, DownloadFailed, LifecycleEvent, PostFailed, PostSucceeded,
    ReaperSummary, SystemState, SystemStatus, VideoPromoted,
};
