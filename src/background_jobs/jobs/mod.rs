//! The pipeline's periodic work, one `BackgroundJob` per concern.

pub mod daily_summary;
pub mod download_drain;
pub mod lease_recovery;
pub mod post_dispatch;
pub mod promotion;
pub mod storage_reaper;
pub mod system_status;

pub use daily_summary::DailySummaryJob;
pub use download_drain::DownloadDrainJob;
pub use lease_recovery::LeaseRecoveryJob;
pub use post_dispatch::PostDispatchJob;
pub use promotion::PromotionJob;
pub use storage_reaper::StorageReaperJob;
pub use system_status::{system_status, SystemStatusJob};
