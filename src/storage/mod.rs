//! Storage tiers for video artifacts.

mod blob_store;
mod error;
mod fs_blob_store;
mod local_tier;
mod s3_blob_store;
mod tier_manager;

pub use blob_store::{BlobInfo, BlobMetadata, BlobStore};
pub use error::{StorageError, StorageResult};
pub use fs_blob_store::FsBlobStore;
pub use local_tier::{extension_of, sanitize_id, LocalTier};
pub use s3_blob_store::{S3BlobConfig, S3BlobStore};
pub use tier_manager::{
    blob_key, PromoteOutcome, PromotionSweep, ReapReport, StorageStats, StorageTierManager,
};

use crate::config::DurableTierSettings;
use std::sync::Arc;

/// Builds the durable backend described by `settings`.
pub async fn durable_from_settings(
    settings: &DurableTierSettings,
) -> StorageResult<Arc<dyn BlobStore>> {
    Ok(match settings {
        DurableTierSettings::Filesystem { root, container } => {
            Arc::new(FsBlobStore::new(root, container.clone()))
        }
        DurableTierSettings::S3 {
            bucket,
            endpoint_url,
            region,
            access_key_id,
            secret_access_key,
        } => Arc::new(
            S3BlobStore::new(S3BlobConfig {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint_url: endpoint_url.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
            })
            .await?,
        ),
    })
}
