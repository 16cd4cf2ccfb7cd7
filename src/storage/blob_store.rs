use super::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const META_ORIGINAL_PATH: &str = "original_path";
const META_UPLOAD_DATE: &str = "upload_date";
const META_RETENTION_DATE: &str = "retention_date";

/// Metadata attached to every promoted blob.
///
/// Dates are informational copies. The expiry recorded on the video row is
/// the one the reaper acts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub original_path: String,
    /// Unix seconds.
    pub upload_date: i64,
    /// Unix seconds.
    pub retention_date: i64,
}

fn rfc3339(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn parse_rfc3339(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp())
}

impl BlobMetadata {
    /// Flat string map, the shape object stores accept as user metadata.
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (META_ORIGINAL_PATH.to_string(), self.original_path.clone()),
            (META_UPLOAD_DATE.to_string(), rfc3339(self.upload_date)),
            (META_RETENTION_DATE.to_string(), rfc3339(self.retention_date)),
        ])
    }

    pub fn from_map(map: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            original_path: map.get(META_ORIGINAL_PATH)?.clone(),
            upload_date: parse_rfc3339(map.get(META_UPLOAD_DATE)?)?,
            retention_date: parse_rfc3339(map.get(META_RETENTION_DATE)?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobInfo {
    pub key: String,
    pub size: u64,
    /// Unix seconds.
    pub last_modified: Option<i64>,
    pub metadata: Option<BlobMetadata>,
}

/// A flat key/value container of video files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name for logs ("filesystem", "s3").
    fn backend(&self) -> &'static str;

    fn container(&self) -> &str;

    /// Creates the container if it does not exist yet.
    async fn ensure_container(&self) -> StorageResult<()>;

    /// Uploads the file at `path` under `key`, replacing any existing blob.
    /// Returns the stored size.
    async fn put(&self, key: &str, path: &Path, metadata: &BlobMetadata) -> StorageResult<u64>;

    async fn head(&self, key: &str) -> StorageResult<Option<BlobInfo>>;

    /// Copies the blob to `dest`, creating parent directories.
    async fn fetch(&self, key: &str, dest: &Path) -> StorageResult<u64>;

    /// Backends may report a missing blob as `NotFound` or as success;
    /// callers treat both the same.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn list(&self, prefix: &str) -> StorageResult<Vec<BlobInfo>>;

    async fn health_check(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_survives_string_map() {
        let meta = BlobMetadata {
            original_path: "/media/videos/a.mp4".into(),
            upload_date: 1_700_000_000,
            retention_date: 1_700_604_800,
        };
        let map = meta.to_map();
        assert_eq!(map["upload_date"], "2023-11-14T22:13:20+00:00");
        assert_eq!(BlobMetadata::from_map(&map), Some(meta));
    }

    #[test]
    fn incomplete_metadata_is_ignored() {
        let map = HashMap::from([("original_path".to_string(), "x".to_string())]);
        assert_eq!(BlobMetadata::from_map(&map), None);
    }
}
