use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Shape of the optional TOML configuration file. Every field is optional;
/// whatever is present overrides the corresponding CLI value.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub db_dir: Option<String>,
    pub media_path: Option<String>,
    pub metrics_port: Option<u16>,
    pub downloader_url: Option<String>,
    pub downloader_timeout_sec: Option<u64>,
    pub publisher_url: Option<String>,
    pub publisher_timeout_sec: Option<u64>,
    pub notification_webhook_url: Option<String>,

    pub download_queue: Option<DownloadQueueConfig>,
    pub post_scheduler: Option<PostSchedulerConfig>,
    pub storage: Option<StorageConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DownloadQueueConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub lease_timeout_secs: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub drain_interval_secs: Option<u64>,
    pub default_service: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PostSchedulerConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub lease_timeout_secs: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub dispatch_interval_secs: Option<u64>,
    pub schedule_grace_secs: Option<u64>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub retention_days: Option<u32>,
    pub promotion_interval_secs: Option<u64>,
    pub reaper_interval_hours: Option<u64>,
    pub remove_local_on_expiry: Option<bool>,
    /// `[storage.durable]`; the durable tier is disabled when absent.
    pub durable: Option<DurableTierConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DurableTierConfig {
    Filesystem {
        root: String,
        container: Option<String>,
    },
    S3 {
        bucket: String,
        endpoint_url: Option<String>,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub lease_recovery_interval_secs: Option<u64>,
    pub daily_summary_interval_hours: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
