mod file_config;

pub use file_config::{
    BackgroundJobsConfig, DownloadQueueConfig, DurableTierConfig, FileConfig,
    PostSchedulerConfig, StorageConfig,
};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that take part in config resolution.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_path: Option<PathBuf>,
    pub metrics_port: u16,
    pub downloader_url: Option<String>,
    pub downloader_timeout_sec: u64,
    pub publisher_url: Option<String>,
    pub publisher_timeout_sec: u64,
    pub notification_webhook_url: Option<String>,
    pub retention_days: Option<u32>,
    pub durable_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// Local tier root; downloads land in `<media_path>/videos`.
    pub media_path: PathBuf,
    pub metrics_port: u16,
    pub downloader_url: Option<String>,
    pub downloader_timeout_sec: u64,
    pub publisher_url: Option<String>,
    pub publisher_timeout_sec: u64,
    /// Alert-worthy lifecycle events are POSTed here when set.
    pub notification_webhook_url: Option<String>,

    pub download_queue: DownloadQueueSettings,
    pub post_scheduler: PostSchedulerSettings,
    pub storage: StorageSettings,
    pub background_jobs: BackgroundJobsSettings,
}

/// Retry knobs shared by the download queue and the post scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Attempts allowed before a job fails terminally.
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct DownloadQueueSettings {
    pub retry: RetrySettings,
    pub lease_timeout_secs: u64,
    /// Upper bound for concurrent downloads; `download_queue.max_concurrent`
    /// in the settings table takes precedence at runtime.
    pub max_concurrent: usize,
    pub drain_interval_secs: u64,
    pub default_service: String,
}

impl Default for DownloadQueueSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings {
                max_attempts: 3,
                initial_backoff_secs: 30,
                max_backoff_secs: 3600,
                backoff_multiplier: 2.0,
            },
            lease_timeout_secs: 600,
            max_concurrent: 3,
            drain_interval_secs: 10,
            default_service: "http".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostSchedulerSettings {
    pub retry: RetrySettings,
    pub lease_timeout_secs: u64,
    pub max_concurrent: usize,
    pub dispatch_interval_secs: u64,
    /// How far in the past a new schedule time may be.
    pub schedule_grace_secs: u64,
    /// Page size used by the due-post iterator.
    pub page_size: usize,
}

impl Default for PostSchedulerSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings {
                max_attempts: 3,
                initial_backoff_secs: 60,
                max_backoff_secs: 3600,
                backoff_multiplier: 2.0,
            },
            lease_timeout_secs: 300,
            max_concurrent: 1,
            dispatch_interval_secs: 30,
            schedule_grace_secs: 60,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DurableTierSettings {
    Filesystem {
        root: PathBuf,
        container: String,
    },
    S3 {
        bucket: String,
        endpoint_url: Option<String>,
        region: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Fallback when `storage.retention_days` is not in the settings table.
    pub retention_days: u32,
    pub promotion_interval_secs: u64,
    pub reaper_interval: Duration,
    pub remove_local_on_expiry: bool,
    /// `None` disables the durable tier.
    pub durable: Option<DurableTierSettings>,
}

pub const DEFAULT_CONTAINER: &str = "reposter-videos";

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            retention_days: 7,
            promotion_interval_secs: 60,
            reaper_interval: Duration::from_secs(24 * 60 * 60),
            remove_local_on_expiry: true,
            durable: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundJobsSettings {
    pub lease_recovery_interval_secs: u64,
    pub daily_summary_interval: Duration,
}

impl Default for BackgroundJobsSettings {
    fn default() -> Self {
        Self {
            lease_recovery_interval_secs: 60,
            daily_summary_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.is_dir() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }

        let media_path = file
            .media_path
            .map(PathBuf::from)
            .or_else(|| cli.media_path.clone())
            .unwrap_or_else(|| db_dir.join("media"));

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let downloader_url = file.downloader_url.or_else(|| cli.downloader_url.clone());
        let downloader_timeout_sec = file
            .downloader_timeout_sec
            .unwrap_or(cli.downloader_timeout_sec);
        let publisher_url = file.publisher_url.or_else(|| cli.publisher_url.clone());
        let publisher_timeout_sec = file
            .publisher_timeout_sec
            .unwrap_or(cli.publisher_timeout_sec);
        let notification_webhook_url = file
            .notification_webhook_url
            .or_else(|| cli.notification_webhook_url.clone());

        let dq_defaults = DownloadQueueSettings::default();
        let dq_file = file.download_queue.unwrap_or_default();
        let download_queue = DownloadQueueSettings {
            retry: RetrySettings {
                max_attempts: dq_file
                    .max_attempts
                    .unwrap_or(dq_defaults.retry.max_attempts),
                initial_backoff_secs: dq_file
                    .initial_backoff_secs
                    .unwrap_or(dq_defaults.retry.initial_backoff_secs),
                max_backoff_secs: dq_file
                    .max_backoff_secs
                    .unwrap_or(dq_defaults.retry.max_backoff_secs),
                backoff_multiplier: dq_file
                    .backoff_multiplier
                    .unwrap_or(dq_defaults.retry.backoff_multiplier),
            },
            lease_timeout_secs: dq_file
                .lease_timeout_secs
                .unwrap_or(dq_defaults.lease_timeout_secs),
            max_concurrent: dq_file
                .max_concurrent
                .unwrap_or(dq_defaults.max_concurrent),
            drain_interval_secs: dq_file
                .drain_interval_secs
                .unwrap_or(dq_defaults.drain_interval_secs),
            default_service: dq_file
                .default_service
                .unwrap_or(dq_defaults.default_service),
        };
        validate_retry("download_queue", &download_queue.retry)?;
        validate_lease(
            "download_queue",
            download_queue.lease_timeout_secs,
            "downloader_timeout_sec",
            downloader_timeout_sec,
        )?;

        let ps_defaults = PostSchedulerSettings::default();
        let ps_file = file.post_scheduler.unwrap_or_default();
        let post_scheduler = PostSchedulerSettings {
            retry: RetrySettings {
                max_attempts: ps_file
                    .max_attempts
                    .unwrap_or(ps_defaults.retry.max_attempts),
                initial_backoff_secs: ps_file
                    .initial_backoff_secs
                    .unwrap_or(ps_defaults.retry.initial_backoff_secs),
                max_backoff_secs: ps_file
                    .max_backoff_secs
                    .unwrap_or(ps_defaults.retry.max_backoff_secs),
                backoff_multiplier: ps_file
                    .backoff_multiplier
                    .unwrap_or(ps_defaults.retry.backoff_multiplier),
            },
            lease_timeout_secs: ps_file
                .lease_timeout_secs
                .unwrap_or(ps_defaults.lease_timeout_secs),
            max_concurrent: ps_file
                .max_concurrent
                .unwrap_or(ps_defaults.max_concurrent),
            dispatch_interval_secs: ps_file
                .dispatch_interval_secs
                .unwrap_or(ps_defaults.dispatch_interval_secs),
            schedule_grace_secs: ps_file
                .schedule_grace_secs
                .unwrap_or(ps_defaults.schedule_grace_secs),
            page_size: ps_file.page_size.unwrap_or(ps_defaults.page_size).max(1),
        };
        validate_retry("post_scheduler", &post_scheduler.retry)?;
        validate_lease(
            "post_scheduler",
            post_scheduler.lease_timeout_secs,
            "publisher_timeout_sec",
            publisher_timeout_sec,
        )?;

        let storage_defaults = StorageSettings::default();
        let storage_file = file.storage.unwrap_or_default();
        let durable = match storage_file.durable {
            Some(DurableTierConfig::Filesystem { root, container }) => {
                Some(DurableTierSettings::Filesystem {
                    root: PathBuf::from(root),
                    container: container.unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
                })
            }
            Some(DurableTierConfig::S3 {
                bucket,
                endpoint_url,
                region,
                access_key_id,
                secret_access_key,
            }) => {
                if access_key_id.is_some() != secret_access_key.is_some() {
                    bail!("storage.durable: access_key_id and secret_access_key must be set together");
                }
                Some(DurableTierSettings::S3 {
                    bucket,
                    endpoint_url,
                    region: region.unwrap_or_else(|| "auto".to_string()),
                    access_key_id,
                    secret_access_key,
                })
            }
            None => cli.durable_dir.clone().map(|root| DurableTierSettings::Filesystem {
                root,
                container: DEFAULT_CONTAINER.to_string(),
            }),
        };
        let retention_days = storage_file
            .retention_days
            .or(cli.retention_days)
            .unwrap_or(storage_defaults.retention_days);
        if retention_days == 0 {
            bail!("storage.retention_days must be at least 1");
        }
        let storage = StorageSettings {
            retention_days,
            promotion_interval_secs: storage_file
                .promotion_interval_secs
                .unwrap_or(storage_defaults.promotion_interval_secs),
            reaper_interval: storage_file
                .reaper_interval_hours
                .map(|h| Duration::from_secs(h * 60 * 60))
                .unwrap_or(storage_defaults.reaper_interval),
            remove_local_on_expiry: storage_file
                .remove_local_on_expiry
                .unwrap_or(storage_defaults.remove_local_on_expiry),
            durable,
        };

        let jobs_defaults = BackgroundJobsSettings::default();
        let jobs_file = file.background_jobs.unwrap_or_default();
        let background_jobs = BackgroundJobsSettings {
            lease_recovery_interval_secs: jobs_file
                .lease_recovery_interval_secs
                .unwrap_or(jobs_defaults.lease_recovery_interval_secs),
            daily_summary_interval: jobs_file
                .daily_summary_interval_hours
                .filter(|h| *h > 0)
                .map(|h| Duration::from_secs(h * 60 * 60))
                .unwrap_or(jobs_defaults.daily_summary_interval),
        };

        Ok(Self {
            db_dir,
            media_path,
            metrics_port,
            downloader_url,
            downloader_timeout_sec,
            publisher_url,
            publisher_timeout_sec,
            notification_webhook_url,
            download_queue,
            post_scheduler,
            storage,
            background_jobs,
        })
    }

    pub fn pipeline_db_path(&self) -> PathBuf {
        self.db_dir.join("pipeline.db")
    }

    pub fn local_videos_dir(&self) -> PathBuf {
        self.media_path.join("videos")
    }
}

fn validate_retry(section: &str, retry: &RetrySettings) -> Result<()> {
    if retry.max_attempts == 0 {
        bail!("{}.max_attempts must be at least 1", section);
    }
    if retry.backoff_multiplier < 1.0 {
        bail!("{}.backoff_multiplier must be >= 1.0", section);
    }
    if retry.initial_backoff_secs > retry.max_backoff_secs {
        bail!(
            "{}.initial_backoff_secs ({}) exceeds max_backoff_secs ({})",
            section,
            retry.initial_backoff_secs,
            retry.max_backoff_secs
        );
    }
    Ok(())
}

/// A call that can outlive its lease lets lease recovery hand the same
/// work to a second worker.
fn validate_lease(section: &str, lease_secs: u64, timeout_name: &str, timeout_secs: u64) -> Result<()> {
    if lease_secs == 0 {
        bail!("{}.lease_timeout_secs must be at least 1", section);
    }
    if timeout_secs >= lease_secs {
        bail!(
            "{} ({}) must be shorter than {}.lease_timeout_secs ({})",
            timeout_name,
            timeout_secs,
            section,
            lease_secs
        );
    }
    Ok(())
}
