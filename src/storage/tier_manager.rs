//! Moves video artifacts through the storage tiers: local download
//! directory, durable blob container, expiry.

use super::blob_store::{BlobMetadata, BlobStore};
use super::local_tier::{extension_of, sanitize_id, LocalTier};
use crate::clock::Clock;
use crate::config::StorageSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventBus, LifecycleEvent, ReaperSummary, VideoPromoted};
use crate::pipeline_store::runtime_settings::{setting_or, RETENTION_DAYS};
use crate::pipeline_store::{FullPipelineStore, SettingsStore, Video, VideoStore};
use crate::server::metrics;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SECS_PER_DAY: i64 = 86_400;
const BLOB_PREFIX: &str = "videos/";
const UNBOUNDED: usize = u32::MAX as usize;

/// Durable key of a video artifact: `videos/<video_id><ext>`.
pub fn blob_key(video_id: &str, extension: &str) -> String {
    format!("{}{}{}", BLOB_PREFIX, sanitize_id(video_id), extension)
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromoteOutcome {
    Promoted { durable_path: String, expires_at: i64 },
    AlreadyPromoted { durable_path: String },
    /// No durable tier is configured.
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromotionSweep {
    pub promoted: usize,
    pub already_promoted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReapReport {
    pub deleted: usize,
    pub errors: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub enabled: bool,
    pub backend: Option<&'static str>,
    pub container: Option<String>,
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub retention_days: u32,
    pub local_files: usize,
    pub local_size_bytes: u64,
}

pub struct StorageTierManager {
    store: Arc<dyn FullPipelineStore>,
    durable: Option<Arc<dyn BlobStore>>,
    local: LocalTier,
    settings: StorageSettings,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl StorageTierManager {
    pub fn new(
        store: Arc<dyn FullPipelineStore>,
        durable: Option<Arc<dyn BlobStore>>,
        local: LocalTier,
        settings: StorageSettings,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        if durable.is_none() {
            warn!("Durable storage not configured, promotion and reaping are disabled");
        }
        Self {
            store,
            durable,
            local,
            settings,
            clock,
            events,
        }
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn is_durable_enabled(&self) -> bool {
        self.durable.is_some()
    }

    /// Whole days an artifact stays in the durable tier: the settings table
    /// value if present and valid, the configured default otherwise.
    pub fn retention_days(&self) -> u32 {
        setting_or(
            self.store.as_ref(),
            RETENTION_DAYS,
            self.settings.retention_days,
            |days| *days > 0,
        )
    }

    /// Persists a new retention in the settings table. Only later promotions
    /// use it unless [`Self::retag`] is called.
    pub fn set_retention_days(&self, days: u32) -> PipelineResult<()> {
        if days == 0 {
            return Err(PipelineError::Configuration(
                "retention must be at least one day".to_string(),
            ));
        }
        self.store.set_setting(
            RETENTION_DAYS.category,
            RETENTION_DAYS.key,
            &days.to_string(),
            false,
            self.clock.now(),
        )?;
        Ok(())
    }

    /// Creates the local directories and the durable container.
    pub async fn ensure_container(&self) -> PipelineResult<()> {
        self.local
            .ensure_dirs()
            .await
            .map_err(|e| PipelineError::Configuration(format!("local tier: {}", e)))?;
        if let Some(durable) = &self.durable {
            durable.ensure_container().await?;
            info!(
                "Durable container {} ready ({})",
                durable.container(),
                durable.backend()
            );
        }
        Ok(())
    }

    pub async fn health_check(&self) -> PipelineResult<()> {
        match &self.durable {
            Some(durable) => Ok(durable.health_check().await?),
            None => Ok(()),
        }
    }

    /// Uploads a downloaded video to the durable tier and records its expiry.
    ///
    /// Already promoted videos are returned as-is, and a blob of matching
    /// size left by an interrupted promotion is adopted without re-uploading.
    pub async fn promote(&self, video_id: &str, local_path: &Path) -> PipelineResult<PromoteOutcome> {
        let Some(durable) = &self.durable else {
            warn!("Durable storage disabled, video {} stays local", video_id);
            return Ok(PromoteOutcome::Disabled);
        };

        let video = self
            .store
            .get_video(video_id)?
            .ok_or_else(|| PipelineError::not_found("video", video_id))?;
        if let Some(durable_path) = video.durable_path {
            return Ok(PromoteOutcome::AlreadyPromoted { durable_path });
        }
        if video.local_path.is_none() {
            return Err(PipelineError::InvalidState(format!(
                "video {} has no local artifact",
                video_id
            )));
        }
        let local_size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| {
                PipelineError::InvalidState(format!(
                    "local artifact {} unreadable: {}",
                    local_path.display(),
                    e
                ))
            })?
            .len();

        let key = blob_key(video_id, &extension_of(local_path));
        let now = self.clock.now();
        let retention_secs = self.retention_days() as i64 * SECS_PER_DAY;

        let uploaded_at = match durable.head(&key).await? {
            Some(existing) if existing.size == local_size => {
                debug!("Adopting existing blob {} for video {}", key, video_id);
                existing.metadata.map(|m| m.upload_date).unwrap_or(now)
            }
            _ => {
                let metadata = BlobMetadata {
                    original_path: local_path.display().to_string(),
                    upload_date: now,
                    retention_date: now + retention_secs,
                };
                durable.put(&key, local_path, &metadata).await?;
                now
            }
        };
        let expires_at = uploaded_at + retention_secs;

        if !self
            .store
            .set_video_durable(video_id, &key, uploaded_at, expires_at, now)?
        {
            // a concurrent promotion got there first
            return match self.store.get_video(video_id)? {
                Some(Video {
                    durable_path: Some(durable_path),
                    ..
                }) => Ok(PromoteOutcome::AlreadyPromoted { durable_path }),
                _ => Err(PipelineError::InvalidState(format!(
                    "video {} changed during promotion",
                    video_id
                ))),
            };
        }

        metrics::record_promotion("promoted");
        self.events.emit(LifecycleEvent::VideoPromoted(VideoPromoted {
            video_id: video_id.to_string(),
            durable_path: key.clone(),
            expires_at,
            at: now,
        }));
        Ok(PromoteOutcome::Promoted {
            durable_path: key,
            expires_at,
        })
    }

    /// Promotes up to `limit` downloaded videos that have no durable copy yet.
    pub async fn promote_pending(&self, limit: usize) -> PipelineResult<PromotionSweep> {
        let mut sweep = PromotionSweep::default();
        if self.durable.is_none() {
            return Ok(sweep);
        }
        self.health_check().await?;

        for video in self.store.list_unpromoted_videos(limit)? {
            let Some(local_path) = video.local_path.as_deref() else {
                continue;
            };
            match self.promote(&video.video_id, Path::new(local_path)).await {
                Ok(PromoteOutcome::Promoted { .. }) => sweep.promoted += 1,
                Ok(PromoteOutcome::AlreadyPromoted { .. }) => sweep.already_promoted += 1,
                Ok(PromoteOutcome::Disabled) => {}
                Err(e) => {
                    metrics::record_promotion("failed");
                    warn!("Failed to promote video {}: {}", video.video_id, e);
                    sweep.failed += 1;
                }
            }
        }
        Ok(sweep)
    }

    /// Promoted artifacts whose expiry is at or before `now`.
    pub fn list_expired(&self, now: i64) -> PipelineResult<Vec<Video>> {
        Ok(self.store.list_expired_videos(now, UNBOUNDED)?)
    }

    /// Deletes every expired blob and marks its video `expired`.
    ///
    /// A failure on one artifact is counted and logged; the rest are still
    /// processed. A blob that is already gone counts as deleted.
    pub async fn reap(&self, now: i64) -> PipelineResult<ReapReport> {
        let Some(durable) = &self.durable else {
            warn!("Durable storage disabled, nothing to reap");
            return Ok(ReapReport::default());
        };

        let expired = self.list_expired(now)?;
        let mut report = ReapReport {
            total: expired.len(),
            ..Default::default()
        };
        for video in &expired {
            match self.reap_one(durable.as_ref(), video, now).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!("Failed to reap video {}: {}", video.video_id, e);
                }
            }
        }

        info!(
            "Reaped {} of {} expired artifacts ({} errors)",
            report.deleted, report.total, report.errors
        );
        metrics::record_reap(report.deleted, report.errors);
        self.events.emit(LifecycleEvent::ReaperSummary(ReaperSummary {
            deleted: report.deleted,
            errors: report.errors,
            total: report.total,
            at: now,
        }));
        Ok(report)
    }

    async fn reap_one(&self, durable: &dyn BlobStore, video: &Video, now: i64) -> PipelineResult<()> {
        if let Some(key) = &video.durable_path {
            match durable.delete(key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!("Blob {} already gone", key),
                Err(e) => return Err(e.into()),
            }
        }
        self.store.mark_video_expired(&video.video_id, now)?;

        if self.settings.remove_local_on_expiry {
            if let Some(local_path) = &video.local_path {
                match self.local.remove_local(Path::new(local_path)).await {
                    Ok(_) => {
                        self.store.clear_local_path(&video.video_id, now)?;
                    }
                    Err(e) => warn!("Failed to remove local file {}: {}", local_path, e),
                }
            }
        }
        Ok(())
    }

    /// Recomputes the expiry of every promoted, non-expired artifact from its
    /// recorded upload time. Returns the number of videos updated.
    pub fn retag(&self, retention_days: u32) -> PipelineResult<usize> {
        if retention_days == 0 {
            return Err(PipelineError::Configuration(
                "retention must be at least one day".to_string(),
            ));
        }
        let updated = self
            .store
            .retag_durable_expiry(retention_days as i64 * SECS_PER_DAY, self.clock.now())?;
        info!(
            "Retagged {} artifacts with {} days retention",
            updated, retention_days
        );
        Ok(updated)
    }

    /// Returns a readable local copy of the video, fetching it back from the
    /// durable tier when the local file is gone.
    pub async fn restore_local(&self, video: &Video) -> PipelineResult<PathBuf> {
        if let Some(local_path) = &video.local_path {
            let path = PathBuf::from(local_path);
            if self.local.exists(&path).await {
                return Ok(path);
            }
        }

        let (Some(durable), Some(key)) = (&self.durable, &video.durable_path) else {
            return Err(PipelineError::InvalidState(format!(
                "video {} has no readable artifact",
                video.video_id
            )));
        };
        let dest = self
            .local
            .path_for(&video.video_id, &extension_of(Path::new(key)));
        let size = durable.fetch(key, &dest).await?;
        self.store
            .set_local_path(&video.video_id, &dest.to_string_lossy(), self.clock.now())?;
        info!(
            "Restored video {} from {} ({} bytes)",
            video.video_id, key, size
        );
        Ok(dest)
    }

    pub async fn stats(&self) -> PipelineResult<StorageStats> {
        let (local_files, local_size_bytes) = self.local.usage().await.unwrap_or_else(|e| {
            warn!("Failed to measure local tier: {}", e);
            (0, 0)
        });
        let mut stats = StorageStats {
            enabled: false,
            backend: None,
            container: None,
            total_files: 0,
            total_size_bytes: 0,
            retention_days: self.retention_days(),
            local_files,
            local_size_bytes,
        };

        if let Some(durable) = &self.durable {
            let blobs = durable.list(BLOB_PREFIX).await?;
            stats.enabled = true;
            stats.backend = Some(durable.backend());
            stats.container = Some(durable.container().to_string());
            stats.total_files = blobs.len();
            stats.total_size_bytes = blobs.iter().map(|b| b.size).sum();
            metrics::set_durable_usage(stats.total_files, stats.total_size_bytes);
        }
        Ok(stats)
    }
}
