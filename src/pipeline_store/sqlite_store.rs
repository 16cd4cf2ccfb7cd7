//! SQLite-backed pipeline store.
//!
//! Every status transition that touches both a queue row and its video runs
//! in one transaction while holding the connection mutex, so concurrent
//! workers observe either the whole transition or none of it.

use super::models::*;
use super::schema::PIPELINE_VERSIONED_SCHEMAS;
use super::trait_def::*;
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub struct SqlitePipelineStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePipelineStore {
    /// Opens the pipeline database, creating or migrating it as needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), PIPELINE_VERSIONED_SCHEMAS, "pipeline")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(SqlitePipelineStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        PIPELINE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(SqlitePipelineStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("pipeline database mutex poisoned"))
    }
}

fn status_column<T>(row: &Row, column: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let value: String = row.get(column)?;
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("unknown {} '{}'", column, value).into(),
        )
    })
}

fn source_from_row(row: &Row) -> rusqlite::Result<Source> {
    Ok(Source {
        source_id: row.get("source_id")?,
        source_type: row.get("source_type")?,
        source_value: row.get("source_value")?,
        configuration: row
            .get::<_, Option<String>>("configuration")?
            .and_then(|s| serde_json::from_str(&s).ok()),
        status: status_column(row, "status", SourceStatus::from_db_str)?,
        last_scraped_at: row.get("last_scraped_at")?,
        created_at: row.get("created_at")?,
    })
}

fn video_from_row(row: &Row) -> rusqlite::Result<Video> {
    Ok(Video {
        video_id: row.get("video_id")?,
        source_id: row.get("source_id")?,
        original_url: row.get("original_url")?,
        local_path: row.get("local_path")?,
        durable_path: row.get("durable_path")?,
        metadata: VideoMetadata {
            title: row.get("title")?,
            description: row.get("description")?,
            author: row.get("author")?,
            hashtags: row
                .get::<_, Option<String>>("hashtags")?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
        },
        status: status_column(row, "processing_status", VideoStatus::from_db_str)?,
        file_size: row.get::<_, Option<i64>>("file_size")?.map(|v| v as u64),
        duration_secs: row.get("duration")?,
        durable_uploaded_at: row.get("durable_uploaded_at")?,
        durable_expires_at: row.get("durable_expires_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn job_from_row(row: &Row) -> rusqlite::Result<DownloadJob> {
    Ok(DownloadJob {
        id: row.get("id")?,
        video_id: row.get("video_id")?,
        url: row.get("url")?,
        priority: row.get("priority")?,
        status: status_column(row, "status", JobStatus::from_db_str)?,
        attempts: row.get("attempts")?,
        service: row.get("service")?,
        error_message: row.get("error_message")?,
        next_attempt_at: row.get("next_attempt_at")?,
        lease_owner: row.get("lease_owner")?,
        lease_expires_at: row.get("lease_expires_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn post_from_row(row: &Row) -> rusqlite::Result<ScheduledPost> {
    Ok(ScheduledPost {
        id: row.get("id")?,
        video_id: row.get("video_id")?,
        account: row.get("account")?,
        scheduled_time: row.get("scheduled_time")?,
        status: status_column(row, "status", PostStatus::from_db_str)?,
        attempts: row.get("attempts")?,
        post_id: row.get("post_id")?,
        caption: row.get("caption")?,
        error_message: row.get("error_message")?,
        next_attempt_at: row.get("next_attempt_at")?,
        lease_expires_at: row.get("lease_expires_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        posted_at: row.get("posted_at")?,
    })
}

fn setting_from_row(row: &Row) -> rusqlite::Result<Setting> {
    Ok(Setting {
        category: row.get("category")?,
        key: row.get("key")?,
        value: row.get("value")?,
        encrypted: row.get::<_, i64>("encrypted")? != 0,
        updated_at: row.get("updated_at")?,
    })
}

fn count_by_status(conn: &Connection, table: &str) -> Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT status, COUNT(*) FROM {} GROUP BY status",
        table
    ))?;
    let counts = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(counts)
}

// Video status changes that follow a post transition. A video that is still
// the subject of another in-flight post keeps its `posting` status.
const VIDEO_LEAVES_POSTING: &str = "UPDATE videos SET processing_status = ?2, updated_at = ?3
     WHERE video_id = (SELECT video_id FROM scheduled_posts WHERE id = ?1)
       AND processing_status = 'posting'
       AND NOT EXISTS (
           SELECT 1 FROM scheduled_posts p
           WHERE p.video_id = videos.video_id AND p.status = 'posting' AND p.id != ?1
       )";

impl SourceStore for SqlitePipelineStore {
    fn upsert_source(&self, source: &NewSource, now: i64) -> Result<()> {
        let conn = self.conn()?;
        let configuration = source
            .configuration
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO sources (source_id, source_type, source_value, configuration, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?5)
             ON CONFLICT(source_id) DO UPDATE SET
                source_type = excluded.source_type,
                source_value = excluded.source_value,
                configuration = excluded.configuration",
            params![
                source.source_id,
                source.source_type,
                source.source_value,
                configuration,
                now
            ],
        )?;
        Ok(())
    }

    fn get_source(&self, source_id: &str) -> Result<Option<Source>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT * FROM sources WHERE source_id = ?1",
                [source_id],
                source_from_row,
            )
            .optional()?)
    }

    fn list_sources(&self, status: Option<SourceStatus>) -> Result<Vec<Source>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM sources WHERE ?1 IS NULL OR status = ?1 ORDER BY created_at, source_id",
        )?;
        let sources = stmt
            .query_map([status.map(|s| s.as_db_str())], source_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sources)
    }

    fn set_source_status(&self, source_id: &str, status: SourceStatus) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sources SET status = ?2 WHERE source_id = ?1",
            params![source_id, status.as_db_str()],
        )?;
        Ok(updated > 0)
    }

    fn record_source_scraped(&self, source_id: &str, now: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sources SET last_scraped_at = ?2 WHERE source_id = ?1",
            params![source_id, now],
        )?;
        Ok(updated > 0)
    }
}

impl VideoStore for SqlitePipelineStore {
    fn insert_video(&self, video: &NewVideo, now: i64) -> Result<bool> {
        let conn = self.conn()?;
        let hashtags = serde_json::to_string(&video.metadata.hashtags)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO videos (
                video_id, source_id, original_url, title, description, author, hashtags,
                processing_status, duration, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?9)",
            params![
                video.video_id,
                video.source_id,
                video.original_url,
                video.metadata.title,
                video.metadata.description,
                video.metadata.author,
                hashtags,
                video.duration_secs,
                now
            ],
        )?;
        Ok(inserted > 0)
    }

    fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT * FROM videos WHERE video_id = ?1",
                [video_id],
                video_from_row,
            )
            .optional()?)
    }

    fn list_videos(
        &self,
        status: Option<VideoStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Video>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM videos WHERE ?1 IS NULL OR processing_status = ?1
             ORDER BY created_at DESC, video_id LIMIT ?2 OFFSET ?3",
        )?;
        let videos = stmt
            .query_map(
                params![status.map(|s| s.as_db_str()), limit as i64, offset as i64],
                video_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    fn set_video_durable(
        &self,
        video_id: &str,
        durable_path: &str,
        uploaded_at: i64,
        expires_at: i64,
        now: i64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE videos SET durable_path = ?2, durable_uploaded_at = ?3,
                durable_expires_at = ?4, updated_at = ?5
             WHERE video_id = ?1 AND local_path IS NOT NULL AND durable_path IS NULL",
            params![video_id, durable_path, uploaded_at, expires_at, now],
        )?;
        Ok(updated > 0)
    }

    fn list_unpromoted_videos(&self, limit: usize) -> Result<Vec<Video>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM videos
             WHERE durable_path IS NULL AND local_path IS NOT NULL
               AND processing_status IN ('downloaded', 'posting', 'posted')
             ORDER BY updated_at ASC, video_id LIMIT ?1",
        )?;
        let videos = stmt
            .query_map([limit as i64], video_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    fn list_expired_videos(&self, now: i64, limit: usize) -> Result<Vec<Video>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM videos
             WHERE durable_path IS NOT NULL
               AND durable_expires_at IS NOT NULL AND durable_expires_at <= ?1
               AND processing_status NOT IN ('expired', 'posting')
             ORDER BY durable_expires_at ASC, video_id LIMIT ?2",
        )?;
        let videos = stmt
            .query_map(params![now, limit as i64], video_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    fn mark_video_expired(&self, video_id: &str, now: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE videos SET processing_status = 'expired', updated_at = ?2
             WHERE video_id = ?1 AND processing_status != 'expired'",
            params![video_id, now],
        )?;
        Ok(updated > 0)
    }

    fn set_local_path(&self, video_id: &str, local_path: &str, now: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE videos SET local_path = ?2, updated_at = ?3 WHERE video_id = ?1",
            params![video_id, local_path, now],
        )?;
        Ok(updated > 0)
    }

    fn clear_local_path(&self, video_id: &str, now: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE videos SET local_path = NULL, updated_at = ?2
             WHERE video_id = ?1 AND local_path IS NOT NULL",
            params![video_id, now],
        )?;
        Ok(updated > 0)
    }

    fn retag_durable_expiry(&self, retention_secs: i64, now: i64) -> Result<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE videos SET durable_expires_at = durable_uploaded_at + ?1, updated_at = ?2
             WHERE durable_path IS NOT NULL AND durable_uploaded_at IS NOT NULL
               AND processing_status != 'expired'",
            params![retention_secs, now],
        )?;
        Ok(updated)
    }
}

impl DownloadQueueStore for SqlitePipelineStore {
    fn insert_download_job(
        &self,
        video_id: &str,
        url: &str,
        priority: i32,
        service: &str,
        now: i64,
    ) -> Result<EnqueueOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let video_status: Option<String> = tx
            .query_row(
                "SELECT processing_status FROM videos WHERE video_id = ?1",
                [video_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(video_status) = video_status else {
            return Ok(EnqueueOutcome::UnknownVideo);
        };

        let active: i64 = tx.query_row(
            "SELECT COUNT(*) FROM download_queue
             WHERE video_id = ?1 AND status IN ('pending', 'in_progress')",
            [video_id],
            |row| row.get(0),
        )?;
        if active > 0 {
            return Ok(EnqueueOutcome::Duplicate);
        }

        match VideoStatus::from_db_str(&video_status) {
            Some(VideoStatus::Pending) | Some(VideoStatus::Failed) => {}
            Some(other) => return Ok(EnqueueOutcome::NotEnqueueable(other)),
            None => anyhow::bail!("Video {} has unknown status {}", video_id, video_status),
        }

        tx.execute(
            "INSERT INTO download_queue (
                video_id, url, priority, status, attempts, service, created_at, updated_at
             ) VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?5)",
            params![video_id, url, priority, service, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE videos SET processing_status = 'pending', updated_at = ?2
             WHERE video_id = ?1 AND processing_status = 'failed'",
            params![video_id, now],
        )?;
        let job = tx.query_row(
            "SELECT * FROM download_queue WHERE id = ?1",
            [id],
            job_from_row,
        )?;
        tx.commit()?;
        Ok(EnqueueOutcome::Inserted(job))
    }

    fn get_download_job(&self, id: i64) -> Result<Option<DownloadJob>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT * FROM download_queue WHERE id = ?1",
                [id],
                job_from_row,
            )
            .optional()?)
    }

    fn list_download_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DownloadJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM download_queue WHERE ?1 IS NULL OR status = ?1
             ORDER BY priority DESC, created_at ASC, id ASC LIMIT ?2 OFFSET ?3",
        )?;
        let jobs = stmt
            .query_map(
                params![status.map(|s| s.as_db_str()), limit as i64, offset as i64],
                job_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn lease_next_download(
        &self,
        worker: &str,
        now: i64,
        lease_secs: i64,
    ) -> Result<Option<DownloadJob>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let candidate: Option<i64> = tx
            .query_row(
                "SELECT id FROM download_queue
                 WHERE status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1",
                [now],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = candidate else {
            return Ok(None);
        };

        let claimed = tx.execute(
            "UPDATE download_queue
             SET status = 'in_progress', lease_owner = ?2, lease_expires_at = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'pending'",
            params![id, worker, now + lease_secs, now],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        tx.execute(
            "UPDATE videos SET processing_status = 'downloading', updated_at = ?2
             WHERE video_id = (SELECT video_id FROM download_queue WHERE id = ?1)",
            params![id, now],
        )?;
        let job = tx.query_row(
            "SELECT * FROM download_queue WHERE id = ?1",
            [id],
            job_from_row,
        )?;
        tx.commit()?;
        Ok(Some(job))
    }

    fn complete_download(
        &self,
        id: i64,
        worker: &str,
        local_path: &str,
        file_size: u64,
        now: i64,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE download_queue
             SET status = 'completed', lease_owner = NULL, lease_expires_at = NULL,
                 error_message = NULL, completed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'in_progress' AND lease_owner = ?2",
            params![id, worker, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE videos SET local_path = ?2, file_size = ?3,
                processing_status = 'downloaded', updated_at = ?4
             WHERE video_id = (SELECT video_id FROM download_queue WHERE id = ?1)",
            params![id, local_path, file_size as i64, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn retry_download(
        &self,
        id: i64,
        worker: &str,
        attempts: u32,
        next_attempt_at: i64,
        error: &str,
        now: i64,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE download_queue
             SET status = 'pending', attempts = ?3, next_attempt_at = ?4, error_message = ?5,
                 lease_owner = NULL, lease_expires_at = NULL, updated_at = ?6
             WHERE id = ?1 AND status = 'in_progress' AND lease_owner = ?2",
            params![id, worker, attempts, next_attempt_at, error, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE videos SET processing_status = 'pending', updated_at = ?2
             WHERE video_id = (SELECT video_id FROM download_queue WHERE id = ?1)
               AND processing_status = 'downloading'",
            params![id, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn fail_download(
        &self,
        id: i64,
        worker: &str,
        attempts: u32,
        error: &str,
        now: i64,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE download_queue
             SET status = 'failed', attempts = ?3, error_message = ?4, next_attempt_at = NULL,
                 lease_owner = NULL, lease_expires_at = NULL, completed_at = ?5, updated_at = ?5
             WHERE id = ?1 AND status = 'in_progress' AND lease_owner = ?2",
            params![id, worker, attempts, error, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE videos SET processing_status = 'failed', updated_at = ?2
             WHERE video_id = (SELECT video_id FROM download_queue WHERE id = ?1)",
            params![id, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn release_download(&self, id: i64, worker: &str, now: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE download_queue
             SET status = 'pending', lease_owner = NULL, lease_expires_at = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'in_progress' AND lease_owner = ?2",
            params![id, worker, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE videos SET processing_status = 'pending', updated_at = ?2
             WHERE video_id = (SELECT video_id FROM download_queue WHERE id = ?1)
               AND processing_status = 'downloading'",
            params![id, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn release_expired_downloads(&self, now: i64) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE videos SET processing_status = 'pending', updated_at = ?1
             WHERE processing_status = 'downloading' AND video_id IN (
                 SELECT video_id FROM download_queue
                 WHERE status = 'in_progress' AND lease_expires_at <= ?1
             )",
            [now],
        )?;
        let released = tx.execute(
            "UPDATE download_queue
             SET status = 'pending', lease_owner = NULL, lease_expires_at = NULL, updated_at = ?1
             WHERE status = 'in_progress' AND lease_expires_at <= ?1",
            [now],
        )?;
        tx.commit()?;
        Ok(released)
    }

    fn requeue_failed_download(&self, id: i64, now: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE download_queue
             SET status = 'pending', attempts = 0, next_attempt_at = NULL, error_message = NULL,
                 completed_at = NULL, updated_at = ?2
             WHERE id = ?1 AND status = 'failed' AND NOT EXISTS (
                 SELECT 1 FROM download_queue other
                 WHERE other.video_id = download_queue.video_id
                   AND other.status IN ('pending', 'in_progress')
             )",
            params![id, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE videos SET processing_status = 'pending', updated_at = ?2
             WHERE video_id = (SELECT video_id FROM download_queue WHERE id = ?1)
               AND processing_status = 'failed'",
            params![id, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn download_queue_stats(&self) -> Result<DownloadQueueStats> {
        let conn = self.conn()?;
        let mut stats = DownloadQueueStats::default();
        for (status, count) in count_by_status(&conn, "download_queue")? {
            match JobStatus::from_db_str(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::InProgress) => stats.in_progress = count,
                Some(JobStatus::Completed) => stats.completed = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => {}
            }
        }
        Ok(stats)
    }
}

impl PostStore for SqlitePipelineStore {
    fn insert_post(
        &self,
        video_id: &str,
        account: &str,
        scheduled_time: i64,
        caption: Option<&str>,
        now: i64,
    ) -> Result<ScheduledPost> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduled_posts (
                video_id, account, scheduled_time, status, attempts, caption, created_at, updated_at
             ) VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?5, ?5)",
            params![video_id, account, scheduled_time, caption, now],
        )?;
        let id = conn.last_insert_rowid();
        let post = conn.query_row(
            "SELECT * FROM scheduled_posts WHERE id = ?1",
            [id],
            post_from_row,
        )?;
        Ok(post)
    }

    fn get_post(&self, id: i64) -> Result<Option<ScheduledPost>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT * FROM scheduled_posts WHERE id = ?1",
                [id],
                post_from_row,
            )
            .optional()?)
    }

    fn list_posts(
        &self,
        status: Option<PostStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ScheduledPost>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM scheduled_posts WHERE ?1 IS NULL OR status = ?1
             ORDER BY scheduled_time ASC, id ASC LIMIT ?2 OFFSET ?3",
        )?;
        let posts = stmt
            .query_map(
                params![status.map(|s| s.as_db_str()), limit as i64, offset as i64],
                post_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    fn list_due_posts(
        &self,
        now: i64,
        after: Option<(i64, i64)>,
        limit: usize,
    ) -> Result<Vec<ScheduledPost>> {
        let (after_time, after_id) = after.unwrap_or((i64::MIN, i64::MIN));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM scheduled_posts
             WHERE status = 'queued' AND scheduled_time <= ?1
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
               AND (scheduled_time > ?2 OR (scheduled_time = ?2 AND id > ?3))
             ORDER BY scheduled_time ASC, id ASC
             LIMIT ?4",
        )?;
        let posts = stmt
            .query_map(
                params![now, after_time, after_id, limit as i64],
                post_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    fn claim_post(&self, id: i64, now: i64, lease_secs: i64) -> Result<Option<ScheduledPost>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let claimed = tx.execute(
            "UPDATE scheduled_posts
             SET status = 'posting', lease_expires_at = ?3, updated_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, now, now + lease_secs],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        tx.execute(
            "UPDATE videos SET processing_status = 'posting', updated_at = ?2
             WHERE video_id = (SELECT video_id FROM scheduled_posts WHERE id = ?1)
               AND processing_status = 'downloaded'",
            params![id, now],
        )?;
        let post = tx.query_row(
            "SELECT * FROM scheduled_posts WHERE id = ?1",
            [id],
            post_from_row,
        )?;
        tx.commit()?;
        Ok(Some(post))
    }

    fn complete_post(&self, id: i64, post_id: &str, now: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE scheduled_posts
             SET status = 'posted', post_id = ?2, error_message = NULL, lease_expires_at = NULL,
                 posted_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'posting'",
            params![id, post_id, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE videos SET processing_status = 'posted', updated_at = ?2
             WHERE video_id = (SELECT video_id FROM scheduled_posts WHERE id = ?1)
               AND processing_status IN ('downloaded', 'posting')",
            params![id, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn retry_post(
        &self,
        id: i64,
        attempts: u32,
        next_attempt_at: i64,
        error: &str,
        now: i64,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE scheduled_posts
             SET status = 'queued', attempts = ?2, next_attempt_at = ?3, error_message = ?4,
                 lease_expires_at = NULL, updated_at = ?5
             WHERE id = ?1 AND status = 'posting'",
            params![id, attempts, next_attempt_at, error, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(VIDEO_LEAVES_POSTING, params![id, "downloaded", now])?;
        tx.commit()?;
        Ok(true)
    }

    fn fail_post(&self, id: i64, attempts: u32, error: &str, now: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE scheduled_posts
             SET status = 'failed', attempts = ?2, error_message = ?3, next_attempt_at = NULL,
                 lease_expires_at = NULL, updated_at = ?4
             WHERE id = ?1 AND status = 'posting'",
            params![id, attempts, error, now],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(VIDEO_LEAVES_POSTING, params![id, "failed", now])?;
        tx.commit()?;
        Ok(true)
    }

    fn reschedule_post(&self, id: i64, scheduled_time: i64, now: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE scheduled_posts SET scheduled_time = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'queued' AND attempts = 0",
            params![id, scheduled_time, now],
        )?;
        Ok(updated > 0)
    }

    fn cancel_post(&self, id: i64, now: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE scheduled_posts SET status = 'failed', error_message = 'cancelled', updated_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, now],
        )?;
        Ok(updated > 0)
    }

    fn release_expired_posts(&self, now: i64) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let expired: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM scheduled_posts WHERE status = 'posting' AND lease_expires_at <= ?1",
            )?;
            let ids = stmt
                .query_map([now], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            ids
        };
        for id in &expired {
            tx.execute(
                "UPDATE scheduled_posts
                 SET status = 'queued', lease_expires_at = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?;
            tx.execute(VIDEO_LEAVES_POSTING, params![id, "downloaded", now])?;
        }
        tx.commit()?;
        Ok(expired.len())
    }

    fn post_stats(&self) -> Result<PostStats> {
        let conn = self.conn()?;
        let mut stats = PostStats::default();
        for (status, count) in count_by_status(&conn, "scheduled_posts")? {
            match PostStatus::from_db_str(&status) {
                Some(PostStatus::Queued) => stats.queued = count,
                Some(PostStatus::Posting) => stats.posting = count,
                Some(PostStatus::Posted) => stats.posted = count,
                Some(PostStatus::Failed) => stats.failed = count,
                None => {}
            }
        }
        Ok(stats)
    }
}

impl SettingsStore for SqlitePipelineStore {
    fn set_setting(
        &self,
        category: &str,
        key: &str,
        value: &str,
        encrypted: bool,
        now: i64,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (category, key, value, encrypted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(category, key) DO UPDATE SET
                value = excluded.value,
                encrypted = excluded.encrypted,
                updated_at = excluded.updated_at",
            params![category, key, value, encrypted as i64, now],
        )?;
        Ok(())
    }

    fn get_setting(&self, category: &str, key: &str) -> Result<Option<Setting>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT * FROM settings WHERE category = ?1 AND key = ?2",
                params![category, key],
                setting_from_row,
            )
            .optional()?)
    }

    fn list_settings(&self, category: Option<&str>) -> Result<Vec<Setting>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM settings WHERE ?1 IS NULL OR category = ?1 ORDER BY category, key",
        )?;
        let settings = stmt
            .query_map([category], setting_from_row)?
            .map(|setting| {
                setting.map(|mut s| {
                    if s.encrypted {
                        s.value = REDACTED_VALUE.to_string();
                    }
                    s
                })
            })
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(settings)
    }

    fn delete_setting(&self, category: &str, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM settings WHERE category = ?1 AND key = ?2",
            params![category, key],
        )?;
        Ok(deleted > 0)
    }
}
