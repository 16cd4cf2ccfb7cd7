//! Schema of pipeline.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};
use anyhow::Result;
use rusqlite::Connection;

const SOURCES_TABLE_V0: Table = Table {
    name: "sources",
    columns: &[
        sqlite_column!("source_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("source_type", &SqlType::Text, non_null = true),
        sqlite_column!("source_value", &SqlType::Text, non_null = true),
        sqlite_column!("configuration", &SqlType::Text),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'active'")
        ),
        sqlite_column!("last_scraped_at", &SqlType::Integer),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_sources_status", "status")],
    unique_constraints: &[],
};

const SOURCE_FK: ForeignKey = ForeignKey {
    foreign_table: "sources",
    foreign_column: "source_id",
    on_delete: ForeignKeyOnChange::SetNull,
};

const VIDEO_FK: ForeignKey = ForeignKey {
    foreign_table: "videos",
    foreign_column: "video_id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// First version of the videos table, before the durable tier tracked expiry.
const VIDEOS_TABLE_V0: Table = Table {
    name: "videos",
    columns: &[
        sqlite_column!("video_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("source_id", &SqlType::Text, foreign_key = Some(&SOURCE_FK)),
        sqlite_column!("original_url", &SqlType::Text, non_null = true),
        sqlite_column!("local_path", &SqlType::Text),
        sqlite_column!("durable_path", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("author", &SqlType::Text),
        sqlite_column!("hashtags", &SqlType::Text),
        sqlite_column!(
            "processing_status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!("file_size", &SqlType::Integer),
        sqlite_column!("duration", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_videos_status", "processing_status"),
        ("idx_videos_source", "source_id"),
    ],
    unique_constraints: &[],
};

const VIDEOS_TABLE_V1: Table = Table {
    name: "videos",
    columns: &[
        sqlite_column!("video_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("source_id", &SqlType::Text, foreign_key = Some(&SOURCE_FK)),
        sqlite_column!("original_url", &SqlType::Text, non_null = true),
        sqlite_column!("local_path", &SqlType::Text),
        sqlite_column!("durable_path", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("author", &SqlType::Text),
        sqlite_column!("hashtags", &SqlType::Text),
        sqlite_column!(
            "processing_status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!("file_size", &SqlType::Integer),
        sqlite_column!("duration", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("durable_uploaded_at", &SqlType::Integer),
        sqlite_column!("durable_expires_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_videos_status", "processing_status"),
        ("idx_videos_source", "source_id"),
        ("idx_videos_expiry", "durable_expires_at"),
    ],
    unique_constraints: &[],
};

const DOWNLOAD_QUEUE_TABLE_V0: Table = Table {
    name: "download_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "video_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&VIDEO_FK)
        ),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!(
            "priority",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("service", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("next_attempt_at", &SqlType::Integer),
        sqlite_column!("lease_owner", &SqlType::Text),
        sqlite_column!("lease_expires_at", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_download_queue_lease", "status, priority, created_at"),
        ("idx_download_queue_video", "video_id"),
        ("idx_download_queue_lease_expiry", "lease_expires_at"),
    ],
    unique_constraints: &[],
};

const SCHEDULED_POSTS_TABLE_V0: Table = Table {
    name: "scheduled_posts",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "video_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&VIDEO_FK)
        ),
        sqlite_column!("account", &SqlType::Text, non_null = true),
        sqlite_column!("scheduled_time", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'queued'")
        ),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("post_id", &SqlType::Text),
        sqlite_column!("caption", &SqlType::Text),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("next_attempt_at", &SqlType::Integer),
        sqlite_column!("lease_expires_at", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("posted_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_scheduled_posts_due", "status, scheduled_time"),
        ("idx_scheduled_posts_video", "video_id"),
    ],
    unique_constraints: &[],
};

const SETTINGS_TABLE_V0: Table = Table {
    name: "settings",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("category", &SqlType::Text, non_null = true),
        sqlite_column!("key", &SqlType::Text, non_null = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!(
            "encrypted",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[&["category", "key"]],
};

fn migrate_to_durable_expiry(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE videos ADD COLUMN durable_uploaded_at INTEGER", [])?;
    conn.execute("ALTER TABLE videos ADD COLUMN durable_expires_at INTEGER", [])?;
    conn.execute(
        "CREATE INDEX idx_videos_expiry ON videos(durable_expires_at)",
        [],
    )?;
    Ok(())
}

pub const PIPELINE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            SOURCES_TABLE_V0,
            VIDEOS_TABLE_V0,
            DOWNLOAD_QUEUE_TABLE_V0,
            SCHEDULED_POSTS_TABLE_V0,
            SETTINGS_TABLE_V0,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            SOURCES_TABLE_V0,
            VIDEOS_TABLE_V1,
            DOWNLOAD_QUEUE_TABLE_V0,
            SCHEDULED_POSTS_TABLE_V0,
            SETTINGS_TABLE_V0,
        ],
        migration: Some(migrate_to_durable_expiry),
    },
];
