//! Database access layer
//!
//! Single embedded SQLite store. WAL journal mode so readers proceed during
//! writes; writers serialize on the pool. Schema creation and column patching
//! are idempotent and run on every startup.

mod init;
mod log;
mod users;

pub use init::init_database;
pub use log::{
    list_errors, log_api_error, log_event, log_pipeline_error, upsert_system_status, ErrorRow,
};
pub use users::{debit_credits, ensure_admin_user, get_user, get_user_by_name, log_usage, User};

use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// Persistent per-track failure record, last-write-wins per track.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProcessingFailure {
    pub track_id: String,
    pub stage: String,
    pub error_message: String,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert a failure row for `track_id`, or bump `failure_count` and overwrite
/// the stage/message when one already exists.
pub async fn record_failure(
    pool: &SqlitePool,
    track_id: &str,
    stage: &str,
    error_message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO processing_failures (track_id, stage, error_message)
        VALUES (?, ?, ?)
        ON CONFLICT(track_id) DO UPDATE SET
            failure_count = failure_count + 1,
            stage = excluded.stage,
            error_message = excluded.error_message,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(track_id)
    .bind(stage)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_failure(pool: &SqlitePool, track_id: &str) -> Result<Option<ProcessingFailure>> {
    let row = sqlx::query_as::<_, ProcessingFailure>(
        "SELECT track_id, stage, error_message, failure_count, created_at, updated_at
         FROM processing_failures WHERE track_id = ?",
    )
    .bind(track_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_failures(pool: &SqlitePool) -> Result<Vec<ProcessingFailure>> {
    let rows = sqlx::query_as::<_, ProcessingFailure>(
        "SELECT track_id, stage, error_message, failure_count, created_at, updated_at
         FROM processing_failures ORDER BY updated_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Remove the failure row for a track (admin delete / successful reprocess).
pub async fn clear_failure(pool: &SqlitePool, track_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM processing_failures WHERE track_id = ?")
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}
