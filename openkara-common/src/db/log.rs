//! Structured event and error persistence
//!
//! All helpers swallow their own database failures after logging a warning:
//! losing a log row must never take down the pipeline or a request handler.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// Row from `error_log`, surfaced in the admin view.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ErrorRow {
    pub id: i64,
    pub error_type: String,
    pub source: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub track_id: Option<String>,
    pub resolved: i64,
    pub created_at: DateTime<Utc>,
}

/// Record a general application event in `app_logs`.
#[allow(clippy::too_many_arguments)]
pub async fn log_event(
    pool: &SqlitePool,
    level: &str,
    source: &str,
    message: &str,
    details: Option<&str>,
    track_id: Option<&str>,
    user_id: Option<i64>,
    username: Option<&str>,
) {
    let result = sqlx::query(
        "INSERT INTO app_logs (level, source, message, details, track_id, user_id, username)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(level)
    .bind(source)
    .bind(message)
    .bind(details)
    .bind(track_id)
    .bind(user_id)
    .bind(username)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!("could not write app log: {}", e);
    }
}

/// Record a pipeline stage failure in `error_log`.
pub async fn log_pipeline_error(
    pool: &SqlitePool,
    track_id: &str,
    stage: &str,
    error_message: &str,
    stack_trace: Option<&str>,
) {
    let result = sqlx::query(
        "INSERT INTO error_log (error_type, source, error_message, stack_trace, track_id)
         VALUES ('pipeline', ?, ?, ?, ?)",
    )
    .bind(stage)
    .bind(error_message)
    .bind(stack_trace)
    .bind(track_id)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!("could not write pipeline error log: {}", e);
    }
}

/// Record a request-handler failure in `error_log` with request context.
#[allow(clippy::too_many_arguments)]
pub async fn log_api_error(
    pool: &SqlitePool,
    source: &str,
    error_message: &str,
    request_method: Option<&str>,
    request_path: Option<&str>,
    user_id: Option<i64>,
    username: Option<&str>,
) {
    let result = sqlx::query(
        "INSERT INTO error_log
             (error_type, source, error_message, request_method, request_path, user_id, username)
         VALUES ('api', ?, ?, ?, ?, ?, ?)",
    )
    .bind(source)
    .bind(error_message)
    .bind(request_method)
    .bind(request_path)
    .bind(user_id)
    .bind(username)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!("could not write api error log: {}", e);
    }
}

pub async fn list_errors(pool: &SqlitePool, limit: i64) -> Result<Vec<ErrorRow>> {
    let rows = sqlx::query_as::<_, ErrorRow>(
        "SELECT id, error_type, source, error_message, stack_trace, track_id, resolved, created_at
         FROM error_log ORDER BY created_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Store the latest health-check verdict for a component, one row per
/// component.
pub async fn upsert_system_status(
    pool: &SqlitePool,
    component: &str,
    status: &str,
    details: &str,
    checked_by: Option<&str>,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO system_status (component, status, details, last_checked, checked_by)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP, ?)
        ON CONFLICT(component) DO UPDATE SET
            status = excluded.status,
            details = excluded.details,
            last_checked = CURRENT_TIMESTAMP,
            checked_by = excluded.checked_by
        "#,
    )
    .bind(component)
    .bind(status)
    .bind(details)
    .bind(checked_by)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!("could not update system status: {}", e);
    }
}
