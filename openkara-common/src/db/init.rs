//! Database initialization and schema migration

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (creating if needed) the database and bring the schema up to date.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    // Readers must proceed while a worker commits.
    sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout=20000").execute(&pool).await?;

    create_users_table(&pool).await?;
    create_usage_logs_table(&pool).await?;
    create_processing_failures_table(&pool).await?;
    create_app_logs_table(&pool).await?;
    create_error_log_table(&pool).await?;
    create_system_status_table(&pool).await?;
    patch_missing_columns(&pool).await?;

    Ok(pool)
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL DEFAULT '',
            is_admin INTEGER NOT NULL DEFAULT 0,
            is_approved INTEGER NOT NULL DEFAULT 0,
            credits INTEGER NOT NULL DEFAULT 50,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_usage_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            username TEXT,
            action TEXT NOT NULL,
            detail TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_processing_failures_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_failures (
            track_id TEXT PRIMARY KEY,
            stage TEXT NOT NULL,
            error_message TEXT NOT NULL,
            failure_count INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_app_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            level TEXT NOT NULL CHECK (level IN ('info', 'warning', 'error')),
            source TEXT NOT NULL,
            message TEXT NOT NULL,
            details TEXT,
            track_id TEXT,
            user_id INTEGER,
            username TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_error_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS error_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            error_type TEXT NOT NULL,
            source TEXT NOT NULL,
            error_message TEXT NOT NULL,
            stack_trace TEXT,
            track_id TEXT,
            request_method TEXT,
            request_path TEXT,
            user_id INTEGER,
            username TEXT,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_system_status_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS system_status (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            component TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK (status IN ('OK', 'WARNING', 'ERROR')),
            details TEXT,
            last_checked TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            checked_by TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Add columns that may be missing from databases created by older builds.
/// Each check is independent so partially patched databases converge.
async fn patch_missing_columns(pool: &SqlitePool) -> Result<()> {
    let columns: Vec<(i64, String, String, i64, Option<String>, i64)> =
        sqlx::query_as("PRAGMA table_info(users)").fetch_all(pool).await?;
    let names: Vec<&str> = columns.iter().map(|c| c.1.as_str()).collect();

    if !names.contains(&"credits") {
        sqlx::query("ALTER TABLE users ADD COLUMN credits INTEGER NOT NULL DEFAULT 50")
            .execute(pool)
            .await?;
    }
    if !names.contains(&"is_approved") {
        sqlx::query("ALTER TABLE users ADD COLUMN is_approved INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_database_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("kara.db")).await.unwrap();

        for table in [
            "users",
            "usage_logs",
            "processing_failures",
            "app_logs",
            "error_log",
            "system_status",
        ] {
            let count: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count.0, 1, "table {} missing", table);
        }
    }

    #[tokio::test]
    async fn test_init_database_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kara.db");

        let pool = init_database(&path).await.unwrap();
        sqlx::query("INSERT INTO users (username, is_admin) VALUES ('alice', 1)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        // Second init against the same file must not error or lose data.
        let pool = init_database(&path).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
