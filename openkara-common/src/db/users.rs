//! User lookup and credit accounting
//!
//! The pipeline itself never touches credits; request handlers consult these
//! before dispatching work.

use crate::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;

/// The slice of a user the processing core cares about.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub credits: i64,
}

pub async fn get_user(pool: &SqlitePool, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, is_admin, credits FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn get_user_by_name(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, is_admin, credits FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Atomically deduct `amount` credits from a user.
///
/// The guard lives in the UPDATE itself so two concurrent debits can never
/// drive the balance negative. Returns the new balance, or
/// `InsufficientCredits` without modifying anything.
pub async fn debit_credits(pool: &SqlitePool, user_id: i64, amount: i64) -> Result<i64> {
    let result = sqlx::query("UPDATE users SET credits = credits - ? WHERE id = ? AND credits >= ?")
        .bind(amount)
        .bind(user_id)
        .bind(amount)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        let have = get_user(pool, user_id).await?.map(|u| u.credits).unwrap_or(0);
        return Err(Error::InsufficientCredits { have, need: amount });
    }

    let balance: (i64,) = sqlx::query_as("SELECT credits FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(balance.0)
}

/// Create the bootstrap admin account when configured and absent.
pub async fn ensure_admin_user(pool: &SqlitePool, username: &str, password_hash: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO users (username, password_hash, is_admin, is_approved)
         VALUES (?, ?, 1, 1)",
    )
    .bind(username)
    .bind(password_hash)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a usage event (search, download, play, random_play).
pub async fn log_usage(
    pool: &SqlitePool,
    user_id: Option<i64>,
    username: Option<&str>,
    action: &str,
    detail: &str,
) {
    let result = sqlx::query(
        "INSERT INTO usage_logs (user_id, username, action, detail) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(username)
    .bind(action)
    .bind(detail)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!("could not write usage log: {}", e);
    }
}
