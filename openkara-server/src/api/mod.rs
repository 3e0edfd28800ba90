//! HTTP API
//!
//! Request routing stays thin: handlers resolve the acting user, consult the
//! dispatcher or read artifacts, and translate typed outcomes to JSON.
//! Session management and login live outside this service; handlers trust
//! the `X-User` header and look the account up in the users table.

mod admin;
mod health;
mod sse;
mod tracks;

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::http::HeaderMap;
use axum::routing::{delete, get, post, put};
use axum::Router;
use openkara_common::db::{get_user_by_name, User};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/search", get(tracks::search))
        .route("/api/add", get(tracks::add))
        .route("/api/library", get(tracks::library))
        .route("/api/random", get(tracks::random_track))
        .route("/api/credits", get(tracks::credits))
        .route("/api/track/status", get(tracks::status))
        .route("/api/track/:id", get(tracks::track_info))
        .route("/api/track/:id/lyrics", get(tracks::get_lyrics))
        .route("/api/track/:id/lyrics", put(tracks::update_lyrics))
        .route("/api/play/:id", get(tracks::log_play))
        .route("/api/play/:id/credit", post(tracks::play_credit))
        .route("/api/events", get(sse::event_stream))
        .route("/api/admin/reprocess/:id", post(admin::reprocess))
        .route("/api/admin/failures", get(admin::failures))
        .route("/api/admin/errors", get(admin::errors))
        .route("/api/admin/track/:id", delete(admin::delete_track))
        .route("/api/admin/health", get(health::health_check))
}

/// Resolve the acting user from the `X-User` header, when present.
pub(crate) async fn resolve_user(state: &AppState, headers: &HeaderMap) -> ApiResult<Option<User>> {
    let Some(value) = headers.get("x-user") else {
        return Ok(None);
    };
    let username = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("invalid X-User header".to_string()))?;
    let user = get_user_by_name(&state.ctx.db, username).await?;
    Ok(user)
}

/// Resolve the acting user, rejecting anonymous requests.
pub(crate) async fn require_user(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    resolve_user(state, headers)
        .await?
        .ok_or(ApiError::Unauthorized)
}

/// Resolve the acting user, rejecting non-admins.
pub(crate) async fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let user = require_user(state, headers).await?;
    if !user.is_admin {
        return Err(ApiError::Forbidden);
    }
    Ok(user)
}
