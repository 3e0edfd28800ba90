//! Admin API handlers: reprocessing, failure and error views, track deletion

use super::require_admin;
use crate::dispatcher::{AddOutcome, ReprocessStage};
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use openkara_common::db::{clear_failure, list_errors, list_failures, log_event};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct ReprocessQuery {
    #[serde(default = "default_stage")]
    from_stage: String,
}

fn default_stage() -> String {
    "all".to_string()
}

/// POST /api/admin/reprocess/:id?from_stage=
pub async fn reprocess(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(track_id): Path<String>,
    Query(query): Query<ReprocessQuery>,
) -> ApiResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;

    let stage = ReprocessStage::parse(&query.from_stage).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "from_stage must be one of all, splitting, lyrics, processing (got '{}')",
            query.from_stage
        ))
    })?;

    match state.dispatcher.reprocess(&track_id, stage).await? {
        AddOutcome::Started { .. } => {
            log_event(
                &state.ctx.db,
                "info",
                "admin",
                &format!("Reprocess from {:?} requested for track {}", stage, track_id),
                None,
                Some(&track_id),
                Some(admin.id),
                Some(&admin.username),
            )
            .await;
            Ok(Json(json!({ "status": "processing", "from_stage": query.from_stage })))
        }
        AddOutcome::AlreadyProcessing { progress } => Ok(Json(json!({
            "status": "already_processing",
            "progress": progress,
        }))),
        other => Err(ApiError::Internal(format!(
            "unexpected reprocess outcome: {:?}",
            other
        ))),
    }
}

/// GET /api/admin/failures
pub async fn failures(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let rows = list_failures(&state.ctx.db).await?;
    Ok(Json(serde_json::to_value(rows).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /api/admin/errors?limit=
pub async fn errors(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ErrorsQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let rows = list_errors(&state.ctx.db, query.limit.clamp(1, 1000)).await?;
    Ok(Json(serde_json::to_value(rows).unwrap_or_default()))
}

/// DELETE /api/admin/track/:id: remove the artifact directory, the failure
/// row and any registry entry.
pub async fn delete_track(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(track_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;

    if state.ctx.registry.is_active(&track_id) {
        return Err(ApiError::BadRequest(format!(
            "track {} is currently processing",
            track_id
        )));
    }

    let removed = state.ctx.store.delete(&track_id)?;
    clear_failure(&state.ctx.db, &track_id).await?;
    state.ctx.registry.remove(&track_id);

    log_event(
        &state.ctx.db,
        "info",
        "admin",
        &format!("Track {} deleted", track_id),
        None,
        Some(&track_id),
        Some(admin.id),
        Some(&admin.username),
    )
    .await;

    Ok(Json(json!({ "success": true, "removed": removed })))
}
