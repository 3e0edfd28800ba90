//! Track API handlers: search, enqueue, status, lyrics, library, playback

use super::require_user;
use crate::dispatcher::AddOutcome;
use crate::error::{ApiError, ApiResult};
use crate::models::{LyricsDoc, TrackMetadata};
use crate::services::upgrade_cover_url;
use crate::store::TrackFile;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use openkara_common::db::{debit_credits, get_user, log_api_error, log_event, log_usage};
use openkara_common::Error;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
}

/// GET /api/search?q=
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    let q = query.q.trim();
    if q.is_empty() {
        return Ok(Json(json!([])));
    }

    let results = match state.ctx.audio_source.search(q).await {
        Ok(results) => results,
        Err(e) => {
            log_api_error(
                &state.ctx.db,
                "/api/search",
                &e.to_string(),
                Some("GET"),
                Some("/api/search"),
                Some(user.id),
                Some(&user.username),
            )
            .await;
            return Err(e.into());
        }
    };

    let results: Vec<Value> = results
        .into_iter()
        .map(|mut r| {
            r.img_url = upgrade_cover_url(&r.img_url);
            serde_json::to_value(r).unwrap_or_default()
        })
        .collect();

    log_usage(&state.ctx.db, Some(user.id), Some(&user.username), "search", q).await;
    Ok(Json(Value::Array(results)))
}

#[derive(Debug, Deserialize)]
pub struct AddQuery {
    #[serde(default)]
    id: String,
}

/// GET /api/add?id=, enqueueing a track for processing.
pub async fn add(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AddQuery>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    let track_id = query.id.trim();
    if track_id.is_empty() {
        return Err(ApiError::BadRequest("Track ID required".to_string()));
    }

    match state.dispatcher.add(track_id, Some(&user)).await? {
        AddOutcome::Started { credits } => {
            log_usage(&state.ctx.db, Some(user.id), Some(&user.username), "download", track_id)
                .await;
            log_event(
                &state.ctx.db,
                "info",
                "pipeline",
                &format!("Processing started for track {}", track_id),
                None,
                Some(track_id),
                Some(user.id),
                Some(&user.username),
            )
            .await;

            let mut body = json!({ "status": "processing", "progress": 0 });
            if let Some(credits) = credits {
                body["credits"] = json!(credits);
            }
            Ok(Json(body))
        }
        AddOutcome::Ready { metadata } => {
            let metadata = metadata.map(upgrade_metadata_cover);
            Ok(Json(json!({
                "status": "ready",
                "progress": 100,
                "metadata": metadata,
            })))
        }
        AddOutcome::AlreadyProcessing { progress } => Ok(Json(json!({
            "status": "already_processing",
            "progress": progress,
        }))),
        AddOutcome::InsufficientCredits { have, need } => {
            Err(ApiError::InsufficientCredits { have, need })
        }
    }
}

/// GET /api/track/:id
pub async fn track_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(track_id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_user(&state, &headers).await?;

    let metadata: TrackMetadata = state
        .ctx
        .store
        .load_json(&track_id, TrackFile::Metadata)?
        .ok_or_else(|| ApiError::NotFound(format!("track {}", track_id)))?;

    Ok(Json(json!({
        "metadata": upgrade_metadata_cover(metadata),
        "complete": state.ctx.store.is_complete(&track_id),
        "status": state.ctx.registry.get(&track_id),
    })))
}

/// GET /api/track/:id/lyrics
pub async fn get_lyrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(track_id): Path<String>,
) -> ApiResult<Json<LyricsDoc>> {
    require_user(&state, &headers).await?;

    let lyrics: LyricsDoc = state
        .ctx
        .store
        .load_json(&track_id, TrackFile::Lyrics)?
        .ok_or_else(|| ApiError::NotFound(format!("lyrics for track {}", track_id)))?;
    Ok(Json(lyrics))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricEdit {
    segment_index: usize,
    word_index: usize,
    word: String,
}

/// PUT /api/track/:id/lyrics: edit a single word in place.
pub async fn update_lyrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(track_id): Path<String>,
    Json(edit): Json<LyricEdit>,
) -> ApiResult<Json<Value>> {
    require_user(&state, &headers).await?;

    let word = edit.word.trim();
    if word.is_empty() {
        return Err(ApiError::BadRequest("word required".to_string()));
    }

    let mut lyrics: LyricsDoc = state
        .ctx
        .store
        .load_json(&track_id, TrackFile::Lyrics)?
        .ok_or_else(|| ApiError::NotFound(format!("lyrics for track {}", track_id)))?;

    let line = lyrics
        .segments
        .get_mut(edit.segment_index)
        .ok_or_else(|| ApiError::BadRequest("invalid segment index".to_string()))?;
    let target = line
        .words
        .get_mut(edit.word_index)
        .ok_or_else(|| ApiError::BadRequest("invalid word index".to_string()))?;
    target.word = word.to_string();

    state.ctx.store.save_json(&track_id, TrackFile::Lyrics, &lyrics)?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/library
pub async fn library(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_user(&state, &headers).await?;

    let mut tracks = Vec::new();
    for track_id in state.ctx.store.all_track_ids() {
        if let Some(meta) = state
            .ctx
            .store
            .load_json::<TrackMetadata>(&track_id, TrackFile::Metadata)
            .unwrap_or(None)
        {
            tracks.push(json!({
                "id": track_id,
                "title": meta.title,
                "artist": meta.artist,
                "album": meta.album,
                "duration": meta.duration,
                "img_url": upgrade_cover_url(&meta.img_url),
                "complete": state.ctx.store.is_complete(&track_id),
            }));
        }
    }
    Ok(Json(Value::Array(tracks)))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    id: Option<String>,
}

/// GET /api/track/status[?id=]
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Value>> {
    require_user(&state, &headers).await?;
    Ok(Json(state.dispatcher.status(query.id.as_deref())))
}

#[derive(Debug, Deserialize)]
pub struct RandomQuery {
    #[serde(default)]
    exclude: String,
}

/// GET /api/random: a random complete track, excluding recent plays.
pub async fn random_track(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RandomQuery>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;

    let complete: Vec<String> = state
        .ctx
        .store
        .all_track_ids()
        .into_iter()
        .filter(|id| state.ctx.store.is_complete(id))
        .collect();
    if complete.is_empty() {
        return Err(ApiError::NotFound("no songs available".to_string()));
    }

    let excluded: Vec<&str> = query.exclude.split(',').filter(|s| !s.is_empty()).collect();
    let available: Vec<&String> = complete
        .iter()
        .filter(|id| !excluded.contains(&id.as_str()))
        .collect();
    let pool = if available.is_empty() {
        complete.iter().collect()
    } else {
        available
    };

    let chosen: &str = pool
        .choose(&mut rand::thread_rng())
        .map(|s| s.as_str())
        .ok_or_else(|| ApiError::Internal("empty selection pool".to_string()))?;
    let metadata = state
        .ctx
        .store
        .load_json::<TrackMetadata>(chosen, TrackFile::Metadata)?
        .map(upgrade_metadata_cover);

    log_usage(&state.ctx.db, Some(user.id), Some(&user.username), "random_play", chosen).await;
    Ok(Json(json!({ "id": chosen, "metadata": metadata })))
}

/// GET /api/play/:id: record a playback event.
pub async fn log_play(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(track_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    log_usage(&state.ctx.db, Some(user.id), Some(&user.username), "play", &track_id).await;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/play/:id/credit: one credit per playback past 15 seconds.
/// Admins are exempt.
pub async fn play_credit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(_track_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;

    if user.is_admin {
        return Ok(Json(json!({ "success": true, "credits": user.credits })));
    }

    match debit_credits(&state.ctx.db, user.id, 1).await {
        Ok(balance) => Ok(Json(json!({ "success": true, "credits": balance }))),
        Err(Error::InsufficientCredits { have, need }) => {
            Err(ApiError::InsufficientCredits { have, need })
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /api/credits
pub async fn credits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers).await?;
    // Re-read so the balance reflects concurrent debits.
    let credits = get_user(&state.ctx.db, user.id)
        .await?
        .map(|u| u.credits)
        .unwrap_or(0);
    Ok(Json(json!({ "credits": credits })))
}

fn upgrade_metadata_cover(mut metadata: TrackMetadata) -> TrackMetadata {
    metadata.img_url = upgrade_cover_url(&metadata.img_url);
    metadata
}
