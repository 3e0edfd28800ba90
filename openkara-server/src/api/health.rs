//! Component health checks
//!
//! Probes the database, the artifact filesystem and each external upstream,
//! persisting every verdict to `system_status` so the admin view has the
//! latest state even between checks.

use super::require_admin;
use crate::error::ApiResult;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use openkara_common::db::upsert_system_status;
use serde_json::{json, Map, Value};

/// GET /api/admin/health
pub async fn health_check(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let admin = require_admin(&state, &headers).await?;
    let mut results = Map::new();

    // Database
    let database = match sqlx::query("SELECT 1").execute(&state.ctx.db).await {
        Ok(_) => ok("database connection successful"),
        Err(e) => error(&e.to_string()),
    };
    results.insert("database".to_string(), database);

    // Artifact filesystem: the library root must exist, be writable and
    // have room for new stems.
    let filesystem = match probe_library_root(&state) {
        Ok(message) => ok(&message),
        Err(e) => error(&e),
    };
    results.insert("filesystem".to_string(), filesystem);

    // External upstreams
    let audio_source = match state.ctx.audio_source.ping().await {
        Ok(()) => ok("audio source reachable"),
        Err(e) => error(&e.to_string()),
    };
    results.insert("audio_source".to_string(), audio_source);

    let model_host = match state.ctx.model_host.ping().await {
        Ok(()) => ok("model host reachable"),
        Err(e) => error(&e.to_string()),
    };
    results.insert("model_host".to_string(), model_host);

    let lyrics_provider = match state.ctx.lyrics.ping().await {
        Ok(()) => ok("lyrics provider reachable"),
        Err(e) => error(&e.to_string()),
    };
    results.insert("lyrics_provider".to_string(), lyrics_provider);

    let generative_provider = match state.ctx.lyrics.ping_generative().await {
        Ok(()) => ok("generative endpoint reachable"),
        Err(e) => error(&e.to_string()),
    };
    results.insert("generative_provider".to_string(), generative_provider);

    // Queue occupancy is informational, never an error.
    let active = state
        .ctx
        .registry
        .get_all()
        .values()
        .filter(|s| !s.stage.is_terminal())
        .count();
    results.insert(
        "queue".to_string(),
        ok(&format!("{} track(s) processing", active)),
    );

    for (component, verdict) in &results {
        let status = verdict.get("status").and_then(Value::as_str).unwrap_or("ERROR");
        let message = verdict.get("message").and_then(Value::as_str).unwrap_or("");
        upsert_system_status(&state.ctx.db, component, status, message, Some(&admin.username))
            .await;
    }

    Ok(Json(Value::Object(results)))
}

fn probe_library_root(state: &AppState) -> Result<String, String> {
    let root = state.ctx.store.root();
    std::fs::create_dir_all(root).map_err(|e| format!("library root unavailable: {}", e))?;
    let probe = root.join(".health_probe");
    std::fs::write(&probe, b"ok").map_err(|e| format!("library root not writable: {}", e))?;
    let _ = std::fs::remove_file(&probe);

    let tracks = state.ctx.store.all_track_ids().len();
    match available_space(root) {
        Some(bytes) => Ok(format!(
            "{:.1} GB free, {} track(s)",
            bytes as f64 / 1024f64.powi(3),
            tracks
        )),
        None => Ok(format!("library root writable, {} track(s)", tracks)),
    }
}

/// Available bytes on the filesystem holding `path`: the disk with the
/// longest mount point that is a prefix of the canonicalized path.
fn available_space(path: &std::path::Path) -> Option<u64> {
    let canonical = std::fs::canonicalize(path).ok()?;
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| canonical.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

fn ok(message: &str) -> Value {
    json!({ "status": "OK", "message": message })
}

fn error(message: &str) -> Value {
    json!({ "status": "ERROR", "message": message })
}
