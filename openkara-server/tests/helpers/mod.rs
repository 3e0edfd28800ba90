//! Shared fixtures for integration tests
//!
//! Contexts built here point every external client at an unroutable local
//! port, so any test that completes successfully did so without a single
//! upstream call.

use openkara_common::{db, Config};
use openkara_server::context::Context;
use openkara_server::models::TrackMetadata;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn offline_config(root: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        debug: false,
        library_root: root.join("songs"),
        database_path: root.join("openkara.db"),
        public_base_url: "http://localhost".to_string(),
        audio_source_url: "http://127.0.0.1:1".to_string(),
        audio_source_token: None,
        model_host_url: "http://127.0.0.1:1".to_string(),
        model_host_token: None,
        separator_model: "demucs:test".to_string(),
        aligner_model: "whisper-align:test".to_string(),
        lyrics_api_url: "http://127.0.0.1:1".to_string(),
        generative_api_url: "http://127.0.0.1:1".to_string(),
        generative_api_token: None,
        generative_model: "audio-omni-test".to_string(),
        admin_username: None,
        admin_password: None,
        reconcile_delay: Duration::from_millis(0),
        reconcile_stagger: Duration::from_millis(0),
        max_workers: 4,
    }
}

pub async fn offline_context(root: &Path) -> Arc<Context> {
    let config = offline_config(root);
    let pool = db::init_database(&config.database_path).await.unwrap();
    Arc::new(Context::new(config, pool))
}

pub async fn insert_user(pool: &SqlitePool, username: &str, is_admin: bool, credits: i64) -> i64 {
    sqlx::query("INSERT INTO users (username, is_admin, is_approved, credits) VALUES (?, ?, 1, ?)")
        .bind(username)
        .bind(is_admin)
        .bind(credits)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub fn sample_metadata(track_id: &str, with_source_data: bool) -> TrackMetadata {
    TrackMetadata {
        id: track_id.to_string(),
        title: "Test Song".to_string(),
        artist: "Test Artist".to_string(),
        album: "Test Album".to_string(),
        duration: 180,
        img_url: String::new(),
        source_data: with_source_data.then(|| serde_json::json!({"media_token": "abc123"})),
    }
}

/// Seed a track directory with the given artifact files.
pub fn seed_track(root: &Path, track_id: &str, files: &[&str]) {
    let dir = root.join("songs").join(track_id);
    std::fs::create_dir_all(&dir).unwrap();
    for name in files {
        let body: Vec<u8> = match *name {
            "metadata.json" => serde_json::to_vec_pretty(&sample_metadata(track_id, true)).unwrap(),
            "lyrics_raw.json" => br#"{"segments":[]}"#.to_vec(),
            "reference_lyrics.json" => br#"{"lines":["Hello world","Goodbye world"]}"#.to_vec(),
            "lyrics.json" => {
                br#"{"segments":[],"untimed":true,"plain_lyrics":["x"],"lyrics_source":"reference"}"#
                    .to_vec()
            }
            _ => b"mp3-bytes".to_vec(),
        };
        std::fs::write(dir.join(name), body).unwrap();
    }
}

pub const ALL_ARTIFACTS: &[&str] = &[
    "metadata.json",
    "song.mp3",
    "vocals.mp3",
    "no_vocals.mp3",
    "lyrics_raw.json",
    "lyrics.json",
];

/// Poll the registry until the track reaches a terminal stage.
pub async fn wait_for_terminal(ctx: &Context, track_id: &str) -> openkara_common::ProcessingStatus {
    for _ in 0..200 {
        if let Some(status) = ctx.registry.get(track_id) {
            if status.stage.is_terminal() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("track {} never reached a terminal state", track_id);
}
