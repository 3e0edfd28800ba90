//! Pipeline behavior over on-disk artifacts, fully offline: every external
//! client points at an unroutable port, so a run that completes proves no
//! upstream was called.

mod helpers;

use helpers::*;
use openkara_common::ProcessingStage;
use openkara_server::models::{LyricsDoc, TrackMetadata};
use openkara_server::pipeline::Pipeline;
use openkara_server::store::TrackFile;
use std::collections::BTreeMap;
use std::path::Path;

fn snapshot_files(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        files.insert(
            entry.file_name().into_string().unwrap(),
            std::fs::read(entry.path()).unwrap(),
        );
    }
    files
}

#[tokio::test]
async fn test_complete_track_fast_forwards_without_external_calls() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = offline_context(dir.path()).await;

    seed_track(dir.path(), "42", ALL_ARTIFACTS);

    Pipeline::new(ctx.clone()).run("42").await;

    let status = ctx.registry.get("42").expect("status published");
    assert_eq!(status.stage, ProcessingStage::Complete);
    assert_eq!(status.progress, 100);

    // The only mutation was the completion stage stripping the media blob.
    let metadata: TrackMetadata = ctx
        .store
        .load_json("42", TrackFile::Metadata)
        .unwrap()
        .unwrap();
    assert!(metadata.source_data.is_none());
}

#[tokio::test]
async fn test_second_run_leaves_artifacts_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = offline_context(dir.path()).await;

    seed_track(dir.path(), "43", ALL_ARTIFACTS);

    Pipeline::new(ctx.clone()).run("43").await;
    let track_dir = dir.path().join("songs").join("43");
    let after_first = snapshot_files(&track_dir);

    Pipeline::new(ctx.clone()).run("43").await;
    let after_second = snapshot_files(&track_dir);

    assert_eq!(after_first, after_second);
    assert_eq!(
        ctx.registry.get("43").unwrap().stage,
        ProcessingStage::Complete
    );
}

#[tokio::test]
async fn test_zero_asr_words_with_reference_completes_untimed() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = offline_context(dir.path()).await;

    // Everything up to the processing stage is on disk; the transcript has
    // no words but cached reference lyrics exist.
    seed_track(
        dir.path(),
        "44",
        &[
            "metadata.json",
            "song.mp3",
            "vocals.mp3",
            "no_vocals.mp3",
            "lyrics_raw.json",
            "reference_lyrics.json",
        ],
    );

    Pipeline::new(ctx.clone()).run("44").await;

    let status = ctx.registry.get("44").expect("status published");
    assert_eq!(status.stage, ProcessingStage::Complete);

    let lyrics: LyricsDoc = ctx.store.load_json("44", TrackFile::Lyrics).unwrap().unwrap();
    assert_eq!(lyrics.untimed, Some(true));
    assert!(lyrics.segments.is_empty());
    assert_eq!(lyrics.lyrics_source, "reference");
    assert_eq!(
        lyrics.plain_lyrics.as_deref(),
        Some(&["Hello world".to_string(), "Goodbye world".to_string()][..])
    );
    assert!(ctx.store.is_complete("44"));
}

#[tokio::test]
async fn test_zero_asr_words_without_reference_fails_processing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = offline_context(dir.path()).await;

    seed_track(
        dir.path(),
        "45",
        &[
            "metadata.json",
            "song.mp3",
            "vocals.mp3",
            "no_vocals.mp3",
            "lyrics_raw.json",
        ],
    );

    Pipeline::new(ctx.clone()).run("45").await;

    let status = ctx.registry.get("45").expect("status published");
    assert_eq!(status.stage, ProcessingStage::Error);

    let failure = openkara_common::db::get_failure(&ctx.db, "45")
        .await
        .unwrap()
        .expect("failure recorded");
    assert_eq!(failure.stage, "processing");
    assert!(failure.error_message.contains("Reference lyrics unavailable"));

    // Artifacts stay on disk for a later reprocess.
    assert!(ctx.store.exists("45", TrackFile::LyricsRaw));
    assert!(!ctx.store.exists("45", TrackFile::Lyrics));
}

#[tokio::test]
async fn test_timed_processing_from_disk_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = offline_context(dir.path()).await;

    // A real transcript plus matching cached reference lyrics: the
    // processing stage corrects, splits and completes offline.
    let track_dir = dir.path().join("songs").join("46");
    std::fs::create_dir_all(&track_dir).unwrap();
    seed_track(
        dir.path(),
        "46",
        &["metadata.json", "song.mp3", "vocals.mp3", "no_vocals.mp3", "reference_lyrics.json"],
    );
    std::fs::write(
        track_dir.join("lyrics_raw.json"),
        serde_json::json!({
            "segments": [{
                "start": 0.0,
                "end": 1.7,
                "speaker": "SPEAKER_00",
                "words": [
                    {"word": "Helo",   "start": 0.0, "end": 0.3, "speaker": "SPEAKER_00"},
                    {"word": "wurld",  "start": 0.3, "end": 0.7, "speaker": "SPEAKER_00"},
                    {"word": "Goodby", "start": 1.0, "end": 1.4, "speaker": "SPEAKER_00"},
                    {"word": "world",  "start": 1.4, "end": 1.7, "speaker": "SPEAKER_00"}
                ]
            }]
        })
        .to_string(),
    )
    .unwrap();

    Pipeline::new(ctx.clone()).run("46").await;

    assert_eq!(ctx.registry.get("46").unwrap().stage, ProcessingStage::Complete);

    let lyrics: LyricsDoc = ctx.store.load_json("46", TrackFile::Lyrics).unwrap().unwrap();
    assert_eq!(lyrics.lyrics_source, "reference");
    assert_eq!(lyrics.segments.len(), 2);
    let first_line: Vec<&str> = lyrics.segments[0].words.iter().map(|w| w.word.as_str()).collect();
    assert_eq!(first_line, vec!["Hello", "world"]);
    assert!(lyrics.ref_stats.unwrap().applied);

    // The corrected transcript was written back.
    let raw: openkara_server::models::RawLyrics =
        ctx.store.load_json("46", TrackFile::LyricsRaw).unwrap().unwrap();
    assert_eq!(raw.segments[0].words[0].word, "Hello");
}
