//! Filesystem-backed artifact store
//!
//! One directory per track, named by the numeric track id. File presence is
//! authoritative evidence of stage completion, so every write goes through a
//! temp sibling followed by an atomic rename. Readers observe either the
//! previous or the new complete file, never a partial one.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use openkara_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Per-track artifact files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackFile {
    Metadata,
    Song,
    Vocals,
    NoVocals,
    LyricsRaw,
    ReferenceLyrics,
    Lyrics,
}

impl TrackFile {
    pub const ALL: [TrackFile; 7] = [
        TrackFile::Metadata,
        TrackFile::Song,
        TrackFile::Vocals,
        TrackFile::NoVocals,
        TrackFile::LyricsRaw,
        TrackFile::ReferenceLyrics,
        TrackFile::Lyrics,
    ];

    /// Files that must exist for a track to count as complete.
    pub const REQUIRED: [TrackFile; 5] = [
        TrackFile::Metadata,
        TrackFile::Song,
        TrackFile::Vocals,
        TrackFile::NoVocals,
        TrackFile::Lyrics,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            TrackFile::Metadata => "metadata.json",
            TrackFile::Song => "song.mp3",
            TrackFile::Vocals => "vocals.mp3",
            TrackFile::NoVocals => "no_vocals.mp3",
            TrackFile::LyricsRaw => "lyrics_raw.json",
            TrackFile::ReferenceLyrics => "reference_lyrics.json",
            TrackFile::Lyrics => "lyrics.json",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            TrackFile::Metadata => "metadata",
            TrackFile::Song => "song",
            TrackFile::Vocals => "vocals",
            TrackFile::NoVocals => "no_vocals",
            TrackFile::LyricsRaw => "lyrics_raw",
            TrackFile::ReferenceLyrics => "reference_lyrics",
            TrackFile::Lyrics => "lyrics",
        }
    }
}

/// Artifact store rooted at the configured library directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Track directory, created on demand.
    pub fn dir(&self, track_id: &str) -> Result<PathBuf> {
        let path = self.root.join(track_id);
        std::fs::create_dir_all(&path)
            .map_err(|e| Error::Storage(format!("create {}: {}", path.display(), e)))?;
        Ok(path)
    }

    pub fn path(&self, track_id: &str, file: TrackFile) -> PathBuf {
        self.root.join(track_id).join(file.file_name())
    }

    /// Present and non-empty. A zero-length file is a crashed write and does
    /// not count as stage completion.
    pub fn exists(&self, track_id: &str, file: TrackFile) -> bool {
        self.path(track_id, file)
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    pub fn is_complete(&self, track_id: &str) -> bool {
        TrackFile::REQUIRED.iter().all(|f| self.exists(track_id, *f))
    }

    pub fn save_json<T: Serialize>(&self, track_id: &str, file: TrackFile, value: &T) -> Result<()> {
        let dir = self.dir(track_id)?;
        let body = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::Storage(format!("serialize {}: {}", file.file_name(), e)))?;
        atomic_write(&dir, file.file_name(), &body)
    }

    pub fn load_json<T: DeserializeOwned>(
        &self,
        track_id: &str,
        file: TrackFile,
    ) -> Result<Option<T>> {
        let path = self.path(track_id, file);
        if !path.exists() {
            return Ok(None);
        }
        let body = std::fs::read(&path)
            .map_err(|e| Error::Storage(format!("read {}: {}", path.display(), e)))?;
        let value = serde_json::from_slice(&body)
            .map_err(|e| Error::Storage(format!("parse {}: {}", path.display(), e)))?;
        Ok(Some(value))
    }

    /// Stream a binary body to an artifact file (temp sibling + rename).
    pub async fn save_binary<S, E>(&self, track_id: &str, file: TrackFile, stream: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let dir = self.dir(track_id)?;
        let final_path = dir.join(file.file_name());
        let tmp_path = dir.join(format!(".{}.part", file.file_name()));
        let mut stream = std::pin::pin!(stream);

        let mut out = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::Storage(format!("create {}: {}", tmp_path.display(), e)))?;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                Error::Storage(format!("stream to {}: {}", final_path.display(), e))
            })?;
            out.write_all(&chunk)
                .await
                .map_err(|e| Error::Storage(format!("write {}: {}", tmp_path.display(), e)))?;
            written += chunk.len() as u64;
        }
        out.flush()
            .await
            .map_err(|e| Error::Storage(format!("flush {}: {}", tmp_path.display(), e)))?;
        drop(out);

        if written == 0 {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(Error::Storage(format!(
                "empty download for {}",
                final_path.display()
            )));
        }

        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| Error::Storage(format!("rename {}: {}", final_path.display(), e)))?;
        Ok(written)
    }

    /// Remove a single artifact if present (reprocess-from-stage support).
    pub fn remove(&self, track_id: &str, file: TrackFile) -> Result<()> {
        let path = self.path(track_id, file);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| Error::Storage(format!("remove {}: {}", path.display(), e)))?;
        }
        Ok(())
    }

    /// Remove the whole track directory. Returns false when it did not exist.
    pub fn delete(&self, track_id: &str) -> Result<bool> {
        let path = self.root.join(track_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&path)
            .map_err(|e| Error::Storage(format!("delete {}: {}", path.display(), e)))?;
        Ok(true)
    }

    /// All track directories (purely numeric names only).
    pub fn all_track_ids(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()))
            .collect();
        ids.sort();
        ids
    }

    pub fn file_sizes(&self, track_id: &str) -> HashMap<&'static str, u64> {
        let mut sizes = HashMap::new();
        for file in TrackFile::ALL {
            if let Ok(meta) = self.path(track_id, file).metadata() {
                sizes.insert(file.key(), meta.len());
            }
        }
        sizes
    }

    /// Re-encode an audio file in place at the given bitrate using ffmpeg.
    ///
    /// Writes to a temp sibling, then atomically replaces the original, so a
    /// concurrent reader sees either encoding in full.
    pub async fn compress_audio(&self, path: &Path, target_kbps: u32) -> Result<()> {
        if !path.exists() {
            return Err(Error::Storage(format!(
                "audio file not found: {}",
                path.display()
            )));
        }
        let tmp_path = path.with_extension("tmp.mp3");

        let run = tokio::process::Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(path)
            .arg("-b:a")
            .arg(format!("{}k", target_kbps))
            .arg("-map")
            .arg("a")
            .arg(&tmp_path)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(300), run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(Error::Storage(format!("ffmpeg spawn failed: {}", e)));
            }
            Err(_) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(Error::Storage("ffmpeg timed out".to_string()));
            }
        };

        if !output.status.success() {
            let _ = std::fs::remove_file(&tmp_path);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Storage(format!(
                "ffmpeg failed ({}): {}",
                output.status,
                stderr.lines().last().unwrap_or("")
            )));
        }

        std::fs::rename(&tmp_path, path)
            .map_err(|e| Error::Storage(format!("replace {}: {}", path.display(), e)))?;
        Ok(())
    }
}

/// Write bytes to `dir/name` via a temp sibling and atomic rename.
fn atomic_write(dir: &Path, name: &str, body: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::Storage(format!("temp file in {}: {}", dir.display(), e)))?;
    std::io::Write::write_all(&mut tmp, body)
        .map_err(|e| Error::Storage(format!("write temp in {}: {}", dir.display(), e)))?;
    tmp.persist(dir.join(name))
        .map_err(|e| Error::Storage(format!("persist {}: {}", name, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackMetadata;

    fn store_pair() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    fn sample_metadata() -> TrackMetadata {
        TrackMetadata {
            id: "100".to_string(),
            title: "T".to_string(),
            artist: "A".to_string(),
            album: String::new(),
            duration: 60,
            img_url: String::new(),
            source_data: None,
        }
    }

    #[test]
    fn test_save_load_json_round_trip() {
        let (_tmp, store) = store_pair();
        let meta = sample_metadata();
        store.save_json("100", TrackFile::Metadata, &meta).unwrap();

        let loaded: TrackMetadata = store
            .load_json("100", TrackFile::Metadata)
            .unwrap()
            .expect("metadata present");
        assert_eq!(loaded.id, "100");
        assert_eq!(loaded.duration, 60);
    }

    #[test]
    fn test_load_json_missing_is_none() {
        let (_tmp, store) = store_pair();
        let loaded: Option<TrackMetadata> = store.load_json("1", TrackFile::Metadata).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_exists_requires_non_empty() {
        let (_tmp, store) = store_pair();
        let dir = store.dir("5").unwrap();
        std::fs::write(dir.join("song.mp3"), b"").unwrap();
        assert!(!store.exists("5", TrackFile::Song));

        std::fs::write(dir.join("song.mp3"), b"mp3-bytes").unwrap();
        assert!(store.exists("5", TrackFile::Song));
    }

    #[test]
    fn test_is_complete_matrix() {
        let (_tmp, store) = store_pair();
        let dir = store.dir("7").unwrap();
        assert!(!store.is_complete("7"));

        store.save_json("7", TrackFile::Metadata, &sample_metadata()).unwrap();
        for name in ["song.mp3", "vocals.mp3", "no_vocals.mp3"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        // lyrics.json still missing
        assert!(!store.is_complete("7"));

        std::fs::write(dir.join("lyrics.json"), b"{}").unwrap();
        assert!(store.is_complete("7"));
    }

    #[test]
    fn test_all_track_ids_numeric_only() {
        let (_tmp, store) = store_pair();
        store.dir("123").unwrap();
        store.dir("456").unwrap();
        std::fs::create_dir_all(store.root().join("not-a-track")).unwrap();
        std::fs::write(store.root().join("789"), b"a file, not a dir").unwrap();

        let ids = store.all_track_ids();
        assert_eq!(ids, vec!["123".to_string(), "456".to_string()]);
    }

    #[test]
    fn test_delete_and_file_sizes() {
        let (_tmp, store) = store_pair();
        let dir = store.dir("9").unwrap();
        std::fs::write(dir.join("song.mp3"), b"12345").unwrap();

        let sizes = store.file_sizes("9");
        assert_eq!(sizes.get("song"), Some(&5));

        assert!(store.delete("9").unwrap());
        assert!(!store.delete("9").unwrap());
    }

    #[tokio::test]
    async fn test_save_binary_rejects_empty_stream() {
        let (_tmp, store) = store_pair();
        let stream = futures::stream::iter(Vec::<std::result::Result<Bytes, String>>::new());
        let err = store
            .save_binary("3", TrackFile::Song, Box::pin(stream))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty download"));
        assert!(!store.exists("3", TrackFile::Song));
    }

    #[tokio::test]
    async fn test_save_binary_writes_atomically() {
        let (_tmp, store) = store_pair();
        let chunks: Vec<std::result::Result<Bytes, String>> =
            vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];
        let written = store
            .save_binary("3", TrackFile::Song, Box::pin(futures::stream::iter(chunks)))
            .await
            .unwrap();
        assert_eq!(written, 6);
        assert_eq!(std::fs::read(store.path("3", TrackFile::Song)).unwrap(), b"abcdef");
        // No leftover partial file
        assert!(!store.root().join("3").join(".song.mp3.part").exists());
    }
}
