//! In-memory processing status registry
//!
//! One record per track currently known to the queue. The registry is the
//! single source of truth for "is a worker running for this track": the
//! dispatcher rejects a second enqueue while a non-terminal record exists.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pipeline stages in execution order, plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Pending,
    Metadata,
    Downloading,
    Splitting,
    Lyrics,
    Processing,
    Complete,
    Error,
}

impl ProcessingStage {
    /// Progress published when the stage completes (or its artifact is
    /// already present on disk).
    pub fn progress_floor(&self) -> u8 {
        match self {
            ProcessingStage::Pending => 0,
            ProcessingStage::Metadata => 5,
            ProcessingStage::Downloading => 15,
            ProcessingStage::Splitting => 35,
            ProcessingStage::Lyrics => 65,
            ProcessingStage::Processing => 87,
            ProcessingStage::Complete => 100,
            ProcessingStage::Error => 0,
        }
    }

    /// Terminal states allow a new worker to be spawned for the track.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStage::Complete | ProcessingStage::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Pending => "pending",
            ProcessingStage::Metadata => "metadata",
            ProcessingStage::Downloading => "downloading",
            ProcessingStage::Splitting => "splitting",
            ProcessingStage::Lyrics => "lyrics",
            ProcessingStage::Processing => "processing",
            ProcessingStage::Complete => "complete",
            ProcessingStage::Error => "error",
        }
    }
}

/// Volatile per-track status, surfaced verbatim to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    #[serde(rename = "status")]
    pub stage: ProcessingStage,
    pub progress: u8,
    pub detail: String,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe map `track_id -> ProcessingStatus`.
///
/// All operations take a single lock with short critical sections; `get_all`
/// returns a defensive copy so callers never hold the lock while serializing.
#[derive(Default)]
pub struct StatusRegistry {
    inner: Mutex<HashMap<String, ProcessingStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, track_id: &str, stage: ProcessingStage, progress: u8, detail: &str) {
        let mut map = self.inner.lock();
        map.insert(
            track_id.to_string(),
            ProcessingStatus {
                stage,
                progress,
                detail: detail.to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, track_id: &str) -> Option<ProcessingStatus> {
        self.inner.lock().get(track_id).cloned()
    }

    pub fn get_all(&self) -> HashMap<String, ProcessingStatus> {
        self.inner.lock().clone()
    }

    pub fn remove(&self, track_id: &str) {
        self.inner.lock().remove(track_id);
    }

    /// Atomically claim a track for a new worker.
    ///
    /// Fails when a non-terminal record exists. On success the track is
    /// marked PENDING under the same lock, so two racing enqueues can never
    /// both claim it.
    pub fn try_claim(&self, track_id: &str) -> bool {
        let mut map = self.inner.lock();
        if let Some(status) = map.get(track_id) {
            if !status.stage.is_terminal() {
                return false;
            }
        }
        map.insert(
            track_id.to_string(),
            ProcessingStatus {
                stage: ProcessingStage::Pending,
                progress: 0,
                detail: "Queued".to_string(),
                updated_at: Utc::now(),
            },
        );
        true
    }

    /// True when a non-terminal record exists, i.e. a worker owns the track.
    pub fn is_active(&self, track_id: &str) -> bool {
        self.inner
            .lock()
            .get(track_id)
            .map(|s| !s.stage.is_terminal())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_floors() {
        assert_eq!(ProcessingStage::Metadata.progress_floor(), 5);
        assert_eq!(ProcessingStage::Downloading.progress_floor(), 15);
        assert_eq!(ProcessingStage::Splitting.progress_floor(), 35);
        assert_eq!(ProcessingStage::Lyrics.progress_floor(), 65);
        assert_eq!(ProcessingStage::Processing.progress_floor(), 87);
        assert_eq!(ProcessingStage::Complete.progress_floor(), 100);
    }

    #[test]
    fn test_set_get_remove() {
        let registry = StatusRegistry::new();
        assert!(registry.get("1").is_none());

        registry.set("1", ProcessingStage::Splitting, 25, "Separating vocals...");
        let status = registry.get("1").expect("status present");
        assert_eq!(status.stage, ProcessingStage::Splitting);
        assert_eq!(status.progress, 25);
        assert_eq!(status.detail, "Separating vocals...");

        registry.remove("1");
        assert!(registry.get("1").is_none());
    }

    #[test]
    fn test_is_active_respects_terminal_states() {
        let registry = StatusRegistry::new();
        assert!(!registry.is_active("9"));

        registry.set("9", ProcessingStage::Lyrics, 58, "");
        assert!(registry.is_active("9"));

        registry.set("9", ProcessingStage::Complete, 100, "Ready to play!");
        assert!(!registry.is_active("9"));

        registry.set("9", ProcessingStage::Error, 0, "download failed");
        assert!(!registry.is_active("9"));
    }

    #[test]
    fn test_try_claim_blocks_second_claim() {
        let registry = StatusRegistry::new();
        assert!(registry.try_claim("5"));
        assert!(!registry.try_claim("5"));

        // Terminal states release the claim.
        registry.set("5", ProcessingStage::Error, 0, "failed");
        assert!(registry.try_claim("5"));
    }

    #[test]
    fn test_get_all_is_a_copy() {
        let registry = StatusRegistry::new();
        registry.set("1", ProcessingStage::Metadata, 5, "");
        let mut snapshot = registry.get_all();
        snapshot.remove("1");
        // Mutating the snapshot must not affect the registry.
        assert!(registry.get("1").is_some());
    }

    #[test]
    fn test_stage_serde_lowercase() {
        let json = serde_json::to_string(&ProcessingStage::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }
}
