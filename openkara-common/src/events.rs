//! Event types and EventBus for the progress feed
//!
//! The pipeline publishes a `TrackEvent` after every status transition; SSE
//! handlers subscribe and forward to clients. The bus uses
//! `tokio::sync::broadcast` so slow subscribers never block producers; a
//! lagging receiver drops the oldest buffered events instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::status::{ProcessingStage, ProcessingStatus};

/// Events broadcast by the processing pipeline.
///
/// Serialized for SSE transmission with an external `type` tag so clients can
/// dispatch without inspecting the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    /// A track moved to a new stage or updated its progress/detail.
    TrackProgress {
        track_id: String,
        stage: ProcessingStage,
        progress: u8,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// The full pipeline finished; all artifacts are on disk.
    TrackReady {
        track_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage failed; the pipeline stopped for this track.
    TrackFailed {
        track_id: String,
        stage: ProcessingStage,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl TrackEvent {
    /// Event name used for the SSE `event:` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            TrackEvent::TrackProgress { .. } => "TrackProgress",
            TrackEvent::TrackReady { .. } => "TrackReady",
            TrackEvent::TrackFailed { .. } => "TrackFailed",
        }
    }

    /// The track this event concerns.
    pub fn track_id(&self) -> &str {
        match self {
            TrackEvent::TrackProgress { track_id, .. }
            | TrackEvent::TrackReady { track_id, .. }
            | TrackEvent::TrackFailed { track_id, .. } => track_id,
        }
    }

    /// Build a progress event from a registry record.
    pub fn progress(track_id: &str, status: &ProcessingStatus) -> Self {
        TrackEvent::TrackProgress {
            track_id: track_id.to_string(),
            stage: status.stage,
            progress: status.progress,
            detail: status.detail.clone(),
            timestamp: status.updated_at,
        }
    }
}

/// Central event distribution bus.
///
/// Non-blocking publish, multiple concurrent subscribers, automatic cleanup
/// when subscribers drop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TrackEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events. Events emitted before subscription are
    /// not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Returns the subscriber count, or `Err` when nobody is
    /// listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: TrackEvent,
    ) -> Result<usize, broadcast::error::SendError<TrackEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case. Progress updates are
    /// not critical; a client that attaches later polls the status registry.
    pub fn emit_lossy(&self, event: TrackEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
