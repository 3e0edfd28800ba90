//! Job dispatcher
//!
//! Accepts new work from request handlers, enforces one worker per track,
//! spawns pipeline workers under the global concurrency cap and reconciles
//! on-disk artifacts against completion state at startup.

use crate::context::Context;
use crate::models::TrackMetadata;
use crate::pipeline::Pipeline;
use crate::store::TrackFile;
use openkara_common::db::{debit_credits, User};
use openkara_common::{Error, ProcessingStage, Result};
use std::sync::Arc;

/// Credits debited from a non-admin user per processed track.
const CREDITS_PER_TRACK: i64 = 5;

/// Typed outcome of an enqueue attempt. Caller-facing conditions are values
/// here, never pipeline failures.
#[derive(Debug)]
pub enum AddOutcome {
    /// Worker spawned. Carries the debited user's new balance when one was
    /// charged.
    Started { credits: Option<i64> },
    /// All artifacts already on disk; no worker, no charge.
    Ready { metadata: Option<TrackMetadata> },
    /// A non-terminal registry entry exists for this track.
    AlreadyProcessing { progress: u8 },
    /// Non-admin user below the per-track cost. Nothing was charged.
    InsufficientCredits { have: i64, need: i64 },
}

/// Artifact scopes for admin reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprocessStage {
    All,
    Splitting,
    Lyrics,
    Processing,
}

impl ReprocessStage {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(ReprocessStage::All),
            "splitting" => Some(ReprocessStage::Splitting),
            "lyrics" => Some(ReprocessStage::Lyrics),
            "processing" => Some(ReprocessStage::Processing),
            _ => None,
        }
    }

    /// Artifacts whose absence makes the desired stages re-run.
    fn artifacts_to_remove(&self) -> &'static [TrackFile] {
        match self {
            ReprocessStage::All => &[
                TrackFile::Metadata,
                TrackFile::Song,
                TrackFile::Vocals,
                TrackFile::NoVocals,
                TrackFile::LyricsRaw,
                TrackFile::ReferenceLyrics,
                TrackFile::Lyrics,
            ],
            ReprocessStage::Splitting => &[
                TrackFile::Vocals,
                TrackFile::NoVocals,
                TrackFile::LyricsRaw,
                TrackFile::ReferenceLyrics,
                TrackFile::Lyrics,
            ],
            ReprocessStage::Lyrics => &[
                TrackFile::LyricsRaw,
                TrackFile::ReferenceLyrics,
                TrackFile::Lyrics,
            ],
            ReprocessStage::Processing => &[TrackFile::Lyrics],
        }
    }
}

pub struct Dispatcher {
    ctx: Arc<Context>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Enqueue a track for processing.
    ///
    /// Order matters: the duplicate check comes first so a second enqueue of
    /// a running track costs nothing, then the completeness short-circuit
    /// (also free), and only then the credit debit for non-admins. The claim
    /// is taken atomically up front: the debit is an await point, and two
    /// racing enqueues must never both spawn a worker.
    pub async fn add(&self, track_id: &str, user: Option<&User>) -> Result<AddOutcome> {
        if !self.ctx.registry.try_claim(track_id) {
            let progress = self
                .ctx
                .registry
                .get(track_id)
                .map(|s| s.progress)
                .unwrap_or(0);
            return Ok(AddOutcome::AlreadyProcessing { progress });
        }

        if self.ctx.store.is_complete(track_id) {
            self.ctx.registry.remove(track_id);
            let metadata = self
                .ctx
                .store
                .load_json(track_id, TrackFile::Metadata)
                .unwrap_or(None);
            return Ok(AddOutcome::Ready { metadata });
        }

        let mut credits = None;
        if let Some(user) = user {
            if !user.is_admin {
                match debit_credits(&self.ctx.db, user.id, CREDITS_PER_TRACK).await {
                    Ok(balance) => credits = Some(balance),
                    Err(Error::InsufficientCredits { have, need }) => {
                        self.ctx.registry.remove(track_id);
                        return Ok(AddOutcome::InsufficientCredits { have, need });
                    }
                    Err(e) => {
                        self.ctx.registry.remove(track_id);
                        return Err(e);
                    }
                }
            }
        }

        self.spawn_worker(track_id);
        Ok(AddOutcome::Started { credits })
    }

    /// Admin reprocess: delete the stage-appropriate artifacts, then enqueue
    /// without charging credits.
    pub async fn reprocess(&self, track_id: &str, from_stage: ReprocessStage) -> Result<AddOutcome> {
        if !self.ctx.registry.try_claim(track_id) {
            let progress = self
                .ctx
                .registry
                .get(track_id)
                .map(|s| s.progress)
                .unwrap_or(0);
            return Ok(AddOutcome::AlreadyProcessing { progress });
        }

        for file in from_stage.artifacts_to_remove() {
            if let Err(e) = self.ctx.store.remove(track_id, *file) {
                self.ctx.registry.remove(track_id);
                return Err(e);
            }
        }

        self.spawn_worker(track_id);
        Ok(AddOutcome::Started { credits: None })
    }

    /// Current status of one track, or a snapshot of all tracked tracks.
    ///
    /// A track without a registry entry but with complete artifacts reports
    /// COMPLETE, so clients get a stable answer across restarts.
    pub fn status(&self, track_id: Option<&str>) -> serde_json::Value {
        match track_id {
            Some(id) => match self.ctx.registry.get(id) {
                Some(status) => serde_json::to_value(&status).unwrap_or_default(),
                None if self.ctx.store.is_complete(id) => serde_json::json!({
                    "status": "complete",
                    "progress": 100,
                }),
                None => serde_json::json!({ "status": "unknown", "progress": 0 }),
            },
            None => serde_json::to_value(self.ctx.registry.get_all()).unwrap_or_default(),
        }
    }

    /// Tracks whose artifact directories are incomplete and that no worker
    /// currently owns. These are the reconcile targets.
    pub fn unfinished_tracks(&self) -> Vec<String> {
        self.ctx
            .store
            .all_track_ids()
            .into_iter()
            .filter(|id| !self.ctx.store.is_complete(id))
            .filter(|id| !self.ctx.registry.is_active(id))
            .collect()
    }

    /// Startup reconciliation: after a settling delay (so SSE listeners can
    /// attach), resume every unfinished track. Spawns are staggered to avoid
    /// a thundering herd against the model host; each worker fast-forwards
    /// through the stages whose artifacts already exist.
    pub async fn reconcile(&self) {
        tokio::time::sleep(self.ctx.config.reconcile_delay).await;

        let targets = self.unfinished_tracks();
        if targets.is_empty() {
            tracing::info!("reconcile: no unfinished tracks");
            return;
        }
        tracing::info!("reconcile: resuming {} unfinished track(s)", targets.len());

        for (i, track_id) in targets.iter().enumerate() {
            // A request handler may have claimed the track during the stagger.
            if !self.ctx.registry.try_claim(track_id) {
                continue;
            }
            tracing::info!(track_id = %track_id, "reconcile: resuming track");
            self.spawn_worker(track_id);
            if i + 1 < targets.len() {
                tokio::time::sleep(self.ctx.config.reconcile_stagger).await;
            }
        }
    }

    /// Mark the track as queued and launch its pipeline worker. The status
    /// is published before the task starts so a duplicate `add` arriving
    /// in between is rejected.
    fn spawn_worker(&self, track_id: &str) {
        self.ctx.registry.set(
            track_id,
            ProcessingStage::Metadata,
            ProcessingStage::Metadata.progress_floor(),
            "Getting song info...",
        );

        let ctx = Arc::clone(&self.ctx);
        let track_id = track_id.to_string();
        tokio::spawn(async move {
            let _permit = ctx
                .worker_permits
                .acquire()
                .await
                .expect("worker semaphore closed");
            Pipeline::new(Arc::clone(&ctx)).run(&track_id).await;
        });
    }
}
