//! Process-wide state, constructed once at startup
//!
//! Everything the dispatcher and pipeline need (configuration, database
//! pool, artifact store, status registry, event bus and service clients)
//! lives in one explicit context threaded through as `Arc<Context>`. No
//! module-level mutable state anywhere.

use crate::services::{AudioSourceClient, ModelHost, ReferenceLyricsClient};
use crate::store::ArtifactStore;
use openkara_common::{Config, EventBus, StatusRegistry};
use sqlx::SqlitePool;
use tokio::sync::Semaphore;

pub struct Context {
    pub config: Config,
    pub db: SqlitePool,
    pub store: ArtifactStore,
    pub registry: StatusRegistry,
    pub event_bus: EventBus,
    pub audio_source: AudioSourceClient,
    pub model_host: ModelHost,
    pub lyrics: ReferenceLyricsClient,
    /// Soft cap on concurrent pipeline workers.
    pub worker_permits: Semaphore,
}

impl Context {
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let store = ArtifactStore::new(config.library_root.clone());
        let audio_source =
            AudioSourceClient::new(&config.audio_source_url, config.audio_source_token.clone());
        let model_host = ModelHost::new(
            &config.model_host_url,
            config.model_host_token.clone(),
            &config.separator_model,
            &config.aligner_model,
        );
        let lyrics = ReferenceLyricsClient::new(
            &config.lyrics_api_url,
            &config.generative_api_url,
            config.generative_api_token.clone(),
            &config.generative_model,
        );
        let worker_permits = Semaphore::new(config.max_workers.max(1));

        Self {
            config,
            db,
            store,
            registry: StatusRegistry::new(),
            event_bus: EventBus::new(256),
            audio_source,
            model_host,
            lyrics,
            worker_permits,
        }
    }
}
