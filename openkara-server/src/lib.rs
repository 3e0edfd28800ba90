//! openkara-server: karaoke track processing service
//!
//! Ingests a track by catalog id and produces a karaoke asset bundle:
//! metadata, the full audio file, isolated vocal and instrumental stems, and
//! word-level time-aligned lyrics split into singable lines. A concurrent
//! dispatcher runs per-track pipeline workers, streams progress to clients
//! over SSE and reconciles on-disk artifacts after a restart.

pub mod align;
pub mod api;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod store;

pub use crate::error::{ApiError, ApiResult};

use crate::context::Context;
use crate::dispatcher::Dispatcher;
use axum::Router;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<Context>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(ctx: Arc<Context>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&ctx)));
        Self { ctx, dispatcher }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::api_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
