//! # openkara Common Library
//!
//! Shared code for the openkara karaoke service:
//! - Error types and result alias
//! - Process configuration from environment
//! - Event types (TrackEvent enum) and EventBus
//! - Processing status registry
//! - Database initialization, migrations and logging helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod status;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventBus, TrackEvent};
pub use status::{ProcessingStage, ProcessingStatus, StatusRegistry};
