//! Common error types for openkara

use thiserror::Error;

/// Common result type for openkara operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the pipeline, dispatcher and service clients.
///
/// `InsufficientCredits` and `AlreadyProcessing` are caller-facing outcomes:
/// they are returned to request handlers as values and never recorded as
/// pipeline failures.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Audio source error: {0}")]
    Source(String),

    #[error("Model host error: {0}")]
    Model(String),

    #[error("Reference lyrics unavailable for track {0}")]
    ReferenceLyricsUnavailable(String),

    #[error("Insufficient credits: have {have}, need {need}")]
    InsufficientCredits { have: i64, need: i64 },

    #[error("Track {0} is already being processed")]
    AlreadyProcessing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Pipeline stage classification used when persisting to `error_log`.
    ///
    /// Unknown kinds map to `pipeline` so that every failure lands in the
    /// admin view even when it was not anticipated.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Database(_) => "database",
            Error::Storage(_) | Error::Io(_) => "storage",
            Error::Source(_) => "source",
            Error::Model(_) => "model",
            Error::ReferenceLyricsUnavailable(_) => "lyrics",
            _ => "pipeline",
        }
    }
}
