//! Process configuration
//!
//! All settings come from environment variables with compiled defaults, so a
//! bare `openkara-server` starts against local paths and the public service
//! endpoints. API tokens have no defaults; the owning client degrades to its
//! fallback (or a typed error) when a token is absent.

use std::path::PathBuf;
use std::time::Duration;

/// Service configuration assembled once at startup and threaded into the
/// dispatcher and pipeline. Never global.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
    /// Verbose logging toggle
    pub debug: bool,
    /// Root directory of per-track artifact directories
    pub library_root: PathBuf,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Base URL the service uses for self-reference in outbound links
    pub public_base_url: String,

    /// Audio source (search / track info / media download)
    pub audio_source_url: String,
    pub audio_source_token: Option<String>,

    /// Model host (file upload + versioned model invocation)
    pub model_host_url: String,
    pub model_host_token: Option<String>,
    /// Versioned separator model identifier
    pub separator_model: String,
    /// Versioned word-level ASR model identifier
    pub aligner_model: String,

    /// Plain-lyrics search endpoint
    pub lyrics_api_url: String,
    /// Generative chat-completions endpoint used as lyrics fallback
    pub generative_api_url: String,
    pub generative_api_token: Option<String>,
    pub generative_model: String,

    /// Bootstrap admin account, created on first start when set
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,

    /// Delay before the startup reconcile pass (lets SSE listeners attach)
    pub reconcile_delay: Duration,
    /// Minimum gap between reconcile worker spawns
    pub reconcile_stagger: Duration,
    /// Soft cap on concurrent pipeline workers
    pub max_workers: usize,
}

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            host: env_str("HOST", "0.0.0.0"),
            port: env_parse("PORT", 5060),
            debug: env_parse("DEBUG", false),
            library_root: PathBuf::from(env_str("LIBRARY_ROOT", "songs")),
            database_path: PathBuf::from(env_str("DATABASE_PATH", "openkara.db")),
            public_base_url: env_str("PUBLIC_BASE_URL", "http://localhost:5060"),

            audio_source_url: env_str("AUDIO_SOURCE_URL", "https://api.audiosource.example"),
            audio_source_token: env_opt("AUDIO_SOURCE_TOKEN"),

            model_host_url: env_str("MODEL_HOST_URL", "https://api.modelhost.example/v1"),
            model_host_token: env_opt("MODEL_HOST_TOKEN"),
            separator_model: env_str("SEPARATOR_MODEL", "demucs:htdemucs-2023"),
            aligner_model: env_str("ALIGNER_MODEL", "whisper-align:large-v3"),

            lyrics_api_url: env_str("LYRICS_API_URL", "https://lrclib.net/api"),
            generative_api_url: env_str("GENERATIVE_API_URL", "https://api.generative.example/v1"),
            generative_api_token: env_opt("GENERATIVE_API_TOKEN"),
            generative_model: env_str("GENERATIVE_MODEL", "audio-omni-2"),

            admin_username: env_opt("ADMIN_USERNAME"),
            admin_password: env_opt("ADMIN_PASSWORD"),

            reconcile_delay: Duration::from_secs(env_parse("RECONCILE_DELAY_SECS", 5)),
            reconcile_stagger: Duration::from_secs(env_parse("RECONCILE_STAGGER_SECS", 2)),
            max_workers: env_parse("MAX_WORKERS", 4),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
