//! Track artifact schemas
//!
//! These mirror the JSON files in the per-track artifact directory. The raw
//! ASR schema is deliberately loose (every timing optional) because the model
//! host omits fields freely; the karaoke output schema is strict.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default speaker label applied when diarization was disabled or failed.
pub const DEFAULT_SPEAKER: &str = "SPEAKER_00";

/// `metadata.json`, written by the metadata stage.
///
/// `img_url` is the canonical cover field. `source_data` is the opaque blob
/// the audio source needs for the media download; the completion stage strips
/// it once the track is fully processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub img_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<Value>,
}

/// One search hit from the audio source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub img_url: String,
}

/// `lyrics_raw.json`: word-level ASR output, normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLyrics {
    #[serde(default)]
    pub segments: Vec<RawSegment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub words: Vec<RawWord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWord {
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl RawLyrics {
    /// True when at least one word has non-whitespace text.
    pub fn has_words(&self) -> bool {
        self.segments
            .iter()
            .flat_map(|s| s.words.iter())
            .any(|w| !w.word.trim().is_empty())
    }
}

/// `reference_lyrics.json`: clean plain-text lines from a lyrics provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceLyrics {
    pub lines: Vec<String>,
}

/// A fully-timed word in the karaoke output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One karaoke line: inclusive start/end and the majority speaker of its
/// words.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricLine {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    pub words: Vec<TimedWord>,
}

/// Correction metadata attached to the karaoke output when reference lyrics
/// were available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefStats {
    pub quality: f64,
    pub total_words: usize,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `lyrics.json`: the karaoke asset.
///
/// Either timed (`segments` populated) or untimed (`untimed: true` with
/// `plain_lyrics`); an untimed document still completes the track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsDoc {
    pub segments: Vec<LyricLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untimed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain_lyrics: Option<Vec<String>>,
    pub lyrics_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_stats: Option<RefStats>,
}

impl LyricsDoc {
    /// Untimed fallback document used when ASR produced no words but
    /// reference lyrics exist.
    pub fn untimed(plain_lyrics: Vec<String>) -> Self {
        Self {
            segments: Vec::new(),
            untimed: Some(true),
            plain_lyrics: Some(plain_lyrics),
            lyrics_source: "reference".to_string(),
            avg_confidence: None,
            ref_stats: None,
        }
    }
}
