//! ASR transcript health filter
//!
//! Guards the lyrics stage against two failure modes of the aligner model:
//! character-level breakage (the model emitting one letter per "word") and a
//! transcript that bears no resemblance to the known reference lyrics.

use super::similarity::ratio;
use crate::models::RawLyrics;

/// Verdict of the transcript health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsrHealth {
    Healthy,
    Rejected { reason: String },
}

impl AsrHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, AsrHealth::Healthy)
    }
}

/// Check a raw transcript for obvious breakage.
///
/// Rejects when more than half of the non-empty tokens are single characters
/// (only once there are more than 10 tokens, so short ad-libs pass), or when
/// reference lyrics exist and the flattened transcript scores below 0.30
/// similarity against them.
pub fn check_asr_health(raw: &RawLyrics, ref_lines: Option<&[String]>) -> AsrHealth {
    let tokens: Vec<&str> = raw
        .segments
        .iter()
        .flat_map(|s| s.words.iter())
        .map(|w| w.word.trim())
        .filter(|t| !t.is_empty())
        .collect();

    let total = tokens.len();
    if total > 10 {
        let short = tokens.iter().filter(|t| t.chars().count() <= 1).count();
        if short as f64 / total as f64 > 0.5 {
            return AsrHealth::Rejected {
                reason: format!("character-level breakage: {}/{} single-char tokens", short, total),
            };
        }
    }

    if let Some(lines) = ref_lines {
        if !lines.is_empty() {
            let flat = tokens.join(" ").to_lowercase();
            let reference = lines.join(" ").to_lowercase();
            let r = ratio(&flat, &reference);
            if r < 0.30 {
                return AsrHealth::Rejected {
                    reason: format!("transcript similarity {:.2} below 0.30 against reference", r),
                };
            }
        }
    }

    AsrHealth::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawSegment, RawWord};

    fn raw_from_tokens(tokens: &[&str]) -> RawLyrics {
        RawLyrics {
            segments: vec![RawSegment {
                words: tokens
                    .iter()
                    .map(|t| RawWord {
                        word: t.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_ten_single_char_tokens_pass() {
        // At exactly 10 tokens the breakage check does not engage.
        let raw = raw_from_tokens(&["a"; 10]);
        assert!(check_asr_health(&raw, None).is_healthy());
    }

    #[test]
    fn test_eleven_single_char_tokens_rejected() {
        let raw = raw_from_tokens(&["a"; 11]);
        let verdict = check_asr_health(&raw, None);
        assert!(!verdict.is_healthy());
        match verdict {
            AsrHealth::Rejected { reason } => assert!(reason.contains("11/11")),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_exactly_half_short_tokens_pass() {
        // 6 short of 12 is not "more than 50%".
        let mut tokens = vec!["a"; 6];
        tokens.extend(["hello"; 6]);
        let raw = raw_from_tokens(&tokens);
        assert!(check_asr_health(&raw, None).is_healthy());
    }

    #[test]
    fn test_reference_similarity_rejection() {
        let raw = raw_from_tokens(&["zzz", "qqq", "xxx"]);
        let lines = vec!["hello world goodbye world".to_string()];
        let verdict = check_asr_health(&raw, Some(&lines));
        assert!(!verdict.is_healthy());
    }

    #[test]
    fn test_matching_reference_passes() {
        let raw = raw_from_tokens(&["hello", "world", "goodbye", "world"]);
        let lines = vec!["Hello world".to_string(), "Goodbye world".to_string()];
        assert!(check_asr_health(&raw, Some(&lines)).is_healthy());
    }

    #[test]
    fn test_empty_transcript_with_reference_rejected() {
        let raw = RawLyrics::default();
        let lines = vec!["some lyrics".to_string()];
        assert!(!check_asr_health(&raw, Some(&lines)).is_healthy());
    }
}
