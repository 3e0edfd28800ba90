//! Lyric alignment and correction engine
//!
//! Pure functions from (raw ASR transcript, reference lyric lines) to a
//! corrected transcript, line-break positions and karaoke lines. No I/O, no
//! hidden state: the same input always produces the same output.
//!
//! Correction pipeline:
//!   1. tokenize the reference lines
//!   2. globally align reference tokens to ASR words (Needleman–Wunsch)
//!   3. score alignment quality; below threshold everything is skipped
//!   4. rewrite ASR word text with reference text, keeping ASR timing
//!   5. remove compound-word fragments left behind by the rewrite
//!   6. extract reference line-break positions
//!
//! Splitting then cuts the flat word stream at those breaks (or falls back to
//! timing-gap heuristics) to produce singable lines.

mod compound;
mod health;
mod matcher;
mod rewrite;
mod similarity;
mod split;

pub use health::{check_asr_health, AsrHealth};
pub use matcher::{align, AlignedPair, GOOD_SIM, MIN_QUALITY};
pub use similarity::{normalize_word, ratio, word_similarity};
pub use split::{flatten_timed, split_karaoke};

use crate::models::{RawLyrics, RefStats};

/// One reference token: normalized form, raw text, owning line index.
#[derive(Debug, Clone)]
pub(crate) struct RefToken {
    pub normalized: String,
    pub raw: String,
    pub line: usize,
}

/// Result of the correction pass.
#[derive(Debug, Clone)]
pub struct Correction {
    /// Flat ASR word indices where a new reference line starts.
    pub line_breaks: Vec<usize>,
    pub stats: RefStats,
}

fn skipped_stats(total_words: usize, reason: &str) -> RefStats {
    RefStats {
        quality: 0.0,
        total_words,
        applied: false,
        reason: Some(reason.to_string()),
    }
}

/// Tokenize reference lines into whitespace-split tokens.
fn tokenize_reference(lines: &[String]) -> Vec<RefToken> {
    let mut tokens = Vec::new();
    for (line_idx, line) in lines.iter().enumerate() {
        for word in line.split_whitespace() {
            tokens.push(RefToken {
                normalized: normalize_word(word),
                raw: word.to_string(),
                line: line_idx,
            });
        }
    }
    tokens
}

/// Flatten non-empty ASR words keeping a (segment, word) index map.
fn flatten_for_alignment(raw: &RawLyrics) -> (Vec<(usize, usize)>, Vec<String>) {
    let mut index_map = Vec::new();
    let mut normalized = Vec::new();
    for (seg_idx, seg) in raw.segments.iter().enumerate() {
        for (word_idx, w) in seg.words.iter().enumerate() {
            if !w.word.trim().is_empty() {
                index_map.push((seg_idx, word_idx));
                normalized.push(normalize_word(&w.word));
            }
        }
    }
    (index_map, normalized)
}

/// Extract ASR word indices where a new reference line begins.
///
/// Only well-matched pairs participate; empty when quality is below the
/// application threshold.
fn extract_line_breaks(
    alignment: &[AlignedPair],
    ref_tokens: &[RefToken],
    quality: f64,
) -> Vec<usize> {
    if quality < MIN_QUALITY {
        return Vec::new();
    }

    let mut asr_to_line: std::collections::BTreeMap<usize, usize> = std::collections::BTreeMap::new();
    for pair in alignment {
        if let (Some(asr_idx), Some(ref_idx)) = (pair.asr, pair.reference) {
            if pair.sim >= GOOD_SIM {
                asr_to_line.insert(asr_idx, ref_tokens[ref_idx].line);
            }
        }
    }

    let mut line_breaks = Vec::new();
    let mut prev_line: Option<usize> = None;
    for (&asr_idx, &line) in &asr_to_line {
        if let Some(prev) = prev_line {
            if line != prev {
                line_breaks.push(asr_idx);
            }
        }
        prev_line = Some(line);
    }
    line_breaks
}

/// Correct an ASR transcript against reference lyric lines, in place.
///
/// Rewrites word text (timing, speakers and scores untouched), removes
/// compound fragments and returns line-break positions plus stats. When the
/// alignment quality is below 0.4 the transcript is returned unmodified with
/// `applied = false`.
pub fn correct_with_reference(raw: &mut RawLyrics, ref_lines: &[String]) -> Correction {
    if ref_lines.is_empty() {
        return Correction {
            line_breaks: Vec::new(),
            stats: skipped_stats(0, "no_ref_lines"),
        };
    }

    let (index_map, asr_normalized) = flatten_for_alignment(raw);
    if index_map.is_empty() {
        return Correction {
            line_breaks: Vec::new(),
            stats: skipped_stats(0, "no_asr_words"),
        };
    }

    let ref_tokens = tokenize_reference(ref_lines);
    if ref_tokens.is_empty() {
        return Correction {
            line_breaks: Vec::new(),
            stats: skipped_stats(index_map.len(), "no_reference_tokens"),
        };
    }

    let ref_normalized: Vec<String> = ref_tokens.iter().map(|t| t.normalized.clone()).collect();
    let (alignment, quality) = align(&asr_normalized, &ref_normalized);

    rewrite::rewrite_with_reference(raw, &index_map, &alignment, &ref_tokens, quality);

    let removed = if quality >= MIN_QUALITY {
        compound::remove_compound_fragments(raw, &index_map, &asr_normalized, &alignment, &ref_tokens)
    } else {
        Default::default()
    };

    let line_breaks = extract_line_breaks(&alignment, &ref_tokens, quality);
    let line_breaks = compound::adjust_line_breaks(&line_breaks, &removed);

    let applied = quality >= MIN_QUALITY;
    let stats = RefStats {
        quality: (quality * 10000.0).round() / 10000.0,
        total_words: index_map.len(),
        applied,
        reason: if applied { None } else { Some("low_quality".to_string()) },
    };

    Correction { line_breaks, stats }
}

/// Concatenate all non-empty ASR words into a plain-text string (used as a
/// prompt for the generative lyrics fallback).
pub fn flatten_text(raw: &RawLyrics) -> String {
    raw.segments
        .iter()
        .flat_map(|s| s.words.iter())
        .map(|w| w.word.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawSegment, RawWord};

    fn raw_words(words: Vec<(&str, f64, f64, &str)>) -> RawLyrics {
        RawLyrics {
            segments: vec![RawSegment {
                start: words.first().map(|w| w.1),
                end: words.last().map(|w| w.2),
                speaker: Some("SPEAKER_00".to_string()),
                text: None,
                words: words
                    .into_iter()
                    .map(|(t, s, e, sp)| RawWord {
                        word: t.to_string(),
                        start: Some(s),
                        end: Some(e),
                        score: None,
                        speaker: Some(sp.to_string()),
                    })
                    .collect(),
            }],
        }
    }

    fn lines(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    /// Misheard words rewritten, one break extracted, two lines produced.
    #[test]
    fn test_scenario_hello_goodbye() {
        let mut raw = raw_words(vec![
            ("Helo", 0.0, 0.3, "SPEAKER_00"),
            ("wurld", 0.3, 0.7, "SPEAKER_00"),
            ("Goodby", 1.0, 1.4, "SPEAKER_00"),
            ("world", 1.4, 1.7, "SPEAKER_00"),
        ]);
        let reference = lines(&["Hello world", "Goodbye world"]);

        let correction = correct_with_reference(&mut raw, &reference);

        assert!(correction.stats.applied);
        assert_eq!(correction.line_breaks, vec![2]);

        let words: Vec<&str> = raw.segments[0].words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["Hello", "world", "Goodbye", "world"]);

        // Timing untouched by the rewrite
        assert_eq!(raw.segments[0].words[0].start, Some(0.0));
        assert_eq!(raw.segments[0].words[0].end, Some(0.3));

        let doc = split_karaoke(&raw, &correction.line_breaks, Some(correction.stats));
        assert_eq!(doc.segments.len(), 2);
        assert_eq!(doc.segments[0].start, 0.0);
        assert_eq!(doc.segments[0].end, 0.7);
        assert_eq!(doc.segments[1].start, 1.0);
        assert_eq!(doc.segments[1].end, 1.7);
        assert_eq!(doc.lyrics_source, "reference");
    }

    /// Compound fragments removed; quality lands exactly on the 0.4
    /// threshold and corrections still apply.
    #[test]
    fn test_scenario_compound_fragments() {
        let mut raw = raw_words(vec![
            ("Kleid", 0.0, 0.3, "SPEAKER_00"),
            ("Schicht", 0.3, 0.6, "SPEAKER_00"),
            ("Brille", 0.6, 0.9, "SPEAKER_00"),
            ("ist", 0.9, 1.1, "SPEAKER_00"),
            ("teuer", 1.1, 1.5, "SPEAKER_00"),
        ]);
        let reference = lines(&["Gleitsichtbrille ist teuer"]);

        let correction = correct_with_reference(&mut raw, &reference);

        assert!(correction.stats.applied);
        assert!((correction.stats.quality - 0.4).abs() < 1e-9);

        let words: Vec<&str> = raw.segments[0].words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["Brille", "ist", "teuer"]);

        let doc = split_karaoke(&raw, &correction.line_breaks, Some(correction.stats));
        assert_eq!(doc.segments.len(), 1);
        assert_eq!(doc.segments[0].words.len(), 3);
    }

    /// Garbage transcript: correction skipped, heuristic split, one line.
    #[test]
    fn test_scenario_zero_quality_skipped() {
        let mut raw = raw_words(vec![
            ("xxx", 0.0, 0.2, "SPEAKER_00"),
            ("yyy", 0.2, 0.4, "SPEAKER_00"),
            ("zzz", 0.4, 0.6, "SPEAKER_00"),
            ("qqq", 0.6, 0.8, "SPEAKER_00"),
            ("rrr", 0.8, 1.0, "SPEAKER_00"),
        ]);
        let reference = lines(&["Foo"]);

        let correction = correct_with_reference(&mut raw, &reference);

        assert!(!correction.stats.applied);
        assert_eq!(correction.stats.reason.as_deref(), Some("low_quality"));
        assert!(correction.line_breaks.is_empty());

        // Transcript untouched
        assert_eq!(raw.segments[0].words[0].word, "xxx");

        let doc = split_karaoke(&raw, &correction.line_breaks, Some(correction.stats.clone()));
        assert_eq!(doc.segments.len(), 1);
        assert_eq!(doc.lyrics_source, "heuristic");
        assert_eq!(doc.ref_stats.unwrap().applied, false);
    }

    /// Same input, same output. The engine holds no state.
    #[test]
    fn test_correction_is_pure() {
        let build = || {
            raw_words(vec![
                ("Helo", 0.0, 0.3, "SPEAKER_00"),
                ("wurld", 0.3, 0.7, "SPEAKER_00"),
            ])
        };
        let reference = lines(&["Hello world"]);

        let mut a = build();
        let mut b = build();
        let ca = correct_with_reference(&mut a, &reference);
        let cb = correct_with_reference(&mut b, &reference);

        assert_eq!(ca.line_breaks, cb.line_breaks);
        assert_eq!(ca.stats, cb.stats);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_empty_reference_is_skipped() {
        let mut raw = raw_words(vec![("hello", 0.0, 0.3, "SPEAKER_00")]);
        let correction = correct_with_reference(&mut raw, &[]);
        assert!(!correction.stats.applied);
        assert_eq!(correction.stats.reason.as_deref(), Some("no_ref_lines"));
    }

    #[test]
    fn test_empty_transcript_is_skipped() {
        let mut raw = RawLyrics::default();
        let correction = correct_with_reference(&mut raw, &lines(&["Hello"]));
        assert!(!correction.stats.applied);
        assert_eq!(correction.stats.reason.as_deref(), Some("no_asr_words"));
    }

    #[test]
    fn test_repeated_lines_produce_breaks_per_repeat() {
        let mut raw = raw_words(vec![
            ("la", 0.0, 0.2, "SPEAKER_00"),
            ("la", 0.4, 0.6, "SPEAKER_00"),
        ]);
        // Repeated single-word lines: the second "la" starts line 1.
        let reference = lines(&["la", "la"]);
        let correction = correct_with_reference(&mut raw, &reference);
        assert_eq!(correction.line_breaks, vec![1]);
    }

    #[test]
    fn test_flatten_text() {
        let raw = raw_words(vec![
            (" Hello", 0.0, 0.3, "SPEAKER_00"),
            ("world ", 0.3, 0.7, "SPEAKER_00"),
        ]);
        assert_eq!(flatten_text(&raw), "Hello world");
    }
}
