//! Reference-text rewrite policy
//!
//! Rewrites ASR word text with the reference token it aligned to, keeping all
//! timing, speaker and confidence data untouched. Low-similarity pairs are
//! only rewritten when the surrounding alignment context vouches for them.

use super::matcher::{AlignedPair, GOOD_SIM, MIN_QUALITY};
use super::RefToken;
use crate::models::RawLyrics;

const CONTEXT_WINDOW: isize = 3;
const CONTEXT_MIN_QUALITY: f64 = 0.55;
const CONTEXT_MIN_RATIO: f64 = 0.6;

/// Apply the rewrite policy in place. Returns the number of words changed.
///
/// Bails out entirely (no mutation) when global quality is below the
/// application threshold.
pub(crate) fn rewrite_with_reference(
    raw: &mut RawLyrics,
    index_map: &[(usize, usize)],
    alignment: &[AlignedPair],
    ref_tokens: &[RefToken],
    quality: f64,
) -> usize {
    if quality < MIN_QUALITY {
        tracing::debug!(
            quality,
            "reference correction skipped: alignment quality below {}",
            MIN_QUALITY
        );
        return 0;
    }

    let mut corrections = 0;
    let mut context_corrections = 0;

    for (align_idx, pair) in alignment.iter().enumerate() {
        let (Some(asr_idx), Some(ref_idx)) = (pair.asr, pair.reference) else {
            continue; // gap, nothing to rewrite
        };

        if pair.sim < GOOD_SIM {
            if !context_supports_rewrite(alignment, align_idx, quality) {
                continue;
            }
            context_corrections += 1;
        }

        let (seg_idx, word_idx) = index_map[asr_idx];
        let original = raw.segments[seg_idx].words[word_idx].word.clone();
        let reference_text = &ref_tokens[ref_idx].raw;

        // Transfer trailing punctuation from the ASR word unless the
        // reference token carries its own.
        let (_, asr_trailing) = split_trailing_punct(&original);
        let (ref_stripped, ref_trailing) = split_trailing_punct(reference_text);
        let mut corrected = if !ref_trailing.is_empty() {
            reference_text.clone()
        } else if !asr_trailing.is_empty() {
            format!("{}{}", ref_stripped, asr_trailing)
        } else {
            ref_stripped.to_string()
        };

        corrected = match_line_initial_casing(corrected, &original);

        if original != corrected {
            raw.segments[seg_idx].words[word_idx].word = corrected;
            corrections += 1;
        }
    }

    tracing::debug!(
        corrections,
        context_corrections,
        quality,
        total = index_map.len(),
        "reference correction applied"
    );

    // Keep segment-level text consistent with the rewritten words.
    for seg in &mut raw.segments {
        if seg.text.is_some() && !seg.words.is_empty() {
            seg.text = Some(
                seg.words
                    .iter()
                    .map(|w| w.word.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }
    }

    corrections
}

/// Whether the ±window neighborhood of an alignment cell matches well enough
/// to trust a textually-dissimilar rewrite.
fn context_supports_rewrite(alignment: &[AlignedPair], align_idx: usize, quality: f64) -> bool {
    if quality < CONTEXT_MIN_QUALITY {
        return false;
    }

    let mut good = 0usize;
    let mut total = 0usize;
    for offset in -CONTEXT_WINDOW..=CONTEXT_WINDOW {
        if offset == 0 {
            continue;
        }
        let idx = align_idx as isize + offset;
        if idx < 0 || idx as usize >= alignment.len() {
            continue;
        }
        let pair = &alignment[idx as usize];
        if pair.is_match() {
            total += 1;
            if pair.sim >= GOOD_SIM {
                good += 1;
            }
        }
    }

    total >= 2 && good as f64 / total as f64 >= CONTEXT_MIN_RATIO
}

/// Split a word into (body, trailing ASCII punctuation).
fn split_trailing_punct(s: &str) -> (&str, &str) {
    let mut cut = s.len();
    for (i, c) in s.char_indices().rev() {
        if c.is_ascii_punctuation() {
            cut = i;
        } else {
            break;
        }
    }
    s.split_at(cut)
}

/// Reference tokens at line-initial positions are often title-cased where the
/// sung word is not a true capitalization. When the ASR heard a lowercase
/// word, downcase the rewrite's first letter, unless the token looks like an
/// acronym (second character also uppercase).
fn match_line_initial_casing(corrected: String, original: &str) -> String {
    let mut chars = corrected.chars();
    let Some(first) = chars.next() else {
        return corrected;
    };
    let second_upper = chars.next().map(|c| c.is_uppercase()).unwrap_or(false);
    let original_lower = original
        .chars()
        .next()
        .map(|c| c.is_lowercase())
        .unwrap_or(false);

    if first.is_uppercase() && original_lower && !second_upper {
        let tail: String = corrected.chars().skip(1).collect();
        let mut rebuilt: String = first.to_lowercase().collect();
        rebuilt.push_str(&tail);
        rebuilt
    } else {
        corrected
    }
}
