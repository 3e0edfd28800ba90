//! Compound-word fragment removal
//!
//! ASR models split long compound words ("Gleitsichtbrille" heard as "Kleid,
//! Schicht, Brille"). The alignment then matches the final fragment to the
//! long reference word and leaves the leading fragments as gaps. When the
//! concatenated gap run plus the matched root approximates the long word,
//! the fragments are deleted.

use super::matcher::AlignedPair;
use super::similarity::ratio;
use super::RefToken;
use crate::models::RawLyrics;
use std::collections::{BTreeMap, BTreeSet};

/// Minimum length of the compound candidate.
const MIN_TARGET_LEN: usize = 8;
/// The gap run must extend the root by at least this many characters.
const MIN_EXTENSION: usize = 3;
/// Acceptance threshold for concat ≈ target.
const MIN_RATIO: f64 = 0.55;

/// Detect and delete compound fragments in place.
///
/// Returns the flat indices of the removed words so previously computed
/// line-break positions can be shifted.
pub(crate) fn remove_compound_fragments(
    raw: &mut RawLyrics,
    index_map: &[(usize, usize)],
    asr_normalized: &[String],
    alignment: &[AlignedPair],
    ref_tokens: &[RefToken],
) -> BTreeSet<usize> {
    let mut gap_indices: BTreeSet<usize> = BTreeSet::new();
    let mut match_map: BTreeMap<usize, usize> = BTreeMap::new();
    for pair in alignment {
        match (pair.asr, pair.reference) {
            (Some(a), None) => {
                gap_indices.insert(a);
            }
            (Some(a), Some(r)) => {
                match_map.insert(a, r);
            }
            _ => {}
        }
    }

    let mut to_remove: BTreeSet<usize> = BTreeSet::new();

    for (&asr_idx, &ref_idx) in &match_map {
        let ref_norm = &ref_tokens[ref_idx].normalized;
        let matched_norm = &asr_normalized[asr_idx];

        // The longer side is the compound candidate; ties favor the
        // reference so a re-run over already-corrected text behaves the same.
        let ref_len = ref_norm.chars().count();
        let matched_len = matched_norm.chars().count();
        let (target, root) = if matched_len > ref_len {
            (matched_norm.as_str(), ref_norm.as_str())
        } else if ref_len > matched_len {
            (ref_norm.as_str(), matched_norm.as_str())
        } else {
            (ref_norm.as_str(), ref_norm.as_str())
        };
        if target.chars().count() < MIN_TARGET_LEN {
            continue;
        }

        // Consecutive gap words immediately before the matched word.
        let mut before: Vec<usize> = Vec::new();
        let mut i = asr_idx;
        while i > 0 && gap_indices.contains(&(i - 1)) {
            before.insert(0, i - 1);
            i -= 1;
        }
        if before.is_empty() {
            continue;
        }

        let gap_concat: String = before.iter().map(|&idx| asr_normalized[idx].as_str()).collect();
        let concat = format!("{}{}", gap_concat, root);
        if concat.chars().count() < root.chars().count() + MIN_EXTENSION {
            continue;
        }

        if ratio(&concat, target) >= MIN_RATIO {
            to_remove.extend(before);
        }
    }

    if to_remove.is_empty() {
        return to_remove;
    }

    // Delete per segment in reverse word order so earlier indices stay valid.
    let mut by_segment: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &flat_idx in &to_remove {
        let (seg_idx, word_idx) = index_map[flat_idx];
        by_segment.entry(seg_idx).or_default().push(word_idx);
    }

    for (seg_idx, mut word_indices) in by_segment {
        word_indices.sort_unstable_by(|a, b| b.cmp(a));
        let seg = &mut raw.segments[seg_idx];
        for word_idx in word_indices {
            seg.words.remove(word_idx);
        }
        if seg.text.is_some() {
            seg.text = Some(
                seg.words
                    .iter()
                    .map(|w| w.word.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }
    }

    raw.segments.retain(|s| !s.words.is_empty());

    tracing::debug!(removed = to_remove.len(), "compound fragment words removed");
    to_remove
}

/// Shift line-break indices to account for removed word positions.
pub(crate) fn adjust_line_breaks(line_breaks: &[usize], removed: &BTreeSet<usize>) -> Vec<usize> {
    if removed.is_empty() {
        return line_breaks.to_vec();
    }
    line_breaks
        .iter()
        .filter(|lb| !removed.contains(lb))
        .map(|&lb| lb - removed.iter().filter(|&&r| r < lb).count())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::similarity::normalize_word;
    use crate::models::{RawSegment, RawWord};

    fn raw_with_words(words: &[&str]) -> (RawLyrics, Vec<(usize, usize)>, Vec<String>) {
        let raw = RawLyrics {
            segments: vec![RawSegment {
                text: Some(words.join(" ")),
                words: words
                    .iter()
                    .map(|w| RawWord {
                        word: w.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
        };
        let index_map: Vec<(usize, usize)> = (0..words.len()).map(|i| (0, i)).collect();
        let normalized: Vec<String> = words.iter().map(|w| normalize_word(w)).collect();
        (raw, index_map, normalized)
    }

    fn token(raw: &str, line: usize) -> RefToken {
        RefToken {
            normalized: normalize_word(raw),
            raw: raw.to_string(),
            line,
        }
    }

    #[test]
    fn test_compound_fragments_removed() {
        let (mut raw, index_map, normalized) =
            raw_with_words(&["Kleid", "Schicht", "Brille", "ist", "teuer"]);
        let ref_tokens = vec![
            token("Gleitsichtbrille", 0),
            token("ist", 0),
            token("teuer", 0),
        ];
        let alignment = vec![
            AlignedPair { asr: Some(0), reference: None, sim: 0.0 },
            AlignedPair { asr: Some(1), reference: None, sim: 0.0 },
            AlignedPair { asr: Some(2), reference: Some(0), sim: 0.545 },
            AlignedPair { asr: Some(3), reference: Some(1), sim: 1.0 },
            AlignedPair { asr: Some(4), reference: Some(2), sim: 1.0 },
        ];

        let removed =
            remove_compound_fragments(&mut raw, &index_map, &normalized, &alignment, &ref_tokens);

        assert_eq!(removed.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
        let words: Vec<&str> = raw.segments[0].words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["Brille", "ist", "teuer"]);
        assert_eq!(raw.segments[0].text.as_deref(), Some("Brille ist teuer"));
    }

    #[test]
    fn test_short_targets_ignored() {
        let (mut raw, index_map, normalized) = raw_with_words(&["a", "b", "cat"]);
        let ref_tokens = vec![token("cat", 0)];
        let alignment = vec![
            AlignedPair { asr: Some(0), reference: None, sim: 0.0 },
            AlignedPair { asr: Some(1), reference: None, sim: 0.0 },
            AlignedPair { asr: Some(2), reference: Some(0), sim: 1.0 },
        ];

        let removed =
            remove_compound_fragments(&mut raw, &index_map, &normalized, &alignment, &ref_tokens);
        assert!(removed.is_empty());
        assert_eq!(raw.segments[0].words.len(), 3);
    }

    #[test]
    fn test_dissimilar_gap_run_kept() {
        let (mut raw, index_map, normalized) =
            raw_with_words(&["banana", "orange", "waterfall"]);
        let ref_tokens = vec![token("waterfalls", 0)];
        let alignment = vec![
            AlignedPair { asr: Some(0), reference: None, sim: 0.0 },
            AlignedPair { asr: Some(1), reference: None, sim: 0.0 },
            AlignedPair { asr: Some(2), reference: Some(0), sim: 0.95 },
        ];

        let removed =
            remove_compound_fragments(&mut raw, &index_map, &normalized, &alignment, &ref_tokens);
        assert!(removed.is_empty());
    }

    #[test]
    fn test_empty_segments_dropped_after_removal() {
        // Fragments occupy a whole segment of their own.
        let mut raw = RawLyrics {
            segments: vec![
                RawSegment {
                    words: vec![
                        RawWord { word: "Kleid".into(), ..Default::default() },
                        RawWord { word: "Schicht".into(), ..Default::default() },
                    ],
                    ..Default::default()
                },
                RawSegment {
                    words: vec![RawWord { word: "Brille".into(), ..Default::default() }],
                    ..Default::default()
                },
            ],
        };
        let index_map = vec![(0, 0), (0, 1), (1, 0)];
        let normalized = vec!["kleid".to_string(), "schicht".to_string(), "brille".to_string()];
        let ref_tokens = vec![token("Gleitsichtbrille", 0)];
        let alignment = vec![
            AlignedPair { asr: Some(0), reference: None, sim: 0.0 },
            AlignedPair { asr: Some(1), reference: None, sim: 0.0 },
            AlignedPair { asr: Some(2), reference: Some(0), sim: 0.545 },
        ];

        remove_compound_fragments(&mut raw, &index_map, &normalized, &alignment, &ref_tokens);
        assert_eq!(raw.segments.len(), 1);
        assert_eq!(raw.segments[0].words[0].word, "Brille");
    }

    #[test]
    fn test_adjust_line_breaks() {
        let removed: BTreeSet<usize> = [0, 1].into_iter().collect();
        assert_eq!(adjust_line_breaks(&[2, 5], &removed), vec![0, 3]);
        // A break that points at a removed word disappears.
        let removed: BTreeSet<usize> = [5].into_iter().collect();
        assert_eq!(adjust_line_breaks(&[2, 5, 8], &removed), vec![2, 7]);
        // No removals: unchanged.
        assert_eq!(adjust_line_breaks(&[3], &BTreeSet::new()), vec![3]);
    }
}
