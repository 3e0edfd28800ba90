//! Karaoke line splitting
//!
//! Two modes over the same primitives: reference-guided (cut at reference
//! line boundaries) and heuristic (cut at timing gaps). Both split at
//! speaker changes and merge stray one-word lines back into a neighbor.

use crate::models::{
    LyricLine, LyricsDoc, RawLyrics, RawSegment, RefStats, TimedWord, DEFAULT_SPEAKER,
};
use std::collections::HashSet;

/// Maximum words per line when reference boundaries drive the split. Lines
/// longer than this get a safety-net split at timing gaps.
const MAX_WORDS_REFERENCE: usize = 20;
/// Maximum words per line for the heuristic fallback.
const MAX_WORDS_HEURISTIC: usize = 8;
/// Lines with fewer words than this are merged into a neighbor.
const MIN_WORDS: usize = 2;
/// Maximum silence between lines eligible for a tiny-line merge.
const MAX_MERGE_GAP: f64 = 0.5;

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Split timed words into karaoke lines.
///
/// With non-empty `line_breaks` (flat word indices starting new reference
/// lines) the reference-guided mode runs; otherwise the heuristic fallback.
/// `ref_stats` is attached to the output verbatim when present.
pub fn split_karaoke(raw: &RawLyrics, line_breaks: &[usize], ref_stats: Option<RefStats>) -> LyricsDoc {
    let avg_confidence = average_confidence(raw);

    if raw.segments.is_empty() {
        return LyricsDoc {
            segments: Vec::new(),
            untimed: None,
            plain_lyrics: None,
            lyrics_source: "heuristic".to_string(),
            avg_confidence,
            ref_stats,
        };
    }

    if !line_breaks.is_empty() {
        let flat = flatten_timed(raw);
        if !flat.is_empty() {
            let lines = split_at_breaks(flat, line_breaks);
            let lines = split_at_speaker_changes(lines);
            let lines = enforce_max_words(lines, MAX_WORDS_REFERENCE);
            let lines = merge_tiny_lines(lines, MIN_WORDS, MAX_MERGE_GAP);
            return LyricsDoc {
                segments: lines,
                untimed: None,
                plain_lyrics: None,
                lyrics_source: "reference".to_string(),
                avg_confidence,
                ref_stats,
            };
        }
    }

    // Heuristic fallback
    let merged = merge_segments(raw);
    let lines = split_at_speaker_changes(merged);
    let lines = enforce_max_words(lines, MAX_WORDS_HEURISTIC);
    let lines = merge_tiny_lines(lines, MIN_WORDS, MAX_MERGE_GAP);

    LyricsDoc {
        segments: lines,
        untimed: None,
        plain_lyrics: None,
        lyrics_source: "heuristic".to_string(),
        avg_confidence,
        ref_stats,
    }
}

/// Mean word score across the raw transcript, rounded to 4 decimals.
fn average_confidence(raw: &RawLyrics) -> Option<f64> {
    let scores: Vec<f64> = raw
        .segments
        .iter()
        .flat_map(|s| s.words.iter())
        .filter_map(|w| w.score)
        .collect();
    if scores.is_empty() {
        return None;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    Some((mean * 10000.0).round() / 10000.0)
}

fn timed_word(seg: &RawSegment, w: &crate::models::RawWord) -> Option<TimedWord> {
    let text = w.word.trim();
    if text.is_empty() {
        return None;
    }
    let start = w.start.or(seg.start).unwrap_or(0.0);
    let end = w.end.or(seg.end).unwrap_or(start + 0.1);
    let speaker = w
        .speaker
        .clone()
        .or_else(|| seg.speaker.clone())
        .unwrap_or_else(|| DEFAULT_SPEAKER.to_string());
    Some(TimedWord {
        word: text.to_string(),
        start: round3(start),
        end: round3(end),
        speaker,
        score: w.score,
    })
}

/// All words across all segments, in order, with inherited timing/speakers.
pub fn flatten_timed(raw: &RawLyrics) -> Vec<TimedWord> {
    raw.segments
        .iter()
        .flat_map(|seg| seg.words.iter().filter_map(move |w| timed_word(seg, w)))
        .collect()
}

/// Merge each raw segment into one line, dropping empty words/segments.
fn merge_segments(raw: &RawLyrics) -> Vec<LyricLine> {
    raw.segments
        .iter()
        .filter_map(|seg| {
            let words: Vec<TimedWord> =
                seg.words.iter().filter_map(|w| timed_word(seg, w)).collect();
            if words.is_empty() {
                None
            } else {
                Some(make_line(words))
            }
        })
        .collect()
}

/// Build a line from a non-empty word list: inclusive bounds and the
/// majority speaker (first-seen wins ties).
fn make_line(words: Vec<TimedWord>) -> LyricLine {
    debug_assert!(!words.is_empty());
    let start = words.first().map(|w| w.start).unwrap_or(0.0);
    let end = words.last().map(|w| w.end).unwrap_or(start);
    let speaker = majority_speaker(&words);
    LyricLine {
        start,
        end,
        speaker,
        words,
    }
}

fn majority_speaker(words: &[TimedWord]) -> String {
    // Strictly-greater comparison keeps the first-seen speaker on ties.
    let mut best_speaker: Option<&str> = None;
    let mut best_count = 0usize;
    for w in words {
        let count = words.iter().filter(|o| o.speaker == w.speaker).count();
        if count > best_count {
            best_count = count;
            best_speaker = Some(&w.speaker);
        }
    }
    best_speaker.unwrap_or(DEFAULT_SPEAKER).to_string()
}

/// Cut the flat word list at every break index.
fn split_at_breaks(flat: Vec<TimedWord>, line_breaks: &[usize]) -> Vec<LyricLine> {
    let break_set: HashSet<usize> = line_breaks.iter().copied().collect();
    let mut lines = Vec::new();
    let mut current: Vec<TimedWord> = Vec::new();

    for (i, w) in flat.into_iter().enumerate() {
        if break_set.contains(&i) && !current.is_empty() {
            lines.push(make_line(std::mem::take(&mut current)));
        }
        current.push(w);
    }
    if !current.is_empty() {
        lines.push(make_line(current));
    }
    lines
}

/// Split every line at each mid-line speaker transition.
fn split_at_speaker_changes(lines: Vec<LyricLine>) -> Vec<LyricLine> {
    let mut result = Vec::new();
    for line in lines {
        if line.words.is_empty() {
            continue;
        }
        let mut group: Vec<TimedWord> = Vec::new();
        for w in line.words {
            if let Some(last) = group.last() {
                if last.speaker != w.speaker {
                    result.push(make_line(std::mem::take(&mut group)));
                }
            }
            group.push(w);
        }
        if !group.is_empty() {
            result.push(make_line(group));
        }
    }
    result
}

/// Recursively split word lists longer than `max_words` at the largest
/// timing gap in the middle third.
fn split_at_gaps(mut words: Vec<TimedWord>, max_words: usize) -> Vec<Vec<TimedWord>> {
    if words.len() <= max_words {
        return vec![words];
    }

    let third = (words.len() / 3).max(1);
    let search_start = third.max(1);
    let search_end = (2 * third).min(words.len() - 1);

    let mut best_split = words.len() / 2;
    let mut best_gap = -1.0f64;
    for j in search_start..search_end {
        let gap = words[j].start - words[j - 1].end;
        if gap > best_gap {
            best_gap = gap;
            best_split = j;
        }
    }

    let right = words.split_off(best_split);
    let mut out = split_at_gaps(words, max_words);
    out.extend(split_at_gaps(right, max_words));
    out
}

fn enforce_max_words(lines: Vec<LyricLine>, max_words: usize) -> Vec<LyricLine> {
    let mut out = Vec::new();
    for line in lines {
        if line.words.len() <= max_words {
            out.push(line);
        } else {
            for group in split_at_gaps(line.words, max_words) {
                if !group.is_empty() {
                    out.push(make_line(group));
                }
            }
        }
    }
    out
}

/// Merge lines with fewer than `min_words` into an adjacent same-speaker
/// line when the silence between them is under `max_gap`. Prefers the
/// previous line; iterates to a fixed point.
fn merge_tiny_lines(lines: Vec<LyricLine>, min_words: usize, max_gap: f64) -> Vec<LyricLine> {
    if lines.len() <= 1 {
        return lines;
    }

    let mut result = lines;
    let mut changed = true;
    while changed {
        changed = false;
        let mut merged: Vec<LyricLine> = Vec::new();
        let mut i = 0;
        while i < result.len() {
            let line = result[i].clone();

            if line.words.len() < min_words {
                let mut consumed = false;

                if let Some(prev) = merged.last() {
                    let gap = line.words[0].start - prev.words.last().map(|w| w.end).unwrap_or(0.0);
                    if gap < max_gap && prev.speaker == line.speaker {
                        let mut combined = merged.pop().unwrap().words;
                        combined.extend(line.words.clone());
                        merged.push(make_line(combined));
                        consumed = true;
                        changed = true;
                    }
                }

                if !consumed && i + 1 < result.len() {
                    let next = &result[i + 1];
                    let gap = next.words[0].start - line.words.last().map(|w| w.end).unwrap_or(0.0);
                    if gap < max_gap && next.speaker == line.speaker {
                        let mut combined = line.words.clone();
                        combined.extend(next.words.clone());
                        merged.push(make_line(combined));
                        i += 1; // consumed the next line as well
                        consumed = true;
                        changed = true;
                    }
                }

                if !consumed {
                    merged.push(line);
                }
            } else {
                merged.push(line);
            }
            i += 1;
        }
        result = merged;
    }

    result
}
