//! Word normalization and fuzzy string similarity
//!
//! The similarity measure is the Ratcliff–Obershelp ratio (recursive longest
//! matching block, `2*M / (len(a)+len(b))`). The alignment thresholds used
//! throughout this module tree (0.6 good match, 0.55 compound acceptance,
//! 0.30 transcript sanity) are calibrated against this exact measure;
//! Levenshtein-family metrics score systematically lower on partial-overlap
//! pairs and would shift every cutoff.

use std::collections::HashMap;

/// Lowercase and strip ASCII punctuation for fuzzy matching.
pub fn normalize_word(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect()
}

/// Similarity between two normalized words. 0.0 = no match, 1.0 = exact.
pub fn word_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    ratio(a, b)
}

/// Ratcliff–Obershelp similarity of two strings.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = match_count(&a, &b, 0, a.len(), 0, b.len());
    2.0 * matches as f64 / total as f64
}

/// Total matched characters over the recursive longest-match decomposition.
fn match_count(a: &[char], b: &[char], alo: usize, ahi: usize, blo: usize, bhi: usize) -> usize {
    let (besti, bestj, size) = find_longest_match(a, b, alo, ahi, blo, bhi);
    if size == 0 {
        return 0;
    }
    size + match_count(a, b, alo, besti, blo, bestj)
        + match_count(a, b, besti + size, ahi, bestj + size, bhi)
}

/// Longest matching block in `a[alo..ahi]` x `b[blo..bhi]`, earliest on ties.
fn find_longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut besti = alo;
    let mut bestj = blo;
    let mut best_size = 0usize;

    // j2len[j] = length of the match ending at (i-1, j-1)
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for i in alo..ahi {
        let mut new_j2len: HashMap<usize, usize> = HashMap::new();
        for j in blo..bhi {
            if b[j] != a[i] {
                continue;
            }
            let k = if j > blo {
                j2len.get(&(j - 1)).copied().unwrap_or(0) + 1
            } else {
                1
            };
            new_j2len.insert(j, k);
            if k > best_size {
                besti = i + 1 - k;
                bestj = j + 1 - k;
                best_size = k;
            }
        }
        j2len = new_j2len;
    }

    (besti, bestj, best_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_word() {
        assert_eq!(normalize_word("  Hello,  "), "hello");
        assert_eq!(normalize_word("don't"), "dont");
        assert_eq!(normalize_word("---"), "");
        assert_eq!(normalize_word("WORLD!"), "world");
    }

    #[test]
    fn test_ratio_identical_and_disjoint() {
        assert_eq!(ratio("abc", "abc"), 1.0);
        assert_eq!(ratio("abc", "xyz"), 0.0);
        assert_eq!(ratio("", ""), 1.0);
    }

    #[test]
    fn test_ratio_known_values() {
        // 2 * 4 / (4 + 5)
        assert!((ratio("helo", "hello") - 8.0 / 9.0).abs() < 1e-9);
        // "w" + "rld" matched: 2 * 4 / 10
        assert!((ratio("wurld", "world") - 0.8).abs() < 1e-9);
        // "brille" suffix of "gleitsichtbrille": 2 * 6 / 22
        assert!((ratio("brille", "gleitsichtbrille") - 12.0 / 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_recursive_blocks() {
        // Matches accumulate across the recursion, not just the single
        // longest block.
        let r = ratio("kleidschichtbrille", "gleitsichtbrille");
        assert!((r - 28.0 / 34.0).abs() < 1e-9);
    }

    #[test]
    fn test_word_similarity_rules() {
        assert_eq!(word_similarity("same", "same"), 1.0);
        assert_eq!(word_similarity("", "x"), 0.0);
        assert_eq!(word_similarity("x", ""), 0.0);
        assert!(word_similarity("goodby", "goodbye") > 0.9);
    }
}
