//! Needleman–Wunsch global alignment of ASR words against reference tokens

use super::similarity::word_similarity;

/// Minimum similarity for a pair to count as a good match.
pub const GOOD_SIM: f64 = 0.6;
/// Minimum global quality for corrections to be applied at all.
pub const MIN_QUALITY: f64 = 0.4;

const MATCH_BONUS: f64 = 2.0;
const MISMATCH_PENALTY: f64 = -1.0;
const GAP_PENALTY: f64 = -0.5;

/// One cell of the traceback: an ASR index, a reference index, or both.
/// `None` on either side is a gap (insertion/deletion).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedPair {
    pub asr: Option<usize>,
    pub reference: Option<usize>,
    pub sim: f64,
}

impl AlignedPair {
    pub fn is_match(&self) -> bool {
        self.asr.is_some() && self.reference.is_some()
    }

    pub fn is_good(&self) -> bool {
        self.is_match() && self.sim >= GOOD_SIM
    }
}

/// Globally align two normalized token sequences.
///
/// Returns the full alignment (covering every index on both sides) and the
/// quality score: good pairs over `max(n, m)`. Ties during traceback break in
/// the order diagonal, up (ASR gap against reference), left.
pub fn align(asr: &[String], reference: &[String]) -> (Vec<AlignedPair>, f64) {
    let n = asr.len();
    let m = reference.len();
    if n == 0 || m == 0 {
        return (Vec::new(), 0.0);
    }

    // Pairwise similarity, computed once and reused by the traceback so the
    // equality tests below compare identical floats.
    let mut sim = vec![vec![0.0f64; m]; n];
    for i in 0..n {
        for j in 0..m {
            sim[i][j] = word_similarity(&asr[i], &reference[j]);
        }
    }

    let match_score = |s: f64| {
        if s >= GOOD_SIM {
            MATCH_BONUS * s
        } else {
            MISMATCH_PENALTY
        }
    };

    let mut dp = vec![vec![0.0f64; m + 1]; n + 1];
    for i in 1..=n {
        dp[i][0] = dp[i - 1][0] + GAP_PENALTY;
    }
    for j in 1..=m {
        dp[0][j] = dp[0][j - 1] + GAP_PENALTY;
    }
    for i in 1..=n {
        for j in 1..=m {
            let diag = dp[i - 1][j - 1] + match_score(sim[i - 1][j - 1]);
            let up = dp[i - 1][j] + GAP_PENALTY;
            let left = dp[i][j - 1] + GAP_PENALTY;
            dp[i][j] = diag.max(up).max(left);
        }
    }

    let mut alignment = Vec::with_capacity(n + m);
    let mut i = n;
    let mut j = m;
    while i > 0 || j > 0 {
        if i > 0 && j > 0 {
            let s = sim[i - 1][j - 1];
            if dp[i][j] == dp[i - 1][j - 1] + match_score(s) {
                alignment.push(AlignedPair {
                    asr: Some(i - 1),
                    reference: Some(j - 1),
                    sim: s,
                });
                i -= 1;
                j -= 1;
                continue;
            }
        }
        if i > 0 && dp[i][j] == dp[i - 1][j] + GAP_PENALTY {
            alignment.push(AlignedPair {
                asr: Some(i - 1),
                reference: None,
                sim: 0.0,
            });
            i -= 1;
        } else {
            alignment.push(AlignedPair {
                asr: None,
                reference: Some(j - 1),
                sim: 0.0,
            });
            j -= 1;
        }
    }
    alignment.reverse();

    let matched = alignment.iter().filter(|p| p.is_match()).count();
    if matched == 0 {
        return (alignment, 0.0);
    }
    let good = alignment.iter().filter(|p| p.is_good()).count();
    let quality = good as f64 / n.max(m) as f64;

    (alignment, quality)
}
