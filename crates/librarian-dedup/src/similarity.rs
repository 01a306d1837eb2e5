use std::cmp::Ordering;

use librarian_core::{LexicalMetric, Record};
use serde::Serialize;

/// Stored record whose lexical similarity to a candidate exceeded the fuzzy threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suspect {
    pub record: Record,
    pub score: f64,
}

/// Lexical similarity of two normalized titles in `[0, 1]`.
pub fn lexical_similarity(a: &str, b: &str, metric: LexicalMetric) -> f64 {
    match metric {
        LexicalMetric::RatcliffObershelp => ratcliff_obershelp(a, b),
        LexicalMetric::Levenshtein => strsim::normalized_levenshtein(a, b),
    }
}

/// Matching-blocks ratio `2*M / T`.
///
/// `M` is the total length of the blocks found by recursively taking the
/// longest common substring and matching the pieces to its left and right.
/// Inputs are put in a fixed order first, since tie-breaking between equally
/// long blocks otherwise makes the score depend on argument order.
pub fn ratcliff_obershelp(a: &str, b: &str) -> f64 {
    let (a, b) = if a <= b { (a, b) } else { (b, a) };
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let matched = matching_characters(&a, &b);
    (2 * matched) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }

    matched
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`.
///
/// Returns `(start_a, start_b, len)`; among equally long blocks the one
/// ending earliest in `a`, then in `b`, wins.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);

    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            if a[i] == b[j] {
                let k = prev[col - 1] + 1;
                curr[col] = k;
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            } else {
                curr[col] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    (best_i, best_j, best_size)
}

/// Cosine similarity of two embedding vectors.
///
/// Absent, empty, zero-norm or differently sized vectors score 0, and so
/// does any pair whose arithmetic overflows to a non-finite result.
pub fn cosine_similarity(a: Option<&[f32]>, b: Option<&[f32]>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if score.is_finite() { score } else { 0.0 }
}

/// Stored record with the highest cosine similarity to `embedding`.
///
/// Records without an embedding are ignored. The earliest record wins ties.
pub fn best_semantic_match<'a>(embedding: &[f32], records: &'a [Record]) -> Option<(&'a Record, f64)> {
    let mut best: Option<(&Record, f64)> = None;
    for record in records.iter().filter(|r| r.has_embedding()) {
        let score = cosine_similarity(Some(embedding), record.embedding.as_deref());
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((record, score));
        }
    }
    best
}

/// Top `limit` records by cosine similarity, descending.
pub fn rank_semantic(embedding: &[f32], records: &[Record], limit: usize) -> Vec<(Record, f64)> {
    let mut scored: Vec<(Record, f64)> = records
        .iter()
        .filter(|r| r.has_embedding())
        .map(|r| {
            let score = cosine_similarity(Some(embedding), r.embedding.as_deref());
            (r.clone(), score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Every stored record whose lexical ratio against `normalized_title` is
/// strictly above `threshold`, best first. Ties keep store order.
pub fn find_suspects(
    normalized_title: &str,
    records: &[Record],
    threshold: f64,
    metric: LexicalMetric,
) -> Vec<Suspect> {
    let mut suspects: Vec<Suspect> = records
        .iter()
        .filter_map(|record| {
            let score = lexical_similarity(normalized_title, &record.normalized_title, metric);
            (score > threshold).then(|| Suspect {
                record: record.clone(),
                score,
            })
        })
        .collect();
    suspects.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    suspects
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use librarian_core::Candidate;

    fn record(title: &str, embedding: Option<Vec<f32>>) -> Record {
        let mut candidate = Candidate::new(title, "tester");
        candidate.embedding = embedding;
        candidate.into_record(Utc::now())
    }

    #[test]
    fn ratio_matches_known_values() {
        assert!((ratcliff_obershelp("abcd", "bcde") - 0.75).abs() < 1e-12);
        assert!((ratcliff_obershelp("deeplearning", "introtodeeplearning") - 24.0 / 31.0).abs() < 1e-12);
        assert_eq!(ratcliff_obershelp("abc", "xyz"), 0.0);
    }

    #[test]
    fn ratio_is_reflexive_and_symmetric() {
        let titles = [
            "",
            "deeplearning",
            "introtodeeplearning",
            "attentionisallyouneed",
            "abab",
            "baba",
            "patternrecognitionandmachinelearning",
        ];
        for a in titles {
            assert_eq!(ratcliff_obershelp(a, a), 1.0, "reflexive for {a:?}");
            for b in titles {
                assert_eq!(ratcliff_obershelp(a, b), ratcliff_obershelp(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn ratio_handles_one_empty_side() {
        assert_eq!(ratcliff_obershelp("", "abc"), 0.0);
        assert_eq!(ratcliff_obershelp("", ""), 1.0);
    }

    #[test]
    fn levenshtein_metric_is_available() {
        let score = lexical_similarity("kitten", "sitting", LexicalMetric::Levenshtein);
        assert!(score > 0.5 && score < 0.6);
        assert_eq!(lexical_similarity("same", "same", LexicalMetric::Levenshtein), 1.0);
    }

    #[test]
    fn cosine_edge_cases() {
        let a: &[f32] = &[1.0, 0.0];
        let b: &[f32] = &[0.0, 1.0];
        let zero: &[f32] = &[0.0, 0.0];
        let longer: &[f32] = &[1.0, 0.0, 0.0];
        let opposite: &[f32] = &[-1.0, 0.0];
        assert!((cosine_similarity(Some(a), Some(a)) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(Some(a), Some(b)), 0.0);
        assert_eq!(cosine_similarity(None, Some(a)), 0.0);
        assert_eq!(cosine_similarity(Some(zero), Some(a)), 0.0);
        assert_eq!(cosine_similarity(Some(longer), Some(a)), 0.0);
        assert!((cosine_similarity(Some(a), Some(opposite)) + 1.0).abs() < 1e-9);

        let infinite: &[f32] = &[f32::INFINITY, 1.0];
        let nan: &[f32] = &[f32::NAN, 1.0];
        assert_eq!(cosine_similarity(Some(infinite), Some(a)), 0.0);
        assert_eq!(cosine_similarity(Some(infinite), Some(infinite)), 0.0);
        assert_eq!(cosine_similarity(Some(nan), Some(a)), 0.0);
    }

    #[test]
    fn best_semantic_match_skips_records_without_vectors() {
        let records = vec![
            record("No Vector", None),
            record("Far", Some(vec![0.0, 1.0])),
            record("Near", Some(vec![0.9, 0.1])),
        ];
        let (best, score) = best_semantic_match(&[1.0, 0.0], &records).unwrap();
        assert_eq!(best.title, "Near");
        assert!(score > 0.9);

        assert!(best_semantic_match(&[1.0, 0.0], &records[..1]).is_none());
    }

    #[test]
    fn rank_semantic_orders_and_truncates() {
        let records = vec![
            record("Far", Some(vec![0.0, 1.0])),
            record("Near", Some(vec![0.9, 0.1])),
            record("Middle", Some(vec![0.5, 0.5])),
        ];
        let ranked = rank_semantic(&[1.0, 0.0], &records, 2);
        let titles: Vec<&str> = ranked.iter().map(|(r, _)| r.title.as_str()).collect();
        assert_eq!(titles, ["Near", "Middle"]);
    }

    #[test]
    fn suspects_are_strictly_above_threshold_and_sorted() {
        let records = vec![
            record("Intro to Deep Learning", None),
            record("Deep Learnings", None),
            record("Cooking for Beginners", None),
        ];
        let suspects = find_suspects("deeplearning", &records, 0.6, LexicalMetric::RatcliffObershelp);
        let titles: Vec<&str> = suspects.iter().map(|s| s.record.title.as_str()).collect();
        assert_eq!(titles, ["Deep Learnings", "Intro to Deep Learning"]);

        // abcd / bcde scores exactly 0.75, which is not above 0.75
        let records = vec![record("bcde", None)];
        assert!(find_suspects("abcd", &records, 0.75, LexicalMetric::RatcliffObershelp).is_empty());
    }
}
