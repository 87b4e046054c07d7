//! Hybrid relevance scoring.
//!
//! Keyword (FTS5 BM25) and vector (cosine) candidates live on different
//! scales, so each channel is min-max normalised to `[0, 1]` before they
//! are blended:
//!
//! ```text
//! hybrid = (1 - alpha) * keyword + alpha * vector
//! ```
//!
//! A record missing from one channel scores 0 there. Ties are broken by
//! record id so that results are deterministic.

use std::collections::HashMap;

/// A record surfaced by one search channel.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record_id: String,
    /// Raw channel score; higher is better.
    pub raw_score: f64,
}

impl Candidate {
    pub fn new(record_id: impl Into<String>, raw_score: f64) -> Self {
        Self {
            record_id: record_id.into(),
            raw_score,
        }
    }
}

/// Min-max normalize scores to [0, 1]. All-equal scores normalize to 1.
pub fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// Blend keyword and vector candidates into one ranking.
///
/// Returns `(record_id, score)` sorted by score descending, then id ascending.
pub fn fuse(keyword: &[Candidate], vector: &[Candidate], alpha: f64) -> Vec<(String, f64)> {
    let kw_map: HashMap<&str, f64> = normalize_scores(keyword)
        .into_iter()
        .map(|(c, s)| (c.record_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(vector)
        .into_iter()
        .map(|(c, s)| (c.record_id.as_str(), s))
        .collect();

    let mut ids: Vec<&str> = kw_map.keys().chain(vec_map.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut scored: Vec<(String, f64)> = ids
        .into_iter()
        .map(|id| {
            let k = kw_map.get(id).copied().unwrap_or(0.0);
            let v = vec_map.get(id).copied().unwrap_or(0.0);
            (id.to_string(), (1.0 - alpha) * k + alpha * v)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    scored
}

/// Turn free text into an FTS5 query that matches any of its terms.
///
/// User questions contain punctuation that FTS5 treats as syntax, so each
/// alphanumeric term is quoted and the terms are OR-ed. Returns `None` when
/// the text has no searchable terms.
pub fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
