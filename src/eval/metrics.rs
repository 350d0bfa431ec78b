//! Keyword- and page-based retrieval metrics.
//!
//! A retrieved item counts as relevant when its content mentions any expected
//! keyword (case-insensitive). Ranks are 1-based.

use crate::hybrid::RankedChunk;
use crate::search::RetrievalSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One retrieved item as the metrics see it.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieved {
    pub content: String,
    /// Physical pages the item covers.
    pub pages: Vec<usize>,
}

impl From<&RankedChunk> for Retrieved {
    fn from(ranked: &RankedChunk) -> Self {
        Self {
            content: ranked.chunk.content.clone(),
            pages: ranked.chunk.page_number.into_iter().collect(),
        }
    }
}

impl From<&RetrievalSource> for Retrieved {
    fn from(source: &RetrievalSource) -> Self {
        Self {
            content: format!("{}\n{}", source.title, source.excerpt),
            pages: (source.start_index..=source.end_index).collect(),
        }
    }
}

fn mentions_any(content: &str, keywords: &[String]) -> bool {
    let content = content.to_lowercase();
    keywords.iter().any(|kw| content.contains(&kw.to_lowercase()))
}

fn keyword_share(content: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let content = content.to_lowercase();
    let found = keywords
        .iter()
        .filter(|kw| content.contains(&kw.to_lowercase()))
        .count();
    found as f64 / keywords.len() as f64
}

/// Relevant items in the first `k`, divided by `k`.
pub fn precision_at_k(results: &[Retrieved], keywords: &[String], k: usize) -> f64 {
    if results.is_empty() || k == 0 {
        return 0.0;
    }
    let relevant = results
        .iter()
        .take(k)
        .filter(|r| mentions_any(&r.content, keywords))
        .count();
    relevant as f64 / k as f64
}

/// Share of expected keywords found anywhere in the results.
pub fn recall(results: &[Retrieved], keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 1.0;
    }
    let all = results
        .iter()
        .map(|r| r.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    keyword_share(&all, keywords)
}

pub fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Reciprocal rank of the first relevant item.
pub fn reciprocal_rank(results: &[Retrieved], keywords: &[String]) -> f64 {
    results
        .iter()
        .position(|r| mentions_any(&r.content, keywords))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

/// NDCG@k with graded relevance (share of keywords an item mentions).
///
/// The ideal ordering is taken as `k` fully relevant items.
pub fn ndcg_at_k(results: &[Retrieved], keywords: &[String], k: usize) -> f64 {
    let discount = |i: usize| 1.0 / ((i + 2) as f64).log2();
    let dcg: f64 = results
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, r)| keyword_share(&r.content, keywords) * discount(i))
        .sum();
    let idcg: f64 = (0..k).map(discount).sum();
    if idcg > 0.0 { dcg / idcg } else { 0.0 }
}

/// Average precision at each relevant rank, divided by the keyword count.
pub fn average_precision(results: &[Retrieved], keywords: &[String]) -> f64 {
    if results.is_empty() || keywords.is_empty() {
        return 0.0;
    }
    let mut relevant = 0usize;
    let mut total = 0.0;
    for (i, r) in results.iter().enumerate() {
        if mentions_any(&r.content, keywords) {
            relevant += 1;
            total += relevant as f64 / (i + 1) as f64;
        }
    }
    total / keywords.len() as f64
}

pub fn hit_rate(results: &[Retrieved], keywords: &[String]) -> f64 {
    if reciprocal_rank(results, keywords) > 0.0 { 1.0 } else { 0.0 }
}

/// Share of expected keywords in the top result.
pub fn keyword_coverage(results: &[Retrieved], keywords: &[String]) -> f64 {
    match results.first() {
        Some(top) => keyword_share(&top.content, keywords),
        None => 0.0,
    }
}

/// Share of expected pages covered by any result.
pub fn page_accuracy(results: &[Retrieved], expected_pages: &[usize]) -> f64 {
    if results.is_empty() || expected_pages.is_empty() {
        return 0.0;
    }
    let retrieved: HashSet<usize> = results.iter().flat_map(|r| r.pages.iter().copied()).collect();
    let expected: HashSet<usize> = expected_pages.iter().copied().collect();
    retrieved.intersection(&expected).count() as f64 / expected.len() as f64
}

/// Distinct start pages over result count; 1.0 for fewer than two results.
pub fn chunk_diversity(results: &[Retrieved]) -> f64 {
    if results.len() <= 1 {
        return 1.0;
    }
    let pages: HashSet<usize> = results
        .iter()
        .map(|r| r.pages.first().copied().unwrap_or(0))
        .collect();
    pages.len() as f64 / results.len() as f64
}

/// Nearest-rank percentile (`p` in 0..=100) of `values`; zero when empty.
pub fn percentile(values: &[f64], p: u32) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let index = sorted.len() * p as usize / 100;
    sorted[index.min(sorted.len() - 1)]
}

/// All metrics for one question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub precision_at_k: f64,
    pub recall: f64,
    pub f1: f64,
    pub mrr: f64,
    pub ndcg_at_k: f64,
    pub map: f64,
    pub hit_rate: f64,
    pub keyword_coverage: f64,
    pub page_accuracy: f64,
    #[serde(default)]
    pub chunk_diversity: f64,
}

impl RetrievalMetrics {
    pub fn compute(results: &[Retrieved], keywords: &[String], expected_pages: &[usize], k: usize) -> Self {
        let precision = precision_at_k(results, keywords, k);
        let recall = recall(results, keywords);
        Self {
            precision_at_k: precision,
            recall,
            f1: f1(precision, recall),
            mrr: reciprocal_rank(results, keywords),
            ndcg_at_k: ndcg_at_k(results, keywords, k),
            map: average_precision(results, keywords),
            hit_rate: hit_rate(results, keywords),
            keyword_coverage: keyword_coverage(results, keywords),
            page_accuracy: page_accuracy(results, expected_pages),
            chunk_diversity: chunk_diversity(results),
        }
    }

    /// Field-wise mean; zero for an empty slice.
    pub fn mean(all: &[RetrievalMetrics]) -> Self {
        if all.is_empty() {
            return Self::default();
        }
        let n = all.len() as f64;
        let avg = |f: fn(&RetrievalMetrics) -> f64| all.iter().map(f).sum::<f64>() / n;
        Self {
            precision_at_k: avg(|m| m.precision_at_k),
            recall: avg(|m| m.recall),
            f1: avg(|m| m.f1),
            mrr: avg(|m| m.mrr),
            ndcg_at_k: avg(|m| m.ndcg_at_k),
            map: avg(|m| m.map),
            hit_rate: avg(|m| m.hit_rate),
            keyword_coverage: avg(|m| m.keyword_coverage),
            page_accuracy: avg(|m| m.page_accuracy),
            chunk_diversity: avg(|m| m.chunk_diversity),
        }
    }
}
