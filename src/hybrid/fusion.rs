//! Weighted Reciprocal Rank Fusion of the semantic and keyword channels.
//!
//! score = w_sem / (k + rank_sem) + w_kw / (k + rank_kw)
//!
//! Ranks are 1-based; a channel that did not return the chunk adds nothing.

use super::{Chunk, RankedChunk};
use crate::config::HybridConfig;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Contribution of one channel for a chunk at `rank`.
pub fn rrf_contribution(weight: f64, k: u32, rank: Option<usize>) -> f64 {
    match rank {
        Some(rank) => weight / (k as f64 + rank as f64),
        None => 0.0,
    }
}

/// Fuse two ranked lists into one, best first.
///
/// Ties on the fused score go to the chunk with the better single-channel
/// rank, then to the smaller chunk id.
pub fn fuse(semantic: &[Chunk], keyword: &[Chunk], config: &HybridConfig) -> Vec<RankedChunk> {
    let mut by_id: HashMap<&str, RankedChunk> = HashMap::new();

    for (i, chunk) in semantic.iter().enumerate() {
        let entry = by_id
            .entry(chunk.id.as_str())
            .or_insert_with(|| RankedChunk::unranked(chunk.clone()));
        entry.semantic_rank.get_or_insert(i + 1);
    }
    for (i, chunk) in keyword.iter().enumerate() {
        let entry = by_id
            .entry(chunk.id.as_str())
            .or_insert_with(|| RankedChunk::unranked(chunk.clone()));
        entry.keyword_rank.get_or_insert(i + 1);
    }

    let mut fused: Vec<RankedChunk> = by_id
        .into_values()
        .map(|mut ranked| {
            ranked.score = rrf_contribution(config.semantic_weight, config.rrf_k, ranked.semantic_rank)
                + rrf_contribution(config.keyword_weight, config.rrf_k, ranked.keyword_rank);
            ranked
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.best_rank().cmp(&b.best_rank()))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    fused
}
