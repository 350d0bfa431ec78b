//! Flat chunk retrieval: fuse a semantic and a keyword ranking, then
//! optionally rerank.
//!
//! The channels themselves (embedding search, full-text search) live outside
//! this crate and plug in through [`ChunkChannel`].

mod fusion;
mod query;
mod rerank;

pub use fusion::{fuse, rrf_contribution};
pub use query::expand_legal_query;
pub use rerank::{LexicalScorer, LlmRelevanceScorer, RelevanceScorer, Reranker, lexical_score};

use crate::config::HybridConfig;
use crate::error::{PageIndexError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A passage of an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<usize>,
    #[serde(default)]
    pub chunk_index: usize,
}

impl Chunk {
    pub fn new(id: impl Into<String>, document_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            content: content.into(),
            page_number: None,
            chunk_index: 0,
        }
    }
}

/// A chunk with its per-channel ranks (1-based) and fused score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub semantic_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
    pub score: f64,
    /// Relevance assigned by the reranker, 0-1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

impl RankedChunk {
    pub fn unranked(chunk: Chunk) -> Self {
        Self {
            chunk,
            semantic_rank: None,
            keyword_rank: None,
            score: 0.0,
            rerank_score: None,
        }
    }

    /// Best rank over both channels.
    pub fn best_rank(&self) -> usize {
        self.semantic_rank
            .into_iter()
            .chain(self.keyword_rank)
            .min()
            .unwrap_or(usize::MAX)
    }
}

/// One retrieval channel, returning chunks best first.
#[async_trait]
pub trait ChunkChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn rank(&self, query: &str, limit: usize) -> Result<Vec<Chunk>>;
}

/// Runs both channels, fuses, and reranks.
pub struct HybridSearcher {
    semantic: Arc<dyn ChunkChannel>,
    keyword: Arc<dyn ChunkChannel>,
    reranker: Option<Reranker>,
    config: HybridConfig,
}

impl HybridSearcher {
    pub fn new(semantic: Arc<dyn ChunkChannel>, keyword: Arc<dyn ChunkChannel>, config: HybridConfig) -> Self {
        Self {
            semantic,
            keyword,
            reranker: None,
            config,
        }
    }

    /// Rerank fused candidates with `reranker` when reranking is enabled.
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Top `top_k` chunks for `query`.
    ///
    /// A failing channel is logged and skipped; only both failing is an error.
    #[instrument(skip_all, fields(query = %query))]
    pub async fn search(&self, query: &str) -> Result<Vec<RankedChunk>> {
        let expanded = if self.config.expand_query {
            expand_legal_query(query)
        } else {
            query.to_string()
        };
        let limit = self.config.initial_top_k;

        let (semantic, keyword) = tokio::join!(
            self.semantic.rank(&expanded, limit),
            self.keyword.rank(&expanded, limit)
        );
        let (semantic, keyword) = match (semantic, keyword) {
            (Ok(s), Ok(k)) => (s, k),
            (Ok(s), Err(err)) => {
                warn!(channel = self.keyword.name(), error = %err, "channel failed, using the other alone");
                (s, Vec::new())
            }
            (Err(err), Ok(k)) => {
                warn!(channel = self.semantic.name(), error = %err, "channel failed, using the other alone");
                (Vec::new(), k)
            }
            (Err(s), Err(k)) => {
                return Err(PageIndexError::ChannelFailed {
                    channel: format!("{}+{}", self.semantic.name(), self.keyword.name()),
                    message: format!("{}; {}", s, k),
                });
            }
        };

        let mut fused = fuse(&semantic, &keyword, &self.config);
        fused.truncate(limit);
        debug!(semantic = semantic.len(), keyword = keyword.len(), fused = fused.len(), "fused channels");

        Ok(self.finish(query, fused).await)
    }

    /// Rerank (when enabled and worthwhile) and cut to `top_k`.
    pub async fn finish(&self, query: &str, fused: Vec<RankedChunk>) -> Vec<RankedChunk> {
        let mut ranked = match &self.reranker {
            Some(reranker) if self.config.enable_reranking && fused.len() > self.config.top_k => {
                reranker.rerank(query, fused).await
            }
            _ => fused,
        };
        ranked.truncate(self.config.top_k);
        ranked
    }
}
