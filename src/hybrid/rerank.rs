//! Reranking of fused candidates through a chain of relevance scorers.
//!
//! Scorers are tried in priority order; the first one that returns a score
//! for every candidate decides the order. The chain always ends with the
//! local [`LexicalScorer`], so reranking itself never fails.

use super::{Chunk, RankedChunk};
use crate::config::{LlmConfig, RerankConfig, RetryConfig};
use crate::error::{PageIndexError, Result};
use crate::llm::json::parse_json;
use crate::llm::retry::with_retry;
use crate::llm::{LlmClient, Prompts};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Scores candidates for a query; higher is more relevant.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    fn name(&self) -> &str;

    /// One score per candidate, in candidate order.
    async fn score(&self, query: &str, candidates: &[Chunk]) -> Result<Vec<f64>>;
}

/// Model-backed scorer: one prompt listing an excerpt of every candidate.
pub struct LlmRelevanceScorer {
    client: LlmClient,
    retry: RetryConfig,
    excerpt_chars: usize,
}

impl LlmRelevanceScorer {
    pub fn new(client: LlmClient, retry: RetryConfig, excerpt_chars: usize) -> Self {
        Self {
            client,
            retry,
            excerpt_chars,
        }
    }

    fn prompt(&self, query: &str, candidates: &[Chunk]) -> String {
        let documents = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let excerpt: String = c.content.chars().take(self.excerpt_chars).collect();
                format!("[{}] {}...", i, excerpt)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Prompts::relevance_scorer()
            .replace("{query}", query)
            .replace("{documents}", &documents)
    }
}

/// Parse a JSON array of 0-10 scores, normalized to 0-1.
fn parse_scores(response: &str, expected: usize) -> Result<Vec<f64>> {
    let scores: Vec<f64> = parse_json(response)?;
    if scores.len() != expected {
        return Err(PageIndexError::LlmParse(format!(
            "expected {} scores, got {}",
            expected,
            scores.len()
        )));
    }
    Ok(scores.into_iter().map(|s| s / 10.0).collect())
}

#[async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    fn name(&self) -> &str {
        self.client.model()
    }

    async fn score(&self, query: &str, candidates: &[Chunk]) -> Result<Vec<f64>> {
        let prompt = self.prompt(query, candidates);
        let client = &self.client;
        let prompt = prompt.as_str();
        with_retry(&self.retry, "rerank", || async move {
            let response = client.complete(None, prompt).await?;
            parse_scores(&response, candidates.len())
        })
        .await
    }
}

/// Term frequency of query terms, normalized by content length in words.
pub fn lexical_score(query: &str, content: &str) -> f64 {
    let terms: HashSet<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    let words: Vec<String> = content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    if terms.is_empty() || words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| terms.contains(w.as_str())).count();
    hits as f64 / words.len() as f64
}

/// Local fallback scorer; never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScorer;

#[async_trait]
impl RelevanceScorer for LexicalScorer {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(&self, query: &str, candidates: &[Chunk]) -> Result<Vec<f64>> {
        Ok(candidates
            .iter()
            .map(|c| lexical_score(query, &c.content))
            .collect())
    }
}

/// Ordered chain of scorers ending with [`LexicalScorer`].
#[derive(Clone)]
pub struct Reranker {
    scorers: Vec<Arc<dyn RelevanceScorer>>,
}

impl Reranker {
    /// Chain `scorers` in priority order, then the lexical fallback.
    pub fn new(scorers: Vec<Arc<dyn RelevanceScorer>>) -> Self {
        let mut scorers = scorers;
        scorers.push(Arc::new(LexicalScorer));
        Self { scorers }
    }

    /// Primary and alternate model scorers from configuration.
    pub fn from_config(rerank: &RerankConfig, llm: &LlmConfig, retry: &RetryConfig) -> Self {
        let client = LlmClient::new(llm.clone());
        let scorers = [&rerank.primary_model, &rerank.alternate_model]
            .into_iter()
            .flatten()
            .map(|model| {
                Arc::new(LlmRelevanceScorer::new(
                    client.with_model(model),
                    retry.clone(),
                    rerank.excerpt_chars,
                )) as Arc<dyn RelevanceScorer>
            })
            .collect();
        Self::new(scorers)
    }

    pub fn scorer_names(&self) -> Vec<&str> {
        self.scorers.iter().map(|s| s.name()).collect()
    }

    /// Reorder `candidates` by the first scorer that succeeds.
    ///
    /// Equal relevance keeps the fused order. If every scorer fails the
    /// candidates are returned unchanged.
    pub async fn rerank(&self, query: &str, mut candidates: Vec<RankedChunk>) -> Vec<RankedChunk> {
        let chunks: Vec<Chunk> = candidates.iter().map(|c| c.chunk.clone()).collect();

        for scorer in &self.scorers {
            match scorer.score(query, &chunks).await {
                Ok(scores) if scores.len() == candidates.len() => {
                    debug!(scorer = scorer.name(), candidates = candidates.len(), "reranked");
                    for (candidate, score) in candidates.iter_mut().zip(scores) {
                        candidate.rerank_score = Some(score);
                    }
                    candidates.sort_by(|a, b| {
                        b.rerank_score
                            .partial_cmp(&a.rerank_score)
                            .unwrap_or(Ordering::Equal)
                    });
                    return candidates;
                }
                Ok(scores) => warn!(
                    scorer = scorer.name(),
                    expected = candidates.len(),
                    got = scores.len(),
                    "scorer returned the wrong number of scores"
                ),
                Err(err) => warn!(scorer = scorer.name(), error = %err, "scorer failed, trying next"),
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<f64>);

    #[async_trait]
    impl RelevanceScorer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn score(&self, _query: &str, _candidates: &[Chunk]) -> Result<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl RelevanceScorer for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn score(&self, _query: &str, _candidates: &[Chunk]) -> Result<Vec<f64>> {
            Err(PageIndexError::ApiStatus {
                status: 503,
                message: "unavailable".into(),
            })
        }
    }

    fn candidates() -> Vec<RankedChunk> {
        vec![
            RankedChunk::unranked(Chunk::new("a", "doc", "general provisions and scope")),
            RankedChunk::unranked(Chunk::new("b", "doc", "penalties penalties for breach")),
            RankedChunk::unranked(Chunk::new("c", "doc", "penalties apply")),
        ]
    }

    fn ids(ranked: &[RankedChunk]) -> Vec<&str> {
        ranked.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_parse_scores() {
        assert_eq!(parse_scores("[10, 5, 0]", 3).unwrap(), vec![1.0, 0.5, 0.0]);
        assert_eq!(parse_scores("```json\n[7,]\n```", 1).unwrap(), vec![0.7]);
        assert!(parse_scores("[1, 2]", 3).is_err());
    }

    #[test]
    fn test_lexical_score() {
        assert_eq!(lexical_score("penalties", "penalties apply"), 0.5);
        assert_eq!(lexical_score("Penalties?", "no match here"), 0.0);
        assert_eq!(lexical_score("", "anything"), 0.0);
    }

    #[test]
    fn test_first_scorer_decides() {
        let reranker = Reranker::new(vec![Arc::new(Fixed(vec![0.1, 0.2, 0.9]))]);
        let out = tokio_test::block_on(reranker.rerank("penalties", candidates()));
        assert_eq!(ids(&out), vec!["c", "b", "a"]);
        assert_eq!(out[0].rerank_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_falls_through_to_alternate() {
        let reranker = Reranker::new(vec![Arc::new(Down), Arc::new(Fixed(vec![0.9, 0.1, 0.5]))]);
        let out = reranker.rerank("penalties", candidates()).await;
        assert_eq!(ids(&out), vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_wrong_count_falls_through_to_lexical() {
        let reranker = Reranker::new(vec![Arc::new(Down), Arc::new(Fixed(vec![1.0]))]);
        assert_eq!(reranker.scorer_names(), vec!["down", "fixed", "lexical"]);
        let out = reranker.rerank("penalties", candidates()).await;
        // b and c tie at 0.5 and keep their fused order; a scores 0.
        assert_eq!(ids(&out), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_prompt_lists_excerpts() {
        let scorer = LlmRelevanceScorer::new(LlmClient::new(LlmConfig::default()), RetryConfig::default(), 5);
        let prompt = scorer.prompt("fines", &[Chunk::new("a", "doc", "abcdefghij")]);
        assert!(prompt.contains("\"fines\""));
        assert!(prompt.contains("[0] abcde..."));
        assert!(!prompt.contains("abcdef"));
    }
}
