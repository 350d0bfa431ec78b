//! Tree-based retrieval using LLM reasoning.
//!
//! Given a query and a document tree, the model sees the tree outline (ids,
//! titles, page ranges, summaries; never raw text) and picks the nodes that
//! answer the query. The picked nodes are resolved back to their text and
//! returned as citable sources. Nodes store only their own pages, so a
//! picked parent is read together with its descendants.

use crate::document::Document;
use crate::error::{PageIndexError, Result};
use crate::llm::Capabilities;
use crate::tree::{DocumentTree, TreeNode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Confidence the selector reports for its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Convert from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }

    /// Get numeric score for sorting.
    pub fn score(&self) -> u8 {
        match self {
            Confidence::High => 3,
            Confidence::Medium => 2,
            Confidence::Low => 1,
        }
    }
}

/// A cited section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSource {
    pub node_id: String,
    pub title: String,
    /// Titles from the root down to this node.
    pub path: Vec<String>,
    pub start_index: usize,
    pub end_index: usize,
    pub excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl RetrievalSource {
    /// Path rendered as "Chapter II > Article 5".
    pub fn breadcrumb(&self) -> String {
        self.path.join(" > ")
    }
}

/// Answer material for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Sources in tree order.
    pub sources: Vec<RetrievalSource>,
    /// Text of all sources, concatenated in tree order.
    pub content: String,
    pub reasoning: String,
    pub confidence: Confidence,
}

impl RetrievalResult {
    /// Result for a query no section answers.
    pub fn no_match(reasoning: impl Into<String>) -> Self {
        Self {
            sources: Vec::new(),
            content: String::new(),
            reasoning: reasoning.into(),
            confidence: Confidence::Low,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of nodes to return.
    pub top_k: usize,
    /// Characters of node text kept in each source excerpt.
    pub excerpt_chars: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            excerpt_chars: 500,
        }
    }
}

/// Tree-based searcher using LLM reasoning.
pub struct TreeSearcher {
    caps: Arc<dyn Capabilities>,
    options: SearchOptions,
}

impl TreeSearcher {
    /// Create a new tree searcher.
    pub fn new(caps: Arc<dyn Capabilities>) -> Self {
        Self {
            caps,
            options: SearchOptions::default(),
        }
    }

    /// Create with custom options.
    pub fn with_options(caps: Arc<dyn Capabilities>, options: SearchOptions) -> Self {
        Self { caps, options }
    }

    /// Retrieve the sections of `tree` that answer `query`.
    pub async fn retrieve(&self, tree: &DocumentTree, query: &str) -> Result<RetrievalResult> {
        self.run(tree, None, query).await
    }

    /// Like [`retrieve`](Self::retrieve), reading text from `document` for
    /// nodes stored without it.
    pub async fn retrieve_with_document(
        &self,
        tree: &DocumentTree,
        document: &Document,
        query: &str,
    ) -> Result<RetrievalResult> {
        self.run(tree, Some(document), query).await
    }

    #[instrument(skip_all, fields(document = %tree.name, query = %query))]
    async fn run(
        &self,
        tree: &DocumentTree,
        document: Option<&Document>,
        query: &str,
    ) -> Result<RetrievalResult> {
        let outline = serde_json::to_string_pretty(&tree.outline())
            .map_err(|e| PageIndexError::Serialization(e.to_string()))?;
        let selection = self.caps.select_nodes(query, &outline).await?;
        debug!(selected = ?selection.node_ids, confidence = ?selection.confidence, "node selection");

        let order: HashMap<&str, usize> = tree
            .preorder()
            .into_iter()
            .enumerate()
            .filter_map(|(i, n)| n.node_id.as_deref().map(|id| (id, i)))
            .collect();

        let mut picked: Vec<(usize, Vec<&TreeNode>)> = Vec::new();
        for id in &selection.node_ids {
            let Some(&position) = order.get(id.as_str()) else {
                warn!(node_id = %id, "selector returned an unknown node id");
                continue;
            };
            if picked.iter().any(|(p, _)| *p == position) {
                continue;
            }
            if let Some(path) = tree.path_to(id) {
                picked.push((position, path));
            }
        }
        picked.sort_by_key(|(position, _)| *position);
        picked.truncate(self.options.top_k);

        if picked.is_empty() {
            return Ok(RetrievalResult::no_match(selection.reasoning));
        }

        let picked_ids: HashSet<&str> = picked
            .iter()
            .filter_map(|(_, path)| path.last().copied())
            .filter_map(|n| n.node_id.as_deref())
            .collect();

        let mut sources = Vec::with_capacity(picked.len());
        let mut sections = Vec::with_capacity(picked.len());
        for (_, path) in picked {
            let Some((node, ancestors)) = path.split_last() else {
                continue;
            };
            let node = *node;
            let text = section_text(node, document);
            // A selected ancestor's section already carries this text.
            let covered = ancestors
                .iter()
                .any(|a| a.node_id.as_deref().is_some_and(|id| picked_ids.contains(id)));
            if !covered {
                sections.push(format!(
                    "## {} (pages {}-{})\n{}",
                    node.title, node.start_index, node.end_index, text
                ));
            }
            sources.push(RetrievalSource {
                node_id: node.node_id.clone().unwrap_or_default(),
                title: node.title.clone(),
                path: path.iter().map(|n| n.title.clone()).collect(),
                start_index: node.start_index,
                end_index: node.end_index,
                excerpt: text.chars().take(self.options.excerpt_chars).collect(),
                summary: node.summary.clone(),
            });
        }

        Ok(RetrievalResult {
            sources,
            content: sections.join("\n\n"),
            reasoning: selection.reasoning,
            confidence: selection.confidence,
        })
    }
}

/// Text of a whole section: the node's own text, then its descendants' in
/// tree order.
fn section_text(node: &TreeNode, document: Option<&Document>) -> String {
    let mut parts = Vec::new();
    node.walk(&mut |n| {
        let text = node_text(n, document);
        if !text.trim().is_empty() {
            parts.push(text);
        }
    });
    parts.join("\n\n")
}

/// Stored text, else the document's pages, else the summary.
fn node_text(node: &TreeNode, document: Option<&Document>) -> String {
    if let Some(text) = node.text.as_deref().filter(|t| !t.trim().is_empty()) {
        return text.to_string();
    }
    if let Some(document) = document {
        let (start, end) = node.own_range();
        let text = document.text_range(start, end);
        if !text.trim().is_empty() {
            return text;
        }
    }
    node.summary.clone().unwrap_or_default()
}

/// Convenience function to search a document tree.
pub async fn search_tree(
    tree: &DocumentTree,
    query: &str,
    caps: Arc<dyn Capabilities>,
) -> Result<RetrievalResult> {
    TreeSearcher::new(caps).retrieve(tree, query).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::indexer::TreeIndexer;
    use crate::testing::{FakeCapabilities, LegalDocBuilder, regulation};
    use crate::tree::assign_node_ids;

    fn small_tree() -> DocumentTree {
        let mut ch1 = TreeNode::new("Chapter I General provisions", 1, 6);
        ch1.text = Some("Chapter I General provisions".into());
        let mut a1 = TreeNode::new("Article 1 Subject matter", 2, 3);
        a1.text = Some("This regulation lays down rules.".into());
        let mut a2 = TreeNode::new("Article 2 Definitions", 4, 6);
        a2.text = Some("For the purposes of this regulation.".into());
        a2.summary = Some("Defines terms.".into());
        ch1.add_child(a1);
        ch1.add_child(a2);
        let mut ch2 = TreeNode::new("Chapter II Penalties", 7, 9);
        ch2.text = Some("Fines shall be effective.".into());

        let mut nodes = vec![ch1, ch2];
        assign_node_ids(&mut nodes);
        DocumentTree::new("regulation", nodes, 9)
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High.score() > Confidence::Medium.score());
        assert!(Confidence::Medium.score() > Confidence::Low.score());
        assert_eq!(Confidence::from_str(" HIGH "), Confidence::High);
        assert_eq!(Confidence::from_str("unknown"), Confidence::Low);
    }

    #[tokio::test]
    async fn test_sources_follow_tree_order_with_paths() {
        let fake = FakeCapabilities::new().selecting(&["0003", "0002"], Confidence::Medium);
        let searcher = TreeSearcher::new(Arc::new(fake));

        let result = searcher.retrieve(&small_tree(), "fines").await.unwrap();
        assert_eq!(result.confidence, Confidence::Medium);
        let ids: Vec<_> = result.sources.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, vec!["0002", "0003"]);
        assert_eq!(
            result.sources[0].breadcrumb(),
            "Chapter I General provisions > Article 2 Definitions"
        );
        assert_eq!(result.sources[0].summary.as_deref(), Some("Defines terms."));
        let definitions = result.content.find("For the purposes").unwrap();
        let fines = result.content.find("Fines shall").unwrap();
        assert!(definitions < fines);
    }

    #[tokio::test]
    async fn test_selected_chapter_includes_its_articles() {
        let fake = FakeCapabilities::new().selecting(&["0000"], Confidence::High);
        let searcher = TreeSearcher::new(Arc::new(fake));

        let result = searcher.retrieve(&small_tree(), "definitions").await.unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!((result.sources[0].start_index, result.sources[0].end_index), (1, 6));
        let heading = result.content.find("Chapter I General provisions").unwrap();
        let subject = result.content.find("This regulation lays down rules.").unwrap();
        let definitions = result.content.find("For the purposes").unwrap();
        assert!(heading < subject && subject < definitions);
        assert!(!result.content.contains("Fines shall"));
    }

    #[tokio::test]
    async fn test_chapter_and_article_selected_together() {
        let fake = FakeCapabilities::new().selecting(&["0002", "0000"], Confidence::High);
        let searcher = TreeSearcher::new(Arc::new(fake));

        let result = searcher.retrieve(&small_tree(), "definitions").await.unwrap();
        let ids: Vec<_> = result.sources.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, vec!["0000", "0002"]);
        assert_eq!(result.content.matches("For the purposes").count(), 1);
        assert!(result.sources[1].excerpt.starts_with("For the purposes"));
    }

    #[tokio::test]
    async fn test_unknown_ids_ignored() {
        let fake = FakeCapabilities::new().selecting(&["9999", "0001", "0001"], Confidence::High);
        let searcher = TreeSearcher::new(Arc::new(fake));

        let result = searcher.retrieve(&small_tree(), "subject").await.unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].title, "Article 1 Subject matter");
    }

    #[tokio::test]
    async fn test_nothing_selected_is_no_match() {
        let fake = FakeCapabilities::new().selecting(&[], Confidence::High);
        let searcher = TreeSearcher::new(Arc::new(fake));

        let result = searcher.retrieve(&small_tree(), "weather").await.unwrap();
        assert!(result.is_empty());
        assert!(result.content.is_empty());
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_selector_failure_propagates() {
        let searcher = TreeSearcher::new(Arc::new(FakeCapabilities::new().failing_selection()));
        assert!(searcher.retrieve(&small_tree(), "fines").await.is_err());
    }

    #[tokio::test]
    async fn test_stripped_text_read_from_document() {
        let doc = LegalDocBuilder::new(9)
            .chapter(7, "Chapter II Penalties")
            .build();
        let mut tree = small_tree();
        for node in tree.nodes.iter_mut() {
            node.walk_mut(&mut |n| n.text = None);
        }

        let fake = FakeCapabilities::new().selecting(&["0003", "0002"], Confidence::High);
        let searcher = TreeSearcher::new(Arc::new(fake));

        let without = searcher.retrieve(&tree, "penalties").await.unwrap();
        // No text and no document: the summary stands in, or nothing.
        assert_eq!(without.sources[0].excerpt, "Defines terms.");
        assert_eq!(without.sources[1].excerpt, "");

        let with = searcher
            .retrieve_with_document(&tree, &doc, "penalties")
            .await
            .unwrap();
        assert!(with.sources[1].excerpt.starts_with("Chapter II Penalties"));
    }

    #[tokio::test]
    async fn test_retrieve_from_indexed_regulation() {
        let doc = regulation(60, 12).build();
        let fake = FakeCapabilities::new();
        let indexer = TreeIndexer::from_capabilities(fake.clone(), IndexConfig::default());
        let tree = indexer.index(&doc).await.unwrap();

        let result = search_tree(&tree, "What are the penalties?", Arc::new(fake))
            .await
            .unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].title, "Article 11 Penalties");
        assert!(result.content.contains("Article 11 Penalties"));
        assert_eq!(result.confidence, Confidence::High);
    }
}
