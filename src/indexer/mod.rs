//! Tree indexer - builds the hierarchical page index of a document.
//!
//! The pipeline:
//! 1. Look for a table of contents in the first pages
//! 2. If found, structure it and map printed page numbers to physical pages
//! 3. Otherwise (or if the TOC fails verification) derive the structure from
//!    the page content
//! 4. Verify every item against its page and repair the misplaced ones
//! 5. Build the tree, subdivide oversized nodes, attach text and summaries

mod concurrency;
mod finalize;
mod generator;
mod subdivide;
mod toc;
mod verify;

pub use concurrency::bounded_map;
pub use generator::GeneratedStructure;
pub use toc::{mode_offset, normalize_leaders};
pub use verify::{Verdict, Verification};

use crate::config::IndexConfig;
use crate::document::{DEFAULT_PAGE_DELIMITER, Document};
use crate::error::Result;
use crate::llm::Capabilities;
use crate::tree::{DocumentTree, TocItem, TreeNode, add_preface_if_needed, build_tree, enforce_monotonic};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Where the top-level structure came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureSource {
    Toc,
    #[default]
    Content,
}

/// What happened while indexing one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub source: StructureSource,
    /// Physical pages detected as table of contents.
    pub toc_pages: Vec<usize>,
    /// Printed-to-physical page offset, when the TOC had page numbers.
    pub page_offset: Option<i64>,
    /// Verification accuracy of the top-level structure.
    pub accuracy: Option<f64>,
    /// The TOC was found but failed verification.
    pub toc_rejected: bool,
    pub repaired: usize,
    /// Titles whose placement could not be verified.
    pub unresolved: Vec<String>,
    /// Items discarded for having no usable page.
    pub dropped: usize,
    /// Items moved forward to keep start pages in order.
    pub reordered: usize,
    pub subdivided: usize,
}

/// Tree indexer that drives the model-backed capabilities.
pub struct TreeIndexer {
    caps: Arc<dyn Capabilities>,
    options: IndexConfig,
}

impl TreeIndexer {
    /// Create a new tree indexer.
    pub fn new(caps: Arc<dyn Capabilities>) -> Self {
        Self::with_config(caps, IndexConfig::default())
    }

    /// Create with custom options.
    pub fn with_config(caps: Arc<dyn Capabilities>, options: IndexConfig) -> Self {
        Self { caps, options }
    }

    pub fn from_capabilities<C: Capabilities + 'static>(caps: C, options: IndexConfig) -> Self {
        Self::with_config(Arc::new(caps), options)
    }

    pub fn options(&self) -> &IndexConfig {
        &self.options
    }

    /// Build a tree index for a document.
    pub async fn index(&self, document: &Document) -> Result<DocumentTree> {
        self.index_with_report(document).await.map(|(tree, _)| tree)
    }

    /// Build a tree index and report how it was derived.
    #[instrument(skip_all, fields(document = %document.name, pages = document.page_count()))]
    pub async fn index_with_report(&self, document: &Document) -> Result<(DocumentTree, IndexReport)> {
        document.ensure_extracted()?;
        let mut report = IndexReport::default();

        let items = match self.structure_from_toc(document, &mut report).await? {
            Some(items) => {
                report.source = StructureSource::Toc;
                items
            }
            None => {
                let (items, accuracy) = self
                    .structure_from_content(document, 1, document.page_count(), &mut report)
                    .await?;
                report.source = StructureSource::Content;
                report.accuracy = accuracy;
                items
            }
        };

        let tree = self.build(document, items, &mut report).await?;
        info!(
            source = ?report.source,
            nodes = tree.node_count(),
            depth = tree.max_depth(),
            unresolved = report.unresolved.len(),
            "indexed document"
        );
        Ok((tree, report))
    }

    /// Build a tree index from the page content alone, ignoring any TOC.
    #[instrument(skip_all, fields(document = %document.name, pages = document.page_count()))]
    pub async fn index_without_toc(&self, document: &Document) -> Result<DocumentTree> {
        document.ensure_extracted()?;
        let mut report = IndexReport::default();
        let (items, _) = self
            .structure_from_content(document, 1, document.page_count(), &mut report)
            .await?;
        self.build(document, items, &mut report).await
    }

    /// TOC path. `None` means "use the content path instead".
    async fn structure_from_toc(
        &self,
        document: &Document,
        report: &mut IndexReport,
    ) -> Result<Option<Vec<TocItem>>> {
        let toc_pages = self.locate_toc_pages(document).await?;
        if toc_pages.is_empty() {
            info!("no table of contents found");
            return Ok(None);
        }
        info!(pages = ?toc_pages, "found table of contents");
        report.toc_pages = toc_pages.clone();

        let toc = self.structure_toc(document, &toc_pages).await?;
        if toc.items.is_empty() {
            warn!("table of contents yielded no items");
            return Ok(None);
        }

        let mut items = toc.items;
        if toc.has_page_numbers {
            report.page_offset = self.resolve_page_indices(document, &toc_pages, &mut items).await?;
            if report.page_offset.is_none() {
                warn!("could not match any toc entry in the body, placing entries by content");
                self.locate_without_page_numbers(document, &mut items).await?;
            }
        } else {
            self.locate_without_page_numbers(document, &mut items).await?;
        }

        report.dropped += self.fill_missing_indices(document, &mut items).await?;
        if items.is_empty() {
            warn!("no toc entry could be placed");
            return Ok(None);
        }

        let verification = self.verify_items(document, &items, true).await?;
        report.accuracy = Some(verification.accuracy);
        match verification.verdict(self.options.min_accuracy, true) {
            Verdict::Accept => Ok(Some(items)),
            Verdict::Reject => {
                warn!(
                    accuracy = verification.accuracy,
                    min = self.options.min_accuracy,
                    "table of contents failed verification, using content"
                );
                report.toc_rejected = true;
                Ok(None)
            }
            Verdict::Repair => {
                let bounds = (1, document.page_count());
                self.repair(document, &mut items, verification.incorrect, bounds, report)
                    .await?;
                Ok(Some(items))
            }
        }
    }

    /// Content path over `start..=end`; returns the items and their accuracy.
    pub(crate) async fn structure_from_content(
        &self,
        document: &Document,
        start: usize,
        end: usize,
        report: &mut IndexReport,
    ) -> Result<(Vec<TocItem>, Option<f64>)> {
        let generated = self
            .generate_structure(document.pages_in_range(start, end))
            .await?;
        report.dropped += generated.dropped;
        let mut items = generated.items;
        if items.is_empty() {
            return Ok((items, None));
        }

        let verification = self.verify_items(document, &items, false).await?;
        if verification.verdict(self.options.min_accuracy, false) == Verdict::Repair {
            self.repair(document, &mut items, verification.incorrect.clone(), (start, end), report)
                .await?;
        }
        Ok((items, Some(verification.accuracy)))
    }

    async fn repair(
        &self,
        document: &Document,
        items: &mut [TocItem],
        incorrect: Vec<usize>,
        bounds: (usize, usize),
        report: &mut IndexReport,
    ) -> Result<()> {
        let outcome = self.repair_items(document, items, incorrect, bounds).await?;
        report.repaired += outcome.repaired;
        report
            .unresolved
            .extend(outcome.unresolved.iter().map(|&i| items[i].title.clone()));
        Ok(())
    }

    /// Items to finished tree.
    async fn build(
        &self,
        document: &Document,
        mut items: Vec<TocItem>,
        report: &mut IndexReport,
    ) -> Result<DocumentTree> {
        let page_count = document.page_count();

        self.check_start_flags(document, &mut items).await?;
        report.reordered += enforce_monotonic(&mut items);
        add_preface_if_needed(&mut items, 1);

        let mut nodes = build_tree(&items, 1, page_count);
        if nodes.is_empty() {
            warn!("no structure found, indexing the document as a single node");
            nodes.push(TreeNode::new(&document.name, 1, page_count));
        }

        self.subdivide(document, &mut nodes, report).await?;
        let description = self.finalize(document, &mut nodes).await?;

        let mut tree = DocumentTree::new(&document.name, nodes, page_count);
        tree.description = description;
        tree.validate()?;
        Ok(tree)
    }
}

/// Convenience function to index a document from a file path.
///
/// Pages are split on form feeds.
pub async fn index_document(path: &Path, caps: Arc<dyn Capabilities>) -> Result<DocumentTree> {
    let document = Document::from_text_file_with_delimiter(path, DEFAULT_PAGE_DELIMITER)?;
    TreeIndexer::new(caps).index(&document).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCapabilities, LegalDocBuilder, regulation};

    #[tokio::test]
    async fn test_toc_path_builds_full_tree() {
        let doc = regulation(60, 12).build();
        let fake = FakeCapabilities::new();
        let indexer = TreeIndexer::from_capabilities(fake.clone(), IndexConfig::default());

        let (tree, report) = indexer.index_with_report(&doc).await.unwrap();
        assert_eq!(report.source, StructureSource::Toc);
        assert_eq!(report.toc_pages, vec![2]);
        assert_eq!(report.accuracy, Some(1.0));
        assert_eq!(fake.relocate_calls(), 0);

        let first = tree.nodes.first().unwrap();
        let last = tree.nodes.last().unwrap();
        assert_eq!(first.start_index, 1);
        assert_eq!(last.end_index, 60);
        let leaves: Vec<_> = tree.nodes.iter().flat_map(|n| n.leaves()).collect();
        assert_eq!(leaves.last().unwrap().end_index, 60);
        assert!(tree
            .preorder()
            .iter()
            .all(|n| n.text.as_deref().is_some_and(|t| !t.is_empty())));
        assert_eq!(tree.preorder().len(), 1 + 12);
        tree.validate().unwrap();
    }

    #[tokio::test]
    async fn test_misprinted_entries_are_repaired() {
        let doc = regulation(60, 10)
            .misprint("Article 3 Definitions", 40)
            .misprint("Article 7 Transparency", 2)
            .build();
        let fake = FakeCapabilities::new();
        let indexer = TreeIndexer::from_capabilities(fake.clone(), IndexConfig::default());

        let (tree, report) = indexer.index_with_report(&doc).await.unwrap();
        assert_eq!(report.source, StructureSource::Toc);
        assert_eq!(report.accuracy, Some(0.8));
        assert_eq!(report.repaired, 2);
        assert!(report.unresolved.is_empty());
        assert!(fake.relocate_calls() >= 2);

        let article = tree.find_by_title("Article 3 Definitions").unwrap();
        assert_eq!(article.start_index, 14);
        assert!(article.text.as_deref().unwrap().contains("Article 3 Definitions"));
    }

    #[tokio::test]
    async fn test_unreliable_toc_falls_back_to_content() {
        let doc = regulation(60, 10)
            .misprint("Article 4 Principles", 50)
            .misprint("Article 5 Lawfulness", 51)
            .misprint("Article 6 Consent", 52)
            .misprint("Article 7 Transparency", 53)
            .misprint("Article 8 Right of access", 54)
            .misprint("Article 9 Erasure", 55)
            .misprint("Article 10 Security", 56)
            .build();
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), IndexConfig::default());

        let (tree, report) = indexer.index_with_report(&doc).await.unwrap();
        assert_eq!(report.source, StructureSource::Content);
        assert!(report.toc_rejected);

        let content_only = indexer.index_without_toc(&doc).await.unwrap();
        assert_eq!(tree, content_only);
    }

    #[tokio::test]
    async fn test_document_without_toc_uses_content() {
        let doc = LegalDocBuilder::new(12)
            .chapter(1, "Chapter I General provisions")
            .article_mid_page(1, "Article 1 Subject matter")
            .article(4, "Article 2 Definitions")
            .chapter(7, "Chapter II Final provisions")
            .article_mid_page(7, "Article 3 Entry into force")
            .build();
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), IndexConfig::default());

        let (tree, report) = indexer.index_with_report(&doc).await.unwrap();
        assert_eq!(report.source, StructureSource::Content);
        assert!(report.toc_pages.is_empty());
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[0].nodes.len(), 2);
        assert_eq!((tree.nodes[1].start_index, tree.nodes[1].end_index), (7, 12));
        tree.validate().unwrap();
    }

    #[tokio::test]
    async fn test_unstructured_document_becomes_single_node() {
        let doc = LegalDocBuilder::new(3).build();
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), IndexConfig::default());

        let tree = indexer.index(&doc).await.unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!((tree.nodes[0].start_index, tree.nodes[0].end_index), (1, 3));
    }

    #[tokio::test]
    async fn test_empty_document_is_an_extraction_error() {
        let doc = Document::new("empty", Vec::new());
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), IndexConfig::default());
        let err = indexer.index(&doc).await.unwrap_err();
        assert!(matches!(err, crate::error::PageIndexError::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_oversized_leaf_is_subdivided_in_pipeline() {
        let doc = LegalDocBuilder::new(80)
            .words_per_page(240)
            .with_toc_pages(1)
            .chapter(3, "Chapter I General provisions")
            .unlisted_article(20, "Article 1 Subject matter")
            .unlisted_article(45, "Article 2 Definitions")
            .unlisted_article(70, "Article 3 Penalties")
            .chapter(78, "Chapter II Final provisions")
            .build();
        let config = IndexConfig {
            max_pages_per_node: 50,
            max_tokens_per_node: 20_000,
            ..IndexConfig::default()
        };
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), config);

        let (tree, report) = indexer.index_with_report(&doc).await.unwrap();
        assert_eq!(report.subdivided, 1);
        let chapter = tree.find_by_title("Chapter I General provisions").unwrap();
        assert_eq!((chapter.start_index, chapter.end_index), (3, 77));
        assert!(chapter.nodes.len() >= 2);
        assert_eq!(chapter.nodes.last().unwrap().end_index, 77);
        tree.validate().unwrap();
    }

    #[tokio::test]
    async fn test_index_document_splits_form_feeds() {
        let doc = regulation(30, 6).build();
        let text = doc
            .pages
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join(DEFAULT_PAGE_DELIMITER);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("regulation.txt");
        std::fs::write(&path, text).unwrap();

        let tree = index_document(&path, Arc::new(FakeCapabilities::new())).await.unwrap();
        assert_eq!(tree.name, "regulation");
        assert_eq!(tree.total_pages, 30);
        assert!(tree.find_by_title("Article 6 Consent").is_some());
    }
}
