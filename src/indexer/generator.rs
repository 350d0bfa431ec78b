//! Derive a structure straight from page content, group by group.

use super::TreeIndexer;
use crate::document::{Page, group_pages, tag_pages};
use crate::error::Result;
use crate::tree::{RawTocItem, TocItem};
use tracing::{debug, warn};

/// Items produced by the generator.
#[derive(Debug, Clone, Default)]
pub struct GeneratedStructure {
    pub items: Vec<TocItem>,
    /// Items discarded for a missing title or an index outside the pages.
    pub dropped: usize,
}

/// Convert model items, keeping only titled ones placed inside `first..=last`.
///
/// A heading on an overlap page can be reported by both groups; repeats of
/// an earlier (title, page) pair are skipped.
pub fn accept_generated(raw: &[RawTocItem], first: usize, last: usize) -> GeneratedStructure {
    let mut out = GeneratedStructure::default();
    for candidate in raw.iter().map(TocItem::from) {
        let in_range = candidate
            .physical_index
            .is_some_and(|i| (first..=last).contains(&i));
        if candidate.title.is_empty() || !in_range {
            warn!(title = %candidate.title, index = ?candidate.physical_index, "dropping generated item");
            out.dropped += 1;
            continue;
        }
        let repeated = out
            .items
            .iter()
            .any(|seen| seen.title == candidate.title && seen.physical_index == candidate.physical_index);
        if !repeated {
            out.items.push(candidate);
        }
    }
    out
}

impl TreeIndexer {
    /// Generate a structure for `pages` without relying on a TOC.
    pub(crate) async fn generate_structure(&self, pages: &[Page]) -> Result<GeneratedStructure> {
        let (Some(first), Some(last)) = (pages.first(), pages.last()) else {
            return Ok(GeneratedStructure::default());
        };
        let groups = group_pages(
            pages,
            self.options.max_tokens_per_group,
            self.options.group_overlap_pages,
        );
        debug!(groups = groups.len(), first = first.number, last = last.number, "generating structure");

        let mut raw: Vec<RawTocItem> = Vec::new();
        for (i, group) in groups.iter().enumerate() {
            let tagged = tag_pages(group);
            let found = if i == 0 {
                self.caps.generate_structure_init(&tagged).await?
            } else {
                self.caps.generate_structure_continue(&raw, &tagged).await?
            };
            raw.extend(found);
        }

        Ok(accept_generated(&raw, first.number, last.number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::testing::{FakeCapabilities, LegalDocBuilder};
    use serde_json::json;

    #[test]
    fn test_accept_generated_filters() {
        let raw = vec![
            RawTocItem {
                title: "Article 1".into(),
                physical_index: Some(json!("<physical_index_3>")),
                ..Default::default()
            },
            RawTocItem {
                title: "  ".into(),
                physical_index: Some(json!(4)),
                ..Default::default()
            },
            RawTocItem {
                title: "Article 9".into(),
                physical_index: Some(json!(99)),
                ..Default::default()
            },
            RawTocItem {
                title: "Article 1".into(),
                physical_index: Some(json!(3)),
                ..Default::default()
            },
        ];
        let generated = accept_generated(&raw, 1, 10);
        assert_eq!(generated.items.len(), 1);
        assert_eq!(generated.dropped, 2);
    }

    #[tokio::test]
    async fn test_generation_spans_groups() {
        let doc = LegalDocBuilder::new(30)
            .words_per_page(300)
            .chapter(1, "Chapter I General provisions")
            .article(2, "Article 1 Subject matter")
            .article(9, "Article 2 Definitions")
            .chapter(16, "Chapter II Obligations")
            .article(17, "Article 3 Duties of providers")
            .article(28, "Article 4 Penalties")
            .build();
        let config = IndexConfig {
            max_tokens_per_group: 3_000,
            ..IndexConfig::default()
        };
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), config);

        let generated = indexer.generate_structure(&doc.pages).await.unwrap();
        let titles: Vec<_> = generated.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Chapter I General provisions",
                "Article 1 Subject matter",
                "Article 2 Definitions",
                "Chapter II Obligations",
                "Article 3 Duties of providers",
                "Article 4 Penalties",
            ]
        );
        assert_eq!(generated.items[4].structure.as_deref(), Some("2.1"));
        assert_eq!(generated.items[5].physical_index, Some(28));
    }
}
