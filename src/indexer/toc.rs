//! Table-of-contents path: find the TOC pages, turn them into items, and map
//! printed page numbers onto physical pages.

use super::TreeIndexer;
use super::concurrency::bounded_map;
use super::verify::search_window;
use crate::document::{Document, group_pages, tag_pages};
use crate::error::Result;
use crate::tree::{RawTocItem, TocItem};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static DOT_LEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{5,}").expect("static regex"));
static SPACED_DOT_LEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\. ){5,}\.?").expect("static regex"));

/// TOC items as read from the TOC pages.
#[derive(Debug, Clone)]
pub struct TocStructure {
    pub items: Vec<TocItem>,
    /// The TOC prints a page number next to its entries.
    pub has_page_numbers: bool,
}

/// Replace dot leaders ("Article 4 ........ 12") with a colon.
pub fn normalize_leaders(text: &str) -> String {
    let text = DOT_LEADER.replace_all(text, ": ");
    SPACED_DOT_LEADER.replace_all(&text, ": ").into_owned()
}

/// Most frequent value; ties go to the value seen first.
///
/// A single mis-matched title produces an outlier difference that would drag
/// a mean or a median; the mode ignores it.
pub fn mode_offset(differences: &[i64]) -> Option<i64> {
    let mut counts: Vec<(i64, usize)> = Vec::new();
    for &diff in differences {
        match counts.iter_mut().find(|(value, _)| *value == diff) {
            Some((_, count)) => *count += 1,
            None => counts.push((diff, 1)),
        }
    }

    let mut best: Option<(i64, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Pair model matches with TOC items by title and collect the offsets.
///
/// Matches before `first_body_page` point into the TOC itself and are ignored.
pub fn page_differences(
    items: &[TocItem],
    matches: &[RawTocItem],
    first_body_page: usize,
) -> Vec<i64> {
    matches
        .iter()
        .filter_map(|m| {
            let physical = m.get_page_number().filter(|&p| p >= first_body_page)?;
            let title = m.title.trim();
            let page = items
                .iter()
                .find(|item| item.title == title && item.page.is_some())
                .and_then(|item| item.page)?;
            Some(physical as i64 - page as i64)
        })
        .collect()
}

impl TreeIndexer {
    /// Find the pages holding the table of contents.
    ///
    /// Pages are classified in batches of `concurrency`; the scan ends at the
    /// first non-TOC page after a TOC run, so later batches are never sent.
    pub(crate) async fn locate_toc_pages(&self, document: &Document) -> Result<Vec<usize>> {
        let window = self.options.toc_check_pages.min(document.page_count());
        let batch_size = self.options.concurrency.max(1);

        let mut toc_pages = Vec::new();
        let mut in_run = false;
        for batch in document.pages[..window].chunks(batch_size) {
            let inputs: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();
            let caps = Arc::clone(&self.caps);
            let verdicts = bounded_map(inputs, batch_size, move |text| {
                let caps = Arc::clone(&caps);
                async move { caps.is_toc_page(&text).await }
            })
            .await?;

            for (page, is_toc) in batch.iter().zip(verdicts) {
                if is_toc {
                    toc_pages.push(page.number);
                    in_run = true;
                } else if in_run {
                    debug!(pages = ?toc_pages, "TOC run ended");
                    return Ok(toc_pages);
                }
            }
        }

        // Still inside the TOC at the limit: keep going page by page.
        let mut next = window + 1;
        while in_run {
            let Some(page) = document.get_page(next) else {
                break;
            };
            if self.caps.is_toc_page(&page.content).await? {
                toc_pages.push(page.number);
                next += 1;
            } else {
                in_run = false;
            }
        }

        Ok(toc_pages)
    }

    /// Read the TOC pages into items with nominal page numbers.
    pub(crate) async fn structure_toc(
        &self,
        document: &Document,
        toc_pages: &[usize],
    ) -> Result<TocStructure> {
        let toc_text = toc_pages
            .iter()
            .filter_map(|&n| document.get_page(n))
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let toc_text = normalize_leaders(&toc_text);

        let has_page_numbers = self.caps.toc_has_page_numbers(&toc_text).await?;
        let raw = self.caps.transform_toc(&toc_text).await?;

        let total = raw.len();
        let items: Vec<TocItem> = raw
            .iter()
            .map(|r| TocItem {
                physical_index: None,
                ..TocItem::from(r)
            })
            .filter(|item| !item.title.is_empty())
            .collect();
        if items.len() < total {
            warn!(dropped = total - items.len(), "dropped untitled toc entries");
        }

        debug!(items = items.len(), has_page_numbers, "structured table of contents");
        Ok(TocStructure {
            items,
            has_page_numbers,
        })
    }

    /// Infer the printed-to-physical page offset and apply it to every item.
    ///
    /// Returns the offset, or `None` when no title could be matched in the
    /// body window.
    pub(crate) async fn resolve_page_indices(
        &self,
        document: &Document,
        toc_pages: &[usize],
        items: &mut [TocItem],
    ) -> Result<Option<i64>> {
        let first_body = toc_pages.last().copied().unwrap_or(0) + 1;
        let last_window = (first_body + self.options.toc_check_pages)
            .saturating_sub(1)
            .min(document.page_count());
        if first_body > last_window {
            return Ok(None);
        }

        let flat: Vec<RawTocItem> = items
            .iter()
            .map(|item| RawTocItem::titled(item.structure.as_deref(), &item.title))
            .collect();
        let tagged = document.content_range(first_body, last_window);
        let matches = self.caps.match_physical_indices(&flat, &tagged).await?;

        let differences = page_differences(items, &matches, first_body);
        let Some(offset) = mode_offset(&differences) else {
            return Ok(None);
        };
        info!(offset, pairs = differences.len(), "inferred page offset");

        let page_count = document.page_count() as i64;
        for item in items.iter_mut() {
            item.physical_index = item
                .page
                .map(|page| page as i64 + offset)
                .filter(|&index| index >= 1 && index <= page_count)
                .map(|index| index as usize);
        }

        Ok(Some(offset))
    }

    /// Place items of a TOC without page numbers by scanning page groups.
    pub(crate) async fn locate_without_page_numbers(
        &self,
        document: &Document,
        items: &mut [TocItem],
    ) -> Result<()> {
        let groups = group_pages(
            &document.pages,
            self.options.max_tokens_per_group,
            self.options.group_overlap_pages,
        );

        for group in groups {
            let pending: Vec<usize> = (0..items.len())
                .filter(|&i| items[i].physical_index.is_none())
                .collect();
            if pending.is_empty() {
                break;
            }

            let (first, last) = match (group.first(), group.last()) {
                (Some(f), Some(l)) => (f.number, l.number),
                _ => continue,
            };
            let raws: Vec<RawTocItem> = pending
                .iter()
                .map(|&i| RawTocItem::titled(items[i].structure.as_deref(), &items[i].title))
                .collect();
            let located = self
                .caps
                .locate_items_in_pages(&raws, &tag_pages(group))
                .await?;

            for found in located.iter().filter(|f| f.starts_here()) {
                let Some(index) = found.get_page_number().filter(|i| (first..=last).contains(i))
                else {
                    continue;
                };
                let title = found.title.trim();
                if let Some(&position) = pending
                    .iter()
                    .find(|&&i| items[i].title == title && items[i].physical_index.is_none())
                {
                    items[position].physical_index = Some(index);
                }
            }
        }

        Ok(())
    }

    /// Locate items that still have no physical index between their placed
    /// neighbours; returns how many had to be dropped.
    pub(crate) async fn fill_missing_indices(
        &self,
        document: &Document,
        items: &mut Vec<TocItem>,
    ) -> Result<usize> {
        let last_page = document.page_count();
        let missing: Vec<(usize, String, usize, usize, String)> = (0..items.len())
            .filter(|&i| items[i].physical_index.is_none())
            .map(|i| {
                let (lo, hi) = search_window(
                    items,
                    i,
                    |j| items[j].physical_index.is_some(),
                    1,
                    last_page,
                );
                (i, items[i].title.clone(), lo, hi, document.content_range(lo, hi))
            })
            .collect();

        if !missing.is_empty() {
            let caps = Arc::clone(&self.caps);
            let found = bounded_map(missing, self.options.concurrency, move |job| {
                let caps = Arc::clone(&caps);
                async move {
                    let (position, title, lo, hi, tagged) = job;
                    let index = caps.relocate_item(&title, &tagged).await?;
                    Ok((position, index.filter(|i| (lo..=hi).contains(i))))
                }
            })
            .await?;

            for (position, index) in found {
                items[position].physical_index = index;
            }
        }

        let before = items.len();
        items.retain(|item| {
            if item.physical_index.is_none() {
                warn!(title = %item.title, "no physical page found, dropping item");
                false
            } else {
                true
            }
        });
        Ok(before - items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::testing::{FakeCapabilities, LegalDocBuilder};

    #[test]
    fn test_mode_ignores_outlier() {
        assert_eq!(mode_offset(&[5, 5, 5, 6, 5]), Some(5));
        assert_eq!(mode_offset(&[2, 9, 9, 2, 3]), Some(2));
        assert_eq!(mode_offset(&[-1]), Some(-1));
        assert_eq!(mode_offset(&[]), None);
    }

    #[test]
    fn test_normalize_leaders() {
        assert_eq!(
            normalize_leaders("Article 4 Scope ........ 12"),
            "Article 4 Scope : 12"
        );
        assert_eq!(
            normalize_leaders("Annex I . . . . . . 40"),
            "Annex I : 40"
        );
        assert_eq!(normalize_leaders("Art. 3 ... 4"), "Art. 3 ... 4");
    }

    #[test]
    fn test_page_differences_skip_in_toc_matches() {
        let mut a = TocItem::new(Some("1"), "Article 1", 0);
        a.physical_index = None;
        a.page = Some(1);
        let mut b = a.clone();
        b.title = "Article 2".into();
        b.page = Some(4);
        let items = vec![a, b];

        let matches = vec![
            RawTocItem {
                title: "Article 1".into(),
                physical_index: Some(serde_json::json!("<physical_index_6>")),
                ..Default::default()
            },
            RawTocItem {
                title: "Article 2".into(),
                physical_index: Some(serde_json::json!(2)),
                ..Default::default()
            },
            RawTocItem {
                title: "Unknown".into(),
                physical_index: Some(serde_json::json!(8)),
                ..Default::default()
            },
        ];
        assert_eq!(page_differences(&items, &matches, 3), vec![5]);
    }

    #[tokio::test]
    async fn test_locator_stops_after_toc_run() {
        let doc = LegalDocBuilder::new(30)
            .with_toc_pages(2)
            .article(5, "Article 1 Subject matter")
            .article(12, "Article 2 Definitions")
            .build();
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), IndexConfig::default());

        let pages = indexer.locate_toc_pages(&doc).await.unwrap();
        assert_eq!(pages, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_locator_skips_batches_after_toc_run() {
        let doc = LegalDocBuilder::new(30)
            .with_toc_pages(2)
            .article(5, "Article 1 Subject matter")
            .article(12, "Article 2 Definitions")
            .build();
        let config = IndexConfig {
            concurrency: 2,
            ..IndexConfig::default()
        };
        let caps = FakeCapabilities::new();
        let indexer = TreeIndexer::from_capabilities(caps.clone(), config);

        let pages = indexer.locate_toc_pages(&doc).await.unwrap();
        assert_eq!(pages, vec![2, 3]);
        // Batches [1, 2] and [3, 4]; the remaining 16 window pages are never classified.
        assert_eq!(caps.toc_check_calls(), 4);
    }

    #[tokio::test]
    async fn test_locator_without_toc_checks_whole_window() {
        let doc = LegalDocBuilder::new(30)
            .article(5, "Article 1 Subject matter")
            .build();
        let caps = FakeCapabilities::new();
        let indexer = TreeIndexer::from_capabilities(caps.clone(), IndexConfig::default());

        assert!(indexer.locate_toc_pages(&doc).await.unwrap().is_empty());
        assert_eq!(caps.toc_check_calls(), 20);
    }

    #[tokio::test]
    async fn test_locator_extends_past_limit() {
        let doc = LegalDocBuilder::new(30)
            .with_toc_pages(6)
            .article(10, "Article 1 Subject matter")
            .build();
        let config = IndexConfig {
            toc_check_pages: 4,
            ..IndexConfig::default()
        };
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), config);

        let pages = indexer.locate_toc_pages(&doc).await.unwrap();
        assert_eq!(pages, vec![2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_resolver_applies_offset() {
        let doc = LegalDocBuilder::new(40)
            .with_toc_pages(1)
            .page_label_offset(4)
            .article(6, "Article 1 Subject matter")
            .article(11, "Article 2 Definitions")
            .article(20, "Article 3 Obligations")
            .build();
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), IndexConfig::default());

        let toc_pages = indexer.locate_toc_pages(&doc).await.unwrap();
        let toc = indexer.structure_toc(&doc, &toc_pages).await.unwrap();
        assert!(toc.has_page_numbers);
        assert_eq!(toc.items[1].page, Some(7));

        let mut items = toc.items;
        let offset = indexer
            .resolve_page_indices(&doc, &toc_pages, &mut items)
            .await
            .unwrap();
        assert_eq!(offset, Some(4));
        let indices: Vec<_> = items.iter().map(|i| i.physical_index).collect();
        assert_eq!(indices, vec![Some(6), Some(11), Some(20)]);
    }

    #[tokio::test]
    async fn test_toc_without_page_numbers_is_located_by_groups() {
        let doc = LegalDocBuilder::new(24)
            .with_toc_pages(1)
            .without_toc_page_numbers()
            .article(4, "Article 1 Subject matter")
            .article(15, "Article 2 Definitions")
            .build();
        let config = IndexConfig {
            max_tokens_per_group: 2_000,
            ..IndexConfig::default()
        };
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), config);

        let toc_pages = indexer.locate_toc_pages(&doc).await.unwrap();
        let toc = indexer.structure_toc(&doc, &toc_pages).await.unwrap();
        assert!(!toc.has_page_numbers);

        let mut items = toc.items;
        indexer
            .locate_without_page_numbers(&doc, &mut items)
            .await
            .unwrap();
        assert_eq!(items[0].physical_index, Some(4));
        assert_eq!(items[1].physical_index, Some(15));
    }

    #[tokio::test]
    async fn test_missing_indices_filled_between_neighbours() {
        let doc = LegalDocBuilder::new(20)
            .article(3, "Article 1 Subject matter")
            .article(8, "Article 2 Definitions")
            .article(14, "Article 3 Obligations")
            .build();
        let indexer = TreeIndexer::from_capabilities(FakeCapabilities::new(), IndexConfig::default());

        let mut items = vec![
            TocItem::new(Some("1"), "Article 1 Subject matter", 3),
            TocItem {
                physical_index: None,
                ..TocItem::new(Some("2"), "Article 2 Definitions", 0)
            },
            TocItem::new(Some("3"), "Article 3 Obligations", 14),
            TocItem {
                physical_index: None,
                ..TocItem::new(Some("4"), "Article 99 Nowhere", 0)
            },
        ];
        let dropped = indexer.fill_missing_indices(&doc, &mut items).await.unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].physical_index, Some(8));
    }
}
