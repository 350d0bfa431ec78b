//! Check that resolved items really start where they claim, and repair the
//! ones that don't.

use super::TreeIndexer;
use super::concurrency::bounded_map;
use crate::document::Document;
use crate::error::Result;
use crate::tree::TocItem;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a verification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    /// Fraction of checked items whose title was found on their page.
    pub accuracy: f64,
    pub checked: usize,
    /// Positions (in the item list) that failed the check.
    pub incorrect: Vec<usize>,
}

/// What to do with a verified structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Repair,
    /// Discard the TOC and derive the structure from the content.
    Reject,
}

impl Verification {
    /// Decide how to proceed. Only TOC-derived structures are ever rejected.
    pub fn verdict(&self, min_accuracy: f64, from_toc: bool) -> Verdict {
        if self.incorrect.is_empty() && self.accuracy >= 1.0 {
            Verdict::Accept
        } else if from_toc && self.accuracy < min_accuracy {
            Verdict::Reject
        } else if self.incorrect.is_empty() {
            Verdict::Accept
        } else {
            Verdict::Repair
        }
    }
}

/// Result of the repair rounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairOutcome {
    pub repaired: usize,
    /// Positions still unverified after the last round.
    pub unresolved: Vec<usize>,
}

/// Page window for re-locating the item at `position`.
///
/// Bounded by the physical indices of the nearest anchor items before and
/// after it, or by `first`/`last` when there is none on that side.
pub fn search_window(
    items: &[TocItem],
    position: usize,
    is_anchor: impl Fn(usize) -> bool,
    first: usize,
    last: usize,
) -> (usize, usize) {
    let lo = (0..position)
        .rev()
        .filter(|&j| is_anchor(j))
        .find_map(|j| items[j].physical_index)
        .unwrap_or(first);
    let hi = (position + 1..items.len())
        .filter(|&j| is_anchor(j))
        .find_map(|j| items[j].physical_index)
        .unwrap_or(last);

    let (lo, hi) = (lo.min(hi), lo.max(hi));
    (lo.clamp(first, last), hi.clamp(first, last))
}

/// Evenly spaced subsample of `positions`, keeping order.
fn sample_positions(positions: Vec<usize>, sample: Option<usize>) -> Vec<usize> {
    match sample {
        Some(n) if n > 0 && n < positions.len() => {
            let step = positions.len() as f64 / n as f64;
            (0..n)
                .map(|k| positions[(k as f64 * step) as usize])
                .collect()
        }
        _ => positions,
    }
}

impl TreeIndexer {
    /// Check each item's title against the page it points at.
    ///
    /// With `require_coverage` (TOC path) the structure must reach the second
    /// half of the document, otherwise accuracy is zero: a TOC that stops
    /// early is more likely a partial list than the document's outline.
    pub(crate) async fn verify_items(
        &self,
        document: &Document,
        items: &[TocItem],
        require_coverage: bool,
    ) -> Result<Verification> {
        let placed: Vec<usize> = (0..items.len())
            .filter(|&i| items[i].physical_index.is_some())
            .collect();

        if require_coverage {
            let last = items.iter().filter_map(|i| i.physical_index).max();
            if last.is_none_or(|last| last * 2 < document.page_count()) {
                warn!(?last, pages = document.page_count(), "structure stops in the first half");
                return Ok(Verification {
                    accuracy: 0.0,
                    checked: 0,
                    incorrect: placed,
                });
            }
        }

        let checked = sample_positions(placed, self.options.verify_sample);
        if checked.is_empty() {
            return Ok(Verification {
                accuracy: 0.0,
                checked: 0,
                incorrect: Vec::new(),
            });
        }

        let jobs: Vec<(usize, String, String)> = checked
            .iter()
            .filter_map(|&i| {
                let page = document.get_page(items[i].physical_index?)?;
                Some((i, items[i].title.clone(), page.content.clone()))
            })
            .collect();
        let total = checked.len();

        let caps = Arc::clone(&self.caps);
        let verdicts = bounded_map(jobs, self.options.concurrency, move |(i, title, text)| {
            let caps = Arc::clone(&caps);
            async move { Ok((i, caps.title_on_page(&title, &text).await?)) }
        })
        .await?;

        let confirmed: HashSet<usize> = verdicts
            .iter()
            .filter(|(_, ok)| *ok)
            .map(|(i, _)| *i)
            .collect();
        let incorrect: Vec<usize> = checked
            .into_iter()
            .filter(|i| !confirmed.contains(i))
            .collect();
        let accuracy = confirmed.len() as f64 / total as f64;

        debug!(accuracy, checked = total, incorrect = incorrect.len(), "verified items");
        Ok(Verification {
            accuracy,
            checked: total,
            incorrect,
        })
    }

    /// Re-locate incorrect items between their verified neighbours.
    ///
    /// Windows never leave `bounds`, the page range the items were derived
    /// from. Each round relocates every still-incorrect item concurrently,
    /// then re-verifies the answers. An answer outside the item's window is
    /// discarded. Items that never verify keep their last placement.
    pub(crate) async fn repair_items(
        &self,
        document: &Document,
        items: &mut [TocItem],
        incorrect: Vec<usize>,
        bounds: (usize, usize),
    ) -> Result<RepairOutcome> {
        let mut pending = incorrect;
        let mut repaired = 0;
        let (first_page, last_page) = bounds;

        for round in 1..=self.options.max_repair_rounds {
            if pending.is_empty() {
                break;
            }

            let pending_set: HashSet<usize> = pending.iter().copied().collect();
            let jobs: Vec<RelocateJob> = pending
                .iter()
                .map(|&position| {
                    let (lo, hi) = search_window(
                        items,
                        position,
                        |j| !pending_set.contains(&j) && items[j].physical_index.is_some(),
                        first_page,
                        last_page,
                    );
                    RelocateJob {
                        position,
                        title: items[position].title.clone(),
                        lo,
                        hi,
                        tagged: document.content_range(lo, hi),
                        pages: document
                            .pages_in_range(lo, hi)
                            .iter()
                            .map(|p| (p.number, p.content.clone()))
                            .collect(),
                    }
                })
                .collect();

            let caps = Arc::clone(&self.caps);
            let answers = bounded_map(jobs, self.options.concurrency, move |job| {
                let caps = Arc::clone(&caps);
                async move { job.run(caps.as_ref()).await }
            })
            .await?;

            let mut still = Vec::new();
            for (position, index, verified) in answers {
                if let Some(index) = index {
                    items[position].physical_index = Some(index);
                }
                if verified {
                    repaired += 1;
                } else {
                    still.push(position);
                }
            }

            info!(round, fixed = pending.len() - still.len(), remaining = still.len(), "repair round");
            pending = still;
        }

        for &position in &pending {
            warn!(title = %items[position].title, "could not verify item placement");
        }

        Ok(RepairOutcome {
            repaired,
            unresolved: pending,
        })
    }

    /// Record whether each item's title opens its page.
    pub(crate) async fn check_start_flags(
        &self,
        document: &Document,
        items: &mut [TocItem],
    ) -> Result<()> {
        let jobs: Vec<(usize, String, String)> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let page = document.get_page(item.physical_index?)?;
                Some((i, item.title.clone(), page.content.clone()))
            })
            .collect();

        let caps = Arc::clone(&self.caps);
        let flags = bounded_map(jobs, self.options.concurrency, move |(i, title, text)| {
            let caps = Arc::clone(&caps);
            async move { Ok((i, caps.title_starts_page(&title, &text).await?)) }
        })
        .await?;

        for (i, starts) in flags {
            items[i].appear_start = starts;
        }
        Ok(())
    }
}

struct RelocateJob {
    position: usize,
    title: String,
    lo: usize,
    hi: usize,
    tagged: String,
    pages: Vec<(usize, String)>,
}

impl RelocateJob {
    /// Relocate, then verify the answer. Returns (position, placement, verified).
    async fn run(
        self,
        caps: &dyn crate::llm::Capabilities,
    ) -> Result<(usize, Option<usize>, bool)> {
        let answer = caps.relocate_item(&self.title, &self.tagged).await?;
        let Some(index) = answer.filter(|i| (self.lo..=self.hi).contains(i)) else {
            debug!(title = %self.title, ?answer, lo = self.lo, hi = self.hi, "relocation outside window");
            return Ok((self.position, None, false));
        };

        let text = self
            .pages
            .iter()
            .find(|(number, _)| *number == index)
            .map(|(_, text)| text.as_str())
            .unwrap_or_default();
        let verified = caps.title_on_page(&self.title, text).await?;
        Ok((self.position, Some(index), verified))
    }
}
