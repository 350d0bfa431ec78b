//! Final pass over a built tree: ids, text, summaries, description.

use super::TreeIndexer;
use super::concurrency::bounded_map;
use crate::document::{Document, estimate_tokens};
use crate::error::{PageIndexError, Result};
use crate::tree::{OutlineNode, TreeNode, assign_node_ids};
use std::sync::Arc;
use tracing::debug;

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

impl TreeIndexer {
    /// Attach ids, text, summaries and (optionally) a document description.
    ///
    /// Returns the description when one was requested.
    pub(crate) async fn finalize(
        &self,
        document: &Document,
        nodes: &mut [TreeNode],
    ) -> Result<Option<String>> {
        let opts = &self.options;

        if opts.add_node_id {
            assign_node_ids(nodes);
        }

        if opts.add_node_text || opts.add_node_summary {
            for node in nodes.iter_mut() {
                node.walk_mut(&mut |n| {
                    let (start, end) = n.own_range();
                    n.text = Some(document.text_range(start, end));
                });
            }
        }

        if opts.add_node_summary {
            self.summarize(nodes).await?;
        }

        let description = if opts.add_doc_description {
            let outline: Vec<OutlineNode> = nodes.iter().map(OutlineNode::from).collect();
            let outline = serde_json::to_string_pretty(&outline)
                .map_err(|e| PageIndexError::Serialization(e.to_string()))?;
            Some(self.caps.describe_document(&outline).await?)
        } else {
            None
        };

        let strip_all = !opts.add_node_text;
        let strip_summarized = opts.strip_text_with_summary;
        for node in nodes.iter_mut() {
            node.walk_mut(&mut |n| {
                if strip_all || (strip_summarized && n.summary.is_some()) {
                    n.text = None;
                }
            });
        }

        Ok(description)
    }

    /// Summarize every node; short texts are their own summary.
    async fn summarize(&self, nodes: &mut [TreeNode]) -> Result<()> {
        let threshold = self.options.summary_token_threshold;
        let limit = self.options.summary_char_limit;

        let mut jobs: Vec<(usize, String, String)> = Vec::new();
        let mut summaries: Vec<Option<String>> = Vec::new();
        for node in nodes.iter() {
            node.walk(&mut |n| {
                let text = n.text.as_deref().unwrap_or_default();
                if estimate_tokens(text) < threshold {
                    summaries.push(Some(text.to_string()));
                } else {
                    jobs.push((summaries.len(), n.title.clone(), truncate_chars(text, limit)));
                    summaries.push(None);
                }
            });
        }
        debug!(nodes = summaries.len(), calls = jobs.len(), "summarizing nodes");

        let caps = Arc::clone(&self.caps);
        let generated = bounded_map(jobs, self.options.concurrency, move |(slot, title, text)| {
            let caps = Arc::clone(&caps);
            async move { Ok((slot, caps.summarize_node(&title, &text).await?)) }
        })
        .await?;
        for (slot, summary) in generated {
            summaries[slot] = Some(summary);
        }

        let mut slots = summaries.into_iter();
        for node in nodes.iter_mut() {
            node.walk_mut(&mut |n| n.summary = slots.next().flatten());
        }
        Ok(())
    }
}
