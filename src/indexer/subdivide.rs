//! Split oversized nodes by running content generation over their pages.

use super::{IndexReport, TreeIndexer};
use crate::document::Document;
use crate::error::Result;
use crate::tree::{TreeNode, build_tree, enforce_monotonic};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl TreeIndexer {
    /// Does the node's own text exceed both the page and the token limit?
    pub(crate) fn is_oversized(&self, document: &Document, node: &TreeNode) -> bool {
        let (start, end) = node.own_range();
        let pages = end + 1 - start;
        pages > self.options.max_pages_per_node
            && document.tokens_in_range(start, end) > self.options.max_tokens_per_node
    }

    /// Subdivide every oversized node in the forest, depth first.
    pub(crate) async fn subdivide(
        &self,
        document: &Document,
        nodes: &mut [TreeNode],
        report: &mut IndexReport,
    ) -> Result<()> {
        for node in nodes.iter_mut() {
            self.subdivide_node(document, node, 0, report).await?;
        }
        Ok(())
    }

    fn subdivide_node<'a>(
        &'a self,
        document: &'a Document,
        node: &'a mut TreeNode,
        depth: usize,
        report: &'a mut IndexReport,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if depth < self.options.max_subdivision_depth && self.is_oversized(document, node) {
                let (start, end) = node.own_range();
                let mut children = self.split_range(document, &node.title, start, end, report).await?;
                if children.is_empty() {
                    debug!(title = %node.title, "subdivision found nothing new");
                } else {
                    info!(title = %node.title, start, end, children = children.len(), "subdivided node");
                    report.subdivided += 1;
                    if let Some(parent) = node.structure.as_deref() {
                        prefix_structure(&mut children, parent);
                    }
                    let existing = std::mem::take(&mut node.nodes);
                    node.nodes = children;
                    node.nodes.extend(existing);
                }
            }

            for child in node.nodes.iter_mut() {
                self.subdivide_node(document, child, depth + 1, report).await?;
            }
            Ok(())
        })
    }

    /// Build child nodes for `start..=end` of a node titled `title`.
    ///
    /// Returns nothing when the content yields no new sections or only one
    /// section covering the whole range.
    async fn split_range(
        &self,
        document: &Document,
        title: &str,
        start: usize,
        end: usize,
        report: &mut IndexReport,
    ) -> Result<Vec<TreeNode>> {
        let (mut items, _) = self.structure_from_content(document, start, end, report).await?;

        // The node's own heading opens its range; it is not a child.
        if items.first().is_some_and(|first| first.title.trim() == title.trim()) {
            items.remove(0);
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        self.check_start_flags(document, &mut items).await?;
        report.reordered += enforce_monotonic(&mut items);

        let children = build_tree(&items, start, end);
        let no_progress = children.len() == 1
            && children[0].start_index == start
            && children[0].end_index == end
            && children[0].nodes.is_empty();
        if no_progress {
            return Ok(Vec::new());
        }

        Ok(children)
    }
}

/// Nest generated paths under the parent's path ("1.2" under "3" is "3.1.2").
fn prefix_structure(nodes: &mut [TreeNode], parent: &str) {
    for node in nodes.iter_mut() {
        node.walk_mut(&mut |n| {
            n.structure = Some(match n.structure.take() {
                Some(path) => format!("{}.{}", parent, path),
                None => parent.to_string(),
            });
        });
    }
}
