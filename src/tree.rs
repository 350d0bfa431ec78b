//! Tree structure for hierarchical document indexing.
//!
//! A flat, ordered list of [`TocItem`]s (each with a dot-separated structure
//! path and a physical start page) is turned into nested [`TreeNode`]s. The
//! builder works on an index arena in two passes: ranges are assigned on the
//! flat list first, then each item is linked to the nearest ancestor path
//! that is still open in list order. Nested nodes are only materialized at
//! the end.

use crate::document::parse_physical_index;
use crate::error::{PageIndexError, Result};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Title of the synthetic node covering pages before the first section.
pub const PREFACE_TITLE: &str = "Preface";

/// A node in the document tree structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TreeNode {
    /// Zero-padded pre-order id ("0000", "0001", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Hierarchical structure index (e.g., "1", "1.1", "1.2.3").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<String>,

    /// Section title.
    pub title: String,

    /// Starting page index (1-indexed).
    pub start_index: usize,

    /// Ending page index (1-indexed, inclusive).
    pub end_index: usize,

    /// Optional summary of the section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Raw text of the node's own pages (see [`TreeNode::own_range`]).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Child nodes (subsections).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<TreeNode>,
}

impl TreeNode {
    /// Create a new tree node.
    pub fn new(title: impl Into<String>, start_index: usize, end_index: usize) -> Self {
        Self {
            node_id: None,
            structure: None,
            title: title.into(),
            start_index,
            end_index,
            summary: None,
            text: None,
            nodes: Vec::new(),
        }
    }

    /// Set the structure index.
    pub fn with_structure(mut self, structure: impl Into<String>) -> Self {
        self.structure = Some(structure.into());
        self
    }

    /// Add a child node.
    pub fn add_child(&mut self, child: TreeNode) {
        self.nodes.push(child);
    }

    /// Check if this node has children.
    pub fn has_children(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Get the page span (number of pages covered).
    pub fn page_span(&self) -> usize {
        if self.end_index >= self.start_index {
            self.end_index - self.start_index + 1
        } else {
            0
        }
    }

    /// Pages holding the node's own text, before its first child.
    ///
    /// Leaves own their whole range. A parent owns the pages up to just
    /// before its first child, or its first page when the child starts there.
    pub fn own_range(&self) -> (usize, usize) {
        match self.nodes.first() {
            Some(first) => {
                let end = first
                    .start_index
                    .saturating_sub(1)
                    .max(self.start_index)
                    .min(self.end_index);
                (self.start_index, end)
            }
            None => (self.start_index, self.end_index),
        }
    }

    /// Recursively count all nodes in this subtree (including self).
    pub fn node_count(&self) -> usize {
        1 + self.nodes.iter().map(|n| n.node_count()).sum::<usize>()
    }

    /// Find all leaf nodes (nodes without children).
    pub fn leaves(&self) -> Vec<&TreeNode> {
        if self.nodes.is_empty() {
            vec![self]
        } else {
            self.nodes.iter().flat_map(|n| n.leaves()).collect()
        }
    }

    /// Find a node by title (case-insensitive).
    pub fn find_by_title(&self, title: &str) -> Option<&TreeNode> {
        let title_lower = title.to_lowercase();
        if self.title.to_lowercase() == title_lower {
            return Some(self);
        }
        for child in &self.nodes {
            if let Some(found) = child.find_by_title(title) {
                return Some(found);
            }
        }
        None
    }

    /// Visit this node and its descendants in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TreeNode)) {
        visit(self);
        for child in &self.nodes {
            child.walk(visit);
        }
    }

    /// Mutable pre-order visit.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut TreeNode)) {
        visit(self);
        for child in &mut self.nodes {
            child.walk_mut(visit);
        }
    }

    /// Format the tree as a string for display.
    pub fn format_tree(&self, indent: usize) -> String {
        let prefix = "  ".repeat(indent);
        let structure_str = self
            .structure
            .as_ref()
            .map(|s| format!("{} ", s))
            .unwrap_or_default();
        let id_str = self
            .node_id
            .as_ref()
            .map(|id| format!("[{}] ", id))
            .unwrap_or_default();

        let mut result = format!(
            "{}{}{}{} [pages {}-{}]\n",
            prefix, id_str, structure_str, self.title, self.start_index, self.end_index
        );

        for child in &self.nodes {
            result.push_str(&child.format_tree(indent + 1));
        }

        result
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if self.start_index == 0 || self.start_index > self.end_index {
            errors.push(format!(
                "'{}' has invalid range {}-{}",
                self.title, self.start_index, self.end_index
            ));
        }
        for child in &self.nodes {
            if child.start_index < self.start_index || child.end_index > self.end_index {
                errors.push(format!(
                    "'{}' ({}-{}) is outside parent '{}' ({}-{})",
                    child.title,
                    child.start_index,
                    child.end_index,
                    self.title,
                    self.start_index,
                    self.end_index
                ));
            }
            child.validate(errors);
        }
        validate_siblings(&self.nodes, errors);
    }
}

fn validate_siblings(nodes: &[TreeNode], errors: &mut Vec<String>) {
    // Adjoining sections may share their boundary page, nothing more.
    for pair in nodes.windows(2) {
        if pair[1].start_index < pair[0].end_index {
            errors.push(format!(
                "'{}' ({}-{}) overlaps '{}' ({}-{})",
                pair[0].title,
                pair[0].start_index,
                pair[0].end_index,
                pair[1].title,
                pair[1].start_index,
                pair[1].end_index
            ));
        }
    }
}

/// A complete document tree (wrapper around root nodes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct DocumentTree {
    /// Document name.
    pub name: String,

    /// Optional document description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Total page count.
    pub total_pages: usize,

    /// Root-level nodes.
    pub nodes: Vec<TreeNode>,
}

/// Node shape sent to the model during retrieval: no raw text.
#[derive(Debug, Clone, Serialize)]
pub struct OutlineNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub title: String,
    pub start_index: usize,
    pub end_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<OutlineNode>,
}

impl From<&TreeNode> for OutlineNode {
    fn from(node: &TreeNode) -> Self {
        Self {
            node_id: node.node_id.clone(),
            title: node.title.clone(),
            start_index: node.start_index,
            end_index: node.end_index,
            summary: node.summary.clone(),
            nodes: node.nodes.iter().map(OutlineNode::from).collect(),
        }
    }
}

impl DocumentTree {
    /// Create a new document tree.
    pub fn new(name: impl Into<String>, nodes: Vec<TreeNode>, total_pages: usize) -> Self {
        Self {
            name: name.into(),
            description: None,
            total_pages,
            nodes,
        }
    }

    /// Get total node count.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().map(|n| n.node_count()).sum()
    }

    /// Get maximum depth of the tree.
    pub fn max_depth(&self) -> usize {
        fn depth(node: &TreeNode) -> usize {
            if node.nodes.is_empty() {
                1
            } else {
                1 + node.nodes.iter().map(depth).max().unwrap_or(0)
            }
        }

        self.nodes.iter().map(depth).max().unwrap_or(0)
    }

    /// All nodes in pre-order.
    pub fn preorder(&self) -> Vec<&TreeNode> {
        let mut out = Vec::with_capacity(self.node_count());
        for node in &self.nodes {
            node.walk(&mut |n| out.push(n));
        }
        out
    }

    /// Find a node by title.
    pub fn find_by_title(&self, title: &str) -> Option<&TreeNode> {
        for node in &self.nodes {
            if let Some(found) = node.find_by_title(title) {
                return Some(found);
            }
        }
        None
    }

    /// Find a node by id.
    pub fn find_by_id(&self, node_id: &str) -> Option<&TreeNode> {
        self.path_to(node_id).and_then(|path| path.last().copied())
    }

    /// Ancestors of a node, root first, ending with the node itself.
    pub fn path_to(&self, node_id: &str) -> Option<Vec<&TreeNode>> {
        fn search<'a>(node: &'a TreeNode, id: &str, trail: &mut Vec<&'a TreeNode>) -> bool {
            trail.push(node);
            if node.node_id.as_deref() == Some(id) {
                return true;
            }
            for child in &node.nodes {
                if search(child, id, trail) {
                    return true;
                }
            }
            trail.pop();
            false
        }

        let mut trail = Vec::new();
        for node in &self.nodes {
            if search(node, node_id, &mut trail) {
                return Some(trail);
            }
        }
        None
    }

    /// The tree without raw text, for prompts.
    pub fn outline(&self) -> Vec<OutlineNode> {
        self.nodes.iter().map(OutlineNode::from).collect()
    }

    /// Check the structural invariants of the tree.
    ///
    /// Every range is well formed and nested in its parent, siblings are
    /// ordered and share at most a boundary page, and node ids (when
    /// assigned) strictly increase in pre-order.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for node in &self.nodes {
            if node.end_index > self.total_pages {
                errors.push(format!(
                    "'{}' ends at page {} past the last page {}",
                    node.title, node.end_index, self.total_pages
                ));
            }
            node.validate(&mut errors);
        }
        validate_siblings(&self.nodes, &mut errors);

        let ids: Vec<Option<&str>> = self
            .preorder()
            .iter()
            .map(|n| n.node_id.as_deref())
            .collect();
        if ids.iter().any(Option::is_some) {
            let mut previous: Option<u64> = None;
            for id in ids {
                match id.and_then(|s| s.parse::<u64>().ok()) {
                    Some(value) => {
                        if previous.is_some_and(|p| value <= p) {
                            errors.push(format!("node id {:04} is not increasing", value));
                        }
                        previous = Some(value);
                    }
                    None => errors.push(format!("missing or non-numeric node id {:?}", id)),
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PageIndexError::TreeError(errors.join("; ")))
        }
    }

    /// Format the entire tree for display.
    pub fn format(&self) -> String {
        let mut result = format!(
            "Document: {} ({} pages, {} sections)\n",
            self.name,
            self.total_pages,
            self.node_count()
        );
        result.push_str(&"─".repeat(50));
        result.push('\n');

        for node in &self.nodes {
            result.push_str(&node.format_tree(0));
        }

        result
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON string.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Raw TOC item from LLM response (before tree construction).
///
/// Models are loose about types: structure may come back as a number, page
/// numbers as strings, physical indices as `<physical_index_X>` tags. Values
/// are kept as JSON and coerced by the accessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTocItem {
    /// Section structure index (e.g., "1.2.3").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<serde_json::Value>,

    /// Section title.
    #[serde(default)]
    pub title: String,

    /// Page number printed in the table of contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<serde_json::Value>,

    /// Physical page index (may be string like "<physical_index_5>" or integer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_index: Option<serde_json::Value>,

    /// "yes" when a locator found the section starting in the given pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

impl RawTocItem {
    /// Item carrying only a structure path and a title.
    pub fn titled(structure: Option<&str>, title: impl Into<String>) -> Self {
        Self {
            structure: structure.map(|s| serde_json::Value::String(s.to_string())),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Structure path as a string.
    pub fn structure_path(&self) -> Option<String> {
        match &self.structure {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                Some(s.trim().to_string())
            }
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Nominal page number, coerced to an integer.
    pub fn page_number(&self) -> Option<usize> {
        self.page.as_ref().and_then(value_to_index)
    }

    /// Extract the page number from physical_index field.
    pub fn get_page_number(&self) -> Option<usize> {
        self.physical_index.as_ref().and_then(value_to_index)
    }

    /// Whether a locator reported that the section starts in the pages shown.
    pub fn starts_here(&self) -> bool {
        self.start
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("yes"))
    }
}

fn value_to_index(value: &serde_json::Value) -> Option<usize> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        serde_json::Value::String(s) => parse_physical_index(s),
        _ => None,
    }
}

/// A section entry while the structure is being resolved and verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocItem {
    pub structure: Option<String>,
    pub title: String,
    /// Page number printed in the table of contents.
    pub page: Option<usize>,
    /// Position of the section's first page in the extracted page sequence.
    pub physical_index: Option<usize>,
    /// The title is the first thing on its page.
    pub appear_start: bool,
}

impl TocItem {
    pub fn new(structure: Option<&str>, title: impl Into<String>, physical_index: usize) -> Self {
        Self {
            structure: structure.map(str::to_string),
            title: title.into(),
            page: None,
            physical_index: Some(physical_index),
            appear_start: false,
        }
    }
}

impl From<&RawTocItem> for TocItem {
    fn from(raw: &RawTocItem) -> Self {
        Self {
            structure: raw.structure_path(),
            title: raw.title.trim().to_string(),
            page: raw.page_number(),
            physical_index: raw.get_page_number(),
            appear_start: false,
        }
    }
}

/// Make start pages non-decreasing in list order.
///
/// Returns how many items were moved forward.
pub fn enforce_monotonic(items: &mut [TocItem]) -> usize {
    let mut moved = 0;
    let mut floor = 0;
    for item in items.iter_mut() {
        if let Some(index) = item.physical_index {
            if index < floor {
                item.physical_index = Some(floor);
                moved += 1;
            } else {
                floor = index;
            }
        }
    }
    moved
}

/// Prepend a preface item when the first section starts after `first_page`.
pub fn add_preface_if_needed(items: &mut Vec<TocItem>, first_page: usize) {
    let Some(first_index) = items.first().and_then(|i| i.physical_index) else {
        return;
    };
    if first_index > first_page {
        items.insert(
            0,
            TocItem {
                structure: Some("0".to_string()),
                title: PREFACE_TITLE.to_string(),
                page: None,
                physical_index: Some(first_page),
                appear_start: true,
            },
        );
    }
}

/// `ancestor` is a proper prefix of `path` on segment boundaries.
fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

/// Build a tree structure from flat, resolved items.
///
/// Items without a physical index are skipped. Ranges are computed on the
/// flat list (an item ends where the next begins, one page earlier if the
/// next starts at the top of its page) and clamped to `first_page..=last_page`.
pub fn build_tree(items: &[TocItem], first_page: usize, last_page: usize) -> Vec<TreeNode> {
    let placed: Vec<(&TocItem, usize)> = items
        .iter()
        .filter_map(|item| item.physical_index.map(|index| (item, index)))
        .collect();

    // Pass 1: ranges on the flat list.
    let mut arena: Vec<Option<TreeNode>> = Vec::with_capacity(placed.len());
    for (i, (item, index)) in placed.iter().enumerate() {
        let start = (*index).clamp(first_page, last_page);
        let end = match placed.get(i + 1) {
            Some((next, next_index)) if next.appear_start => next_index.saturating_sub(1),
            Some((_, next_index)) => *next_index,
            None => last_page,
        }
        .clamp(start, last_page);

        let mut node = TreeNode::new(&item.title, start, end);
        node.structure = item.structure.clone();
        arena.push(Some(node));
    }

    // Pass 2: link children to the nearest ancestor that is still open.
    // An item closes every open path that is not one of its ancestors, so a
    // late "1.1" after "2" can no longer reach back into "1".
    let mut open: Vec<(&str, usize)> = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); placed.len()];
    let mut roots = Vec::new();
    for (i, (item, _)) in placed.iter().enumerate() {
        let Some(path) = item.structure.as_deref() else {
            open.clear();
            roots.push(i);
            continue;
        };
        while let Some(&(top, _)) = open.last() {
            if is_ancestor(top, path) {
                break;
            }
            open.pop();
        }
        match open.last() {
            Some(&(_, parent)) => children[parent].push(i),
            None => roots.push(i),
        }
        open.push((path, i));
    }

    fn assemble(idx: usize, arena: &mut [Option<TreeNode>], children: &[Vec<usize>]) -> TreeNode {
        let mut node = arena[idx].take().unwrap_or_else(|| TreeNode::new("", 0, 0));
        for &child in &children[idx] {
            node.nodes.push(assemble(child, arena, children));
        }
        node
    }

    let mut nodes: Vec<TreeNode> = roots
        .into_iter()
        .map(|idx| assemble(idx, &mut arena, &children))
        .collect();

    for node in &mut nodes {
        fix_end_indices(node);
    }

    nodes
}

/// Fix end indices so parent nodes span their children.
fn fix_end_indices(node: &mut TreeNode) {
    for child in &mut node.nodes {
        fix_end_indices(child);
    }

    if let Some(max_end) = node.nodes.iter().map(|n| n.end_index).max() {
        if max_end > node.end_index {
            node.end_index = max_end;
        }
    }
}

/// Assign zero-padded ids in pre-order.
pub fn assign_node_ids(nodes: &mut [TreeNode]) {
    let mut next = 0usize;
    for node in nodes.iter_mut() {
        node.walk_mut(&mut |n| {
            n.node_id = Some(format!("{:04}", next));
            next += 1;
        });
    }
}
