//! Document representation for the indexer.
//!
//! Documents are an ordered list of pages numbered from 1. Page numbers are
//! *physical* indices: the position of the page in the extracted sequence,
//! which is what every tree range refers to. Text sent to the model wraps each
//! page in `<physical_index_X>` tags so that answers can point back at pages.

use crate::error::{PageIndexError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Form feed, the page separator emitted by most PDF-to-text tools.
pub const DEFAULT_PAGE_DELIMITER: &str = "\u{000C}";

static PHYSICAL_INDEX_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<physical_index_(\d+)>").expect("static regex")
});

/// A single page in a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed page number.
    pub number: usize,
    /// Text content of the page.
    pub content: String,
    /// Approximate token count (words / 0.75).
    pub token_count: usize,
}

impl Page {
    /// Create a new page.
    pub fn new(number: usize, content: String) -> Self {
        let token_count = estimate_tokens(&content);
        Self {
            number,
            content,
            token_count,
        }
    }

    /// Create a page with a token count computed by the extractor.
    pub fn with_token_count(number: usize, content: String, token_count: usize) -> Self {
        Self {
            number,
            content,
            token_count,
        }
    }

    /// Format page content with physical index tags for LLM processing.
    pub fn with_index_tags(&self) -> String {
        format!(
            "<physical_index_{}>\n{}\n<physical_index_{}>\n\n",
            self.number, self.content, self.number
        )
    }
}

/// A document consisting of one or more pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document name/title.
    pub name: String,
    /// Original file path (if loaded from file).
    pub path: Option<PathBuf>,
    /// Pages in the document.
    pub pages: Vec<Page>,
}

impl Document {
    /// Create a new document with given name and pages.
    pub fn new(name: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            name: name.into(),
            path: None,
            pages,
        }
    }

    /// Create a document from extracted pages, rejecting unusable input.
    ///
    /// Pages must be numbered 1, 2, 3, ... in order and at least one of them
    /// must contain text.
    pub fn from_pages(name: impl Into<String>, pages: Vec<Page>) -> Result<Self> {
        let document = Self::new(name, pages);
        document.ensure_extracted()?;
        Ok(document)
    }

    /// Load a text file as a single-page document.
    pub fn from_text_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PageIndexError::io(path, e))?;

        let pages = vec![Page::new(1, content)];

        let document = Self {
            name: file_name(path),
            path: Some(path.to_path_buf()),
            pages,
        };
        document.ensure_extracted()?;
        Ok(document)
    }

    /// Load a text file with custom page delimiter.
    ///
    /// Splits content on the delimiter and treats each part as a page. Blank
    /// parts are skipped and the remaining pages are numbered consecutively.
    pub fn from_text_file_with_delimiter(path: &Path, delimiter: &str) -> Result<Self> {
        if !path.exists() {
            return Err(PageIndexError::DocumentNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| PageIndexError::io(path, e))?;

        let mut document = Self::from_text_with_delimiter(file_name(path), &content, delimiter)?;
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Split raw text into pages on a delimiter.
    pub fn from_text_with_delimiter(
        name: impl Into<String>,
        content: &str,
        delimiter: &str,
    ) -> Result<Self> {
        let pages: Vec<Page> = content
            .split(delimiter)
            .filter(|s| !s.trim().is_empty())
            .enumerate()
            .map(|(i, s)| Page::new(i + 1, s.to_string()))
            .collect();

        Self::from_pages(name, pages)
    }

    /// Create a document from raw text content.
    pub fn from_text(name: impl Into<String>, content: String) -> Self {
        let pages = vec![Page::new(1, content)];
        Self {
            name: name.into(),
            path: None,
            pages,
        }
    }

    /// Check that the document can be indexed at all.
    pub fn ensure_extracted(&self) -> Result<()> {
        if self.pages.is_empty() {
            return Err(PageIndexError::extraction(&self.name, "document has no pages"));
        }
        if self.pages.iter().all(|p| p.content.trim().is_empty()) {
            return Err(PageIndexError::extraction(&self.name, "every page is empty"));
        }
        for (i, page) in self.pages.iter().enumerate() {
            if page.number != i + 1 {
                return Err(PageIndexError::extraction(
                    &self.name,
                    format!("expected page {} at position {}, found {}", i + 1, i, page.number),
                ));
            }
        }
        Ok(())
    }

    /// Get total number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Get total token count across all pages.
    pub fn total_tokens(&self) -> usize {
        self.pages.iter().map(|p| p.token_count).sum()
    }

    /// Get a specific page by number (1-indexed).
    pub fn get_page(&self, number: usize) -> Option<&Page> {
        if number == 0 || number > self.pages.len() {
            None
        } else {
            Some(&self.pages[number - 1])
        }
    }

    /// Pages within a range (1-indexed, inclusive), clamped to the document.
    pub fn pages_in_range(&self, start: usize, end: usize) -> &[Page] {
        let start = start.max(1);
        let end = end.min(self.pages.len());
        if start > end {
            return &[];
        }
        &self.pages[start - 1..end]
    }

    /// Get all page content concatenated with index tags.
    pub fn content_with_tags(&self) -> String {
        tag_pages(&self.pages)
    }

    /// Get content for a range of pages (1-indexed, inclusive).
    pub fn content_range(&self, start: usize, end: usize) -> String {
        tag_pages(self.pages_in_range(start, end))
    }

    /// Raw text of a page range without tags.
    pub fn text_range(&self, start: usize, end: usize) -> String {
        self.pages_in_range(start, end)
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Token count of a page range.
    pub fn tokens_in_range(&self, start: usize, end: usize) -> usize {
        self.pages_in_range(start, end)
            .iter()
            .map(|p| p.token_count)
            .sum()
    }

    /// Get raw content without index tags.
    pub fn raw_content(&self) -> String {
        self.text_range(1, self.page_count())
    }
}

fn file_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// Concatenate pages with their index tags.
pub fn tag_pages(pages: &[Page]) -> String {
    pages.iter().map(Page::with_index_tags).collect()
}

/// Parse a page reference returned by the model.
///
/// Accepts `<physical_index_12>`, `physical_index_12`, or a bare `12`.
pub fn parse_physical_index(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    if let Some(caps) = PHYSICAL_INDEX_TAG.captures(raw) {
        return caps[1].parse().ok();
    }
    raw.trim_start_matches('<')
        .trim_end_matches('>')
        .trim_start_matches("physical_index_")
        .trim()
        .parse()
        .ok()
}

/// Split pages into token-bounded groups for the structure generator.
///
/// Groups aim at the midpoint between the even split and `max_tokens`, so the
/// last group is not left with a tiny remainder. Each group after the first
/// starts with the last `overlap` pages of the previous one, keeping sections
/// that straddle a boundary visible in both.
pub fn group_pages(pages: &[Page], max_tokens: usize, overlap: usize) -> Vec<&[Page]> {
    if pages.is_empty() {
        return Vec::new();
    }

    let total: usize = pages.iter().map(|p| p.token_count).sum();
    let max_tokens = max_tokens.max(1);
    if total <= max_tokens {
        return vec![pages];
    }

    let expected_parts = total.div_ceil(max_tokens);
    let target = (total / expected_parts + max_tokens).div_ceil(2);

    let mut groups = Vec::new();
    let mut group_start = 0;
    let mut tokens = 0;

    for (i, page) in pages.iter().enumerate() {
        if tokens + page.token_count > target && i > group_start {
            groups.push(&pages[group_start..i]);
            group_start = i.saturating_sub(overlap).max(group_start + 1);
            tokens = pages[group_start..i].iter().map(|p| p.token_count).sum();
        }
        tokens += page.token_count;
    }
    groups.push(&pages[group_start..]);

    groups
}

/// Estimate token count from text (rough approximation: words / 0.75).
pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f64 / 0.75) as usize
}
