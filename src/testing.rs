//! Test doubles: a deterministic capability backend and a builder for
//! synthetic legal documents.
//!
//! The fake "reads" pages literally: a heading is a line starting with
//! `Chapter ` or `Article `, a table of contents is a page whose first line
//! is `Contents`, and a title is on a page when one of its lines equals it.

use crate::document::{Document, Page};
use crate::error::{PageIndexError, Result};
use crate::llm::{Capabilities, NodeSelection};
use crate::search::Confidence;
use crate::tree::RawTocItem;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

static TAGGED_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<physical_index_(\d+)>\n(.*?)\n<physical_index_\d+>").expect("static regex")
});
static PAGE_NUMBER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*:\s*(\d+)\s*$").expect("static regex"));

const TOC_HEADER: &str = "Contents";

fn is_toc_text(text: &str) -> bool {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| l.trim().starts_with(TOC_HEADER))
}

fn body_lines(text: &str) -> Vec<&str> {
    if is_toc_text(text) {
        return Vec::new();
    }
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

fn is_heading(line: &str) -> bool {
    line.starts_with("Chapter ") || line.starts_with("Article ")
}

fn has_line(text: &str, title: &str) -> bool {
    body_lines(text).contains(&title.trim())
}

fn untag(tagged: &str) -> Vec<(usize, String)> {
    TAGGED_PAGE
        .captures_iter(tagged)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect()
}

fn find_page(tagged: &str, title: &str) -> Option<usize> {
    untag(tagged)
        .into_iter()
        .find(|(_, text)| has_line(text, title))
        .map(|(n, _)| n)
}

/// Numbers headings: chapters at the top level, articles inside the
/// current chapter (or top level before any chapter).
#[derive(Default)]
struct Numberer {
    top: usize,
    chapter: Option<usize>,
    article: usize,
}

impl Numberer {
    fn next(&mut self, title: &str) -> String {
        if title.starts_with("Article ") {
            if let Some(chapter) = self.chapter {
                self.article += 1;
                return format!("{}.{}", chapter, self.article);
            }
        }
        self.top += 1;
        if title.starts_with("Chapter ") {
            self.chapter = Some(self.top);
            self.article = 0;
        }
        self.top.to_string()
    }
}

#[derive(Default)]
struct Counters {
    toc_check: AtomicUsize,
    verify: AtomicUsize,
    relocate: AtomicUsize,
    generate: AtomicUsize,
    summarize: AtomicUsize,
    select: AtomicUsize,
}

/// Deterministic [`Capabilities`] for tests.
#[derive(Clone, Default)]
pub struct FakeCapabilities {
    counters: Arc<Counters>,
    selection: Arc<Mutex<Option<NodeSelection>>>,
    fail_selection: bool,
}

impl FakeCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer node selection with these ids.
    pub fn selecting(self, ids: &[&str], confidence: Confidence) -> Self {
        if let Ok(mut slot) = self.selection.lock() {
            *slot = Some(NodeSelection {
                node_ids: ids.iter().map(|s| s.to_string()).collect(),
                reasoning: "fixed selection".into(),
                confidence,
            });
        }
        self
    }

    /// Node selection fails with an API error.
    pub fn failing_selection(mut self) -> Self {
        self.fail_selection = true;
        self
    }

    pub fn toc_check_calls(&self) -> usize {
        self.counters.toc_check.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.counters.verify.load(Ordering::SeqCst)
    }

    pub fn relocate_calls(&self) -> usize {
        self.counters.relocate.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.counters.generate.load(Ordering::SeqCst)
    }

    pub fn summarize_calls(&self) -> usize {
        self.counters.summarize.load(Ordering::SeqCst)
    }

    pub fn select_calls(&self) -> usize {
        self.counters.select.load(Ordering::SeqCst)
    }

    fn headings(tagged: &str, skip: &HashSet<String>, numberer: &mut Numberer) -> Vec<RawTocItem> {
        let mut out = Vec::new();
        for (page, text) in untag(tagged) {
            for line in body_lines(&text).into_iter().filter(|l| is_heading(l)) {
                if skip.contains(line) || out.iter().any(|i: &RawTocItem| i.title == line) {
                    continue;
                }
                out.push(RawTocItem {
                    structure: Some(json!(numberer.next(line))),
                    title: line.to_string(),
                    physical_index: Some(json!(format!("<physical_index_{}>", page))),
                    ..Default::default()
                });
            }
        }
        out
    }
}

#[async_trait]
impl Capabilities for FakeCapabilities {
    async fn is_toc_page(&self, page_text: &str) -> Result<bool> {
        self.counters.toc_check.fetch_add(1, Ordering::SeqCst);
        Ok(is_toc_text(page_text))
    }

    async fn transform_toc(&self, toc_text: &str) -> Result<Vec<RawTocItem>> {
        let mut numberer = Numberer::default();
        Ok(toc_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with(TOC_HEADER))
            .map(|line| {
                let (title, page) = match PAGE_NUMBER_SUFFIX.captures(line) {
                    Some(c) => (c[1].to_string(), Some(json!(c[2].to_string()))),
                    None => (line.to_string(), None),
                };
                RawTocItem {
                    structure: Some(json!(numberer.next(&title))),
                    title,
                    page,
                    ..Default::default()
                }
            })
            .collect())
    }

    async fn toc_has_page_numbers(&self, toc_text: &str) -> Result<bool> {
        Ok(toc_text
            .lines()
            .any(|l| !l.trim().starts_with(TOC_HEADER) && PAGE_NUMBER_SUFFIX.is_match(l.trim())))
    }

    async fn match_physical_indices(
        &self,
        items: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>> {
        Ok(items
            .iter()
            .filter_map(|item| {
                let page = find_page(tagged_pages, &item.title)?;
                Some(RawTocItem {
                    physical_index: Some(json!(format!("<physical_index_{}>", page))),
                    ..item.clone()
                })
            })
            .collect())
    }

    async fn locate_items_in_pages(
        &self,
        items: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>> {
        Ok(items
            .iter()
            .map(|item| match find_page(tagged_pages, &item.title) {
                Some(page) => RawTocItem {
                    start: Some("yes".into()),
                    physical_index: Some(json!(format!("<physical_index_{}>", page))),
                    ..item.clone()
                },
                None => RawTocItem {
                    start: Some("no".into()),
                    physical_index: None,
                    ..item.clone()
                },
            })
            .collect())
    }

    async fn generate_structure_init(&self, tagged_pages: &str) -> Result<Vec<RawTocItem>> {
        self.counters.generate.fetch_add(1, Ordering::SeqCst);
        Ok(Self::headings(tagged_pages, &HashSet::new(), &mut Numberer::default()))
    }

    async fn generate_structure_continue(
        &self,
        previous: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>> {
        self.counters.generate.fetch_add(1, Ordering::SeqCst);
        let mut numberer = Numberer::default();
        let mut seen = HashSet::new();
        for item in previous {
            numberer.next(&item.title);
            seen.insert(item.title.clone());
        }
        Ok(Self::headings(tagged_pages, &seen, &mut numberer))
    }

    async fn title_on_page(&self, title: &str, page_text: &str) -> Result<bool> {
        self.counters.verify.fetch_add(1, Ordering::SeqCst);
        Ok(has_line(page_text, title))
    }

    async fn title_starts_page(&self, title: &str, page_text: &str) -> Result<bool> {
        Ok(body_lines(page_text).first() == Some(&title.trim()))
    }

    async fn relocate_item(&self, title: &str, tagged_pages: &str) -> Result<Option<usize>> {
        self.counters.relocate.fetch_add(1, Ordering::SeqCst);
        Ok(find_page(tagged_pages, title))
    }

    async fn summarize_node(&self, title: &str, _text: &str) -> Result<String> {
        self.counters.summarize.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Summary of {}", title))
    }

    async fn describe_document(&self, _outline: &str) -> Result<String> {
        Ok("A synthetic regulation used in tests.".into())
    }

    /// Fixed selection if one was set, otherwise every node whose title
    /// shares a word of four or more letters with the query.
    async fn select_nodes(&self, query: &str, outline: &str) -> Result<NodeSelection> {
        self.counters.select.fetch_add(1, Ordering::SeqCst);
        if self.fail_selection {
            return Err(PageIndexError::LlmApi("selection unavailable".into()));
        }
        if let Some(selection) = self.selection.lock().ok().and_then(|s| s.clone()) {
            return Ok(selection);
        }

        let words: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= 4)
            .map(str::to_lowercase)
            .collect();
        let outline: Value = serde_json::from_str(outline)?;

        fn collect(value: &Value, words: &[String], out: &mut Vec<String>) {
            let nodes = match value {
                Value::Array(nodes) => nodes.as_slice(),
                Value::Object(map) => map
                    .get("nodes")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default(),
                _ => &[],
            };
            for node in nodes {
                let title = node.get("title").and_then(Value::as_str).unwrap_or_default();
                let title = title.to_lowercase();
                if words.iter().any(|w| title.contains(w.as_str())) {
                    if let Some(id) = node.get("node_id").and_then(Value::as_str) {
                        out.push(id.to_string());
                    }
                }
                collect(node, words, out);
            }
        }

        let mut node_ids = Vec::new();
        collect(&outline, &words, &mut node_ids);
        let confidence = if node_ids.is_empty() {
            Confidence::Low
        } else {
            Confidence::High
        };
        Ok(NodeSelection {
            node_ids,
            reasoning: format!("titles matching {:?}", words),
            confidence,
        })
    }
}

const FILLER: &[&str] = &[
    "the", "member", "states", "shall", "ensure", "that", "providers", "comply", "with",
    "obligations", "laid", "down", "in", "this", "regulation", "and", "its", "annexes",
];

fn filler(words: usize) -> String {
    let mut out = String::new();
    for i in 0..words {
        if i > 0 {
            out.push(if i % 12 == 0 { '\n' } else { ' ' });
        }
        out.push_str(FILLER[i % FILLER.len()]);
    }
    out
}

struct Heading {
    page: usize,
    title: String,
    top: bool,
    listed: bool,
}

/// Builds multi-page legal documents with headings on chosen pages.
pub struct LegalDocBuilder {
    pages: usize,
    toc_pages: usize,
    toc_page_numbers: bool,
    label_offset: usize,
    words_per_page: usize,
    headings: Vec<Heading>,
    misprints: Vec<(String, usize)>,
}

impl LegalDocBuilder {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            toc_pages: 0,
            toc_page_numbers: true,
            label_offset: 0,
            words_per_page: 120,
            headings: Vec::new(),
            misprints: Vec::new(),
        }
    }

    /// Put a table of contents on pages `2..=n + 1`.
    pub fn with_toc_pages(mut self, n: usize) -> Self {
        self.toc_pages = n;
        self
    }

    pub fn without_toc_page_numbers(mut self) -> Self {
        self.toc_page_numbers = false;
        self
    }

    /// Printed page numbers lag physical positions by `offset`.
    pub fn page_label_offset(mut self, offset: usize) -> Self {
        self.label_offset = offset;
        self
    }

    pub fn words_per_page(mut self, words: usize) -> Self {
        self.words_per_page = words;
        self
    }

    fn heading(mut self, page: usize, title: &str, top: bool, listed: bool) -> Self {
        self.headings.push(Heading {
            page,
            title: title.to_string(),
            top,
            listed,
        });
        self
    }

    pub fn chapter(self, page: usize, title: &str) -> Self {
        self.heading(page, title, true, true)
    }

    pub fn article(self, page: usize, title: &str) -> Self {
        self.heading(page, title, true, true)
    }

    pub fn article_mid_page(self, page: usize, title: &str) -> Self {
        self.heading(page, title, false, true)
    }

    /// A heading in the body that the table of contents leaves out.
    pub fn unlisted_article(self, page: usize, title: &str) -> Self {
        self.heading(page, title, true, false)
    }

    /// Print a wrong page number for `title` in the table of contents.
    pub fn misprint(mut self, title: &str, label: usize) -> Self {
        self.misprints.push((title.to_string(), label));
        self
    }

    fn toc_lines(&self) -> Vec<String> {
        self.headings
            .iter()
            .filter(|h| h.listed)
            .map(|h| {
                if !self.toc_page_numbers {
                    return h.title.clone();
                }
                let label = self
                    .misprints
                    .iter()
                    .find(|(title, _)| *title == h.title)
                    .map(|(_, label)| *label)
                    .unwrap_or_else(|| h.page.saturating_sub(self.label_offset));
                format!("{} ........ {}", h.title, label)
            })
            .collect()
    }

    pub fn build(self) -> Document {
        let toc = self.toc_lines();
        let per_toc_page = toc.len().div_ceil(self.toc_pages.max(1)).max(1);
        let mut toc_chunks = toc.chunks(per_toc_page);

        let pages = (1..=self.pages)
            .map(|number| {
                if number >= 2 && number < 2 + self.toc_pages {
                    let mut text = String::from(TOC_HEADER);
                    if number > 2 {
                        text.push_str(" (continued)");
                    }
                    for line in toc_chunks.next().unwrap_or_default() {
                        text.push('\n');
                        text.push_str(line);
                    }
                    return Page::new(number, text);
                }

                let mut lines: Vec<String> = Vec::new();
                for heading in self.headings.iter().filter(|h| h.page == number) {
                    if !(heading.top && lines.is_empty()) {
                        lines.push(filler(12));
                    }
                    lines.push(heading.title.clone());
                }
                if number == 1 && lines.is_empty() {
                    lines.push("Regulation on the protection of test data".into());
                }
                lines.push(filler(self.words_per_page));
                Page::new(number, lines.join("\n"))
            })
            .collect();

        Document::new("regulation", pages)
    }
}

const SUBJECTS: &[&str] = &[
    "Subject matter",
    "Scope",
    "Definitions",
    "Principles",
    "Lawfulness",
    "Consent",
    "Transparency",
    "Right of access",
    "Erasure",
    "Security",
    "Penalties",
    "Entry into force",
];

/// A regulation with a one-page TOC on page 2 and `articles` evenly spaced
/// articles from page 4, titled "Article {k} {subject}".
pub fn regulation(pages: usize, articles: usize) -> LegalDocBuilder {
    let step = (pages.saturating_sub(4) / articles.max(1)).max(1);
    let mut builder = LegalDocBuilder::new(pages).with_toc_pages(1);
    for k in 0..articles {
        let subject = SUBJECTS[k % SUBJECTS.len()];
        builder = builder.article(4 + k * step, &format!("Article {} {}", k + 1, subject));
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tag_pages;

    #[test]
    fn test_builder_places_headings_and_toc() {
        let doc = regulation(20, 3).build();
        assert_eq!(doc.page_count(), 20);
        assert!(is_toc_text(&doc.get_page(2).unwrap().content));
        assert!(doc.get_page(2).unwrap().content.contains("Article 2 Scope ........ 9"));
        assert!(has_line(&doc.get_page(9).unwrap().content, "Article 2 Scope"));
        assert!(!has_line(&doc.get_page(2).unwrap().content, "Article 2 Scope"));
    }

    #[test]
    fn test_untag_roundtrip() {
        let doc = regulation(8, 2).build();
        let pages = untag(&tag_pages(&doc.pages[3..6]));
        assert_eq!(pages.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![4, 5, 6]);
        assert_eq!(find_page(&tag_pages(&doc.pages), "Article 1 Subject matter"), Some(4));
    }
}
