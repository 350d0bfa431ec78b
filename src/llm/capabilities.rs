//! The model-backed operations used by indexing and retrieval.
//!
//! Each method of [`Capabilities`] is one prompt. The pipeline only ever
//! talks to this trait, so tests can swap in a deterministic double and
//! alternative backends can be plugged in without touching the algorithms.

use super::client::LlmClient;
use super::json::{parse_json, parse_yes_no};
use super::prompts::Prompts;
use super::retry::with_retry;
use crate::config::RetryConfig;
use crate::document::parse_physical_index;
use crate::error::{PageIndexError, Result};
use crate::search::Confidence;
use crate::tree::RawTocItem;
use async_trait::async_trait;
use serde::Deserialize;

/// Nodes chosen by the model for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSelection {
    pub node_ids: Vec<String>,
    pub reasoning: String,
    pub confidence: Confidence,
}

/// External request/response operations, one per prompt.
#[async_trait]
pub trait Capabilities: Send + Sync {
    /// Does this page contain (part of) a table of contents?
    async fn is_toc_page(&self, page_text: &str) -> Result<bool>;

    /// Turn raw TOC text into ordered items with nominal page numbers.
    async fn transform_toc(&self, toc_text: &str) -> Result<Vec<RawTocItem>>;

    /// Does the TOC print page numbers next to its entries?
    async fn toc_has_page_numbers(&self, toc_text: &str) -> Result<bool>;

    /// Find the physical page of each item inside the tagged pages.
    async fn match_physical_indices(
        &self,
        items: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>>;

    /// Mark which items start inside the tagged pages (`start: "yes"`).
    async fn locate_items_in_pages(
        &self,
        items: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>>;

    /// Derive a structure from the first group of tagged pages.
    async fn generate_structure_init(&self, tagged_pages: &str) -> Result<Vec<RawTocItem>>;

    /// Extend a structure with the items found in the next group.
    async fn generate_structure_continue(
        &self,
        previous: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>>;

    /// Does the title appear on this page?
    async fn title_on_page(&self, title: &str, page_text: &str) -> Result<bool>;

    /// Is the title the first content of this page?
    async fn title_starts_page(&self, title: &str, page_text: &str) -> Result<bool>;

    /// Find the page where the section starts, within the tagged pages only.
    async fn relocate_item(&self, title: &str, tagged_pages: &str) -> Result<Option<usize>>;

    async fn summarize_node(&self, title: &str, text: &str) -> Result<String>;

    async fn describe_document(&self, outline: &str) -> Result<String>;

    /// Pick the nodes of an outline that answer the query.
    async fn select_nodes(&self, query: &str, outline: &str) -> Result<NodeSelection>;
}

/// [`Capabilities`] backed by an OpenAI-compatible chat endpoint.
#[derive(Clone)]
pub struct LlmCapabilities {
    client: LlmClient,
    retry: RetryConfig,
}

impl LlmCapabilities {
    pub fn new(client: LlmClient, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Send a prompt and parse the answer, retrying both together.
    async fn ask<T, P>(&self, step: &str, prompt: &str, parse: P) -> Result<T>
    where
        P: Fn(&str) -> Result<T>,
    {
        let client = &self.client;
        let parse = &parse;
        with_retry(&self.retry, step, || async move {
            let response = client
                .complete(Some(Prompts::system_document_analyzer()), prompt)
                .await?;
            parse(&response)
        })
        .await
    }

    async fn ask_text(&self, step: &str, prompt: &str) -> Result<String> {
        self.ask(step, prompt, |response| {
            let text = response.trim();
            if text.is_empty() {
                Err(PageIndexError::LlmParse(format!("empty answer for {}", step)))
            } else {
                Ok(text.to_string())
            }
        })
        .await
    }
}

/// Parse a list of items, bare or wrapped in `table_of_contents`.
pub fn parse_toc_items(response: &str) -> Result<Vec<RawTocItem>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Items {
        Bare(Vec<RawTocItem>),
        Wrapped { table_of_contents: Vec<RawTocItem> },
    }

    match parse_json::<Items>(response)? {
        Items::Bare(items) => Ok(items),
        Items::Wrapped { table_of_contents } => Ok(table_of_contents),
    }
}

fn parse_relocation(response: &str) -> Result<Option<usize>> {
    let value: serde_json::Value = parse_json(response)?;
    Ok(match value.get("physical_index") {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(serde_json::Value::String(s)) => parse_physical_index(s),
        _ => None,
    })
}

fn parse_selection(response: &str) -> Result<NodeSelection> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        thinking: Option<String>,
        #[serde(default)]
        node_list: Vec<serde_json::Value>,
        #[serde(default)]
        confidence: Option<String>,
    }

    let raw: Raw = parse_json(response)?;
    let node_ids = raw
        .node_list
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => n.as_u64().map(|n| format!("{:04}", n)),
            _ => None,
        })
        .collect();

    Ok(NodeSelection {
        node_ids,
        reasoning: raw.thinking.unwrap_or_default(),
        confidence: raw
            .confidence
            .as_deref()
            .map(Confidence::from_str)
            .unwrap_or(Confidence::Low),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| PageIndexError::Serialization(e.to_string()))
}

#[async_trait]
impl Capabilities for LlmCapabilities {
    async fn is_toc_page(&self, page_text: &str) -> Result<bool> {
        let prompt = Prompts::toc_detector().replace("{content}", page_text);
        self.ask("detect toc", &prompt, |r| parse_yes_no(r, "toc_detected"))
            .await
    }

    async fn transform_toc(&self, toc_text: &str) -> Result<Vec<RawTocItem>> {
        let prompt = format!(
            "{}\nGiven table of contents\n:{}",
            Prompts::toc_transformer(),
            toc_text
        );
        self.ask("transform toc", &prompt, parse_toc_items).await
    }

    async fn toc_has_page_numbers(&self, toc_text: &str) -> Result<bool> {
        let prompt = Prompts::detect_page_index().replace("{toc_content}", toc_text);
        self.ask("detect page numbers", &prompt, |r| {
            parse_yes_no(r, "page_index_given_in_toc")
        })
        .await
    }

    async fn match_physical_indices(
        &self,
        items: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>> {
        let prompt = format!(
            "{}\nTable of contents:\n{}\nDocument pages:\n{}",
            Prompts::toc_index_extractor(),
            to_json(&items)?,
            tagged_pages
        );
        self.ask("match physical indices", &prompt, parse_toc_items)
            .await
    }

    async fn locate_items_in_pages(
        &self,
        items: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>> {
        let prompt = format!(
            "{}\n\nCurrent Partial Document:\n{}\n\nGiven Structure\n{}\n",
            Prompts::add_page_number_to_toc(),
            tagged_pages,
            to_json(&items)?
        );
        self.ask("locate toc items", &prompt, parse_toc_items).await
    }

    async fn generate_structure_init(&self, tagged_pages: &str) -> Result<Vec<RawTocItem>> {
        let prompt = format!(
            "{}\nGiven text\n:{}",
            Prompts::generate_toc_init(),
            tagged_pages
        );
        self.ask("generate structure", &prompt, parse_toc_items).await
    }

    async fn generate_structure_continue(
        &self,
        previous: &[RawTocItem],
        tagged_pages: &str,
    ) -> Result<Vec<RawTocItem>> {
        let prompt = format!(
            "{}\nGiven text\n:{}\nPrevious tree structure\n:{}",
            Prompts::generate_toc_continue(),
            tagged_pages,
            to_json(&previous)?
        );
        self.ask("continue structure", &prompt, parse_toc_items)
            .await
    }

    async fn title_on_page(&self, title: &str, page_text: &str) -> Result<bool> {
        let prompt = Prompts::check_title_appearance()
            .replace("{title}", title)
            .replace("{page_text}", page_text);
        self.ask("verify title", &prompt, |r| parse_yes_no(r, "answer"))
            .await
    }

    async fn title_starts_page(&self, title: &str, page_text: &str) -> Result<bool> {
        let prompt = Prompts::check_title_appearance_in_start()
            .replace("{title}", title)
            .replace("{page_text}", page_text);
        self.ask("check title start", &prompt, |r| {
            parse_yes_no(r, "start_begin")
        })
        .await
    }

    async fn relocate_item(&self, title: &str, tagged_pages: &str) -> Result<Option<usize>> {
        let prompt = format!(
            "{}\nSection Title:\n{}\nDocument pages:\n{}",
            Prompts::single_toc_item_index_fixer(),
            title,
            tagged_pages
        );
        self.ask("relocate item", &prompt, parse_relocation).await
    }

    async fn summarize_node(&self, title: &str, text: &str) -> Result<String> {
        let prompt = Prompts::generate_node_summary()
            .replace("{title}", title)
            .replace("{content}", text);
        self.ask_text("summarize node", &prompt).await
    }

    async fn describe_document(&self, outline: &str) -> Result<String> {
        let prompt = Prompts::generate_doc_description().replace("{structure}", outline);
        self.ask_text("describe document", &prompt).await
    }

    async fn select_nodes(&self, query: &str, outline: &str) -> Result<NodeSelection> {
        let prompt = Prompts::tree_search()
            .replace("{tree_structure}", outline)
            .replace("{query}", query);
        self.ask("select nodes", &prompt, parse_selection).await
    }
}
