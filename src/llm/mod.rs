//! LLM integration module.
//!
//! Provides an OpenAI-compatible client, the prompts used for tree
//! generation and search, lenient JSON parsing of model output, retry with
//! backoff, and the [`Capabilities`] seam the pipeline is written against.

mod capabilities;
mod client;
pub mod json;
mod prompts;
pub mod retry;

pub use capabilities::{Capabilities, LlmCapabilities, NodeSelection, parse_toc_items};
pub use client::{Completion, LlmClient, Message, Role, TokenUsage};
pub use prompts::Prompts;
