//! Legal Page Indexer - LLM-assisted hierarchical indexing of long legal documents.
//!
//! A document (regulation, directive, statute) is turned into a tree of
//! chapters, articles and sections, each mapped to the physical pages it
//! spans. The tree is then navigated by model reasoning to answer queries
//! with citable, page-ranged sources.
//!
//! # Overview
//!
//! 1. Find the table of contents, structure it, and map printed page numbers
//!    to physical pages; without a usable TOC, generate the structure from
//!    the page text instead
//! 2. Verify that every section really starts where the index says it does,
//!    and relocate the ones that don't
//! 3. Build the nested tree, subdivide oversized nodes, attach text and
//!    summaries
//! 4. Retrieve by letting the model pick nodes from the tree outline
//!
//! A separate flat path fuses semantic and keyword chunk rankings with
//! reciprocal rank fusion and optionally reranks the result.
//!
//! # Quick Start
//!
//! ```no_run
//! use legal_page_indexer::{
//!     config::Config,
//!     document::{DEFAULT_PAGE_DELIMITER, Document},
//!     indexer::TreeIndexer,
//!     llm::{LlmCapabilities, LlmClient},
//!     persistence::TreeStore,
//!     search::TreeSearcher,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let caps = Arc::new(LlmCapabilities::new(
//!         LlmClient::new(config.llm.clone()),
//!         config.retry.clone(),
//!     ));
//!
//!     let document = Document::from_text_file_with_delimiter(
//!         Path::new("gdpr.txt"),
//!         DEFAULT_PAGE_DELIMITER,
//!     )?;
//!     let indexer = TreeIndexer::with_config(caps.clone(), config.index.clone());
//!     let tree = indexer.index(&document).await?;
//!
//!     let store = TreeStore::open("data/trees")?;
//!     store.save("gdpr", &tree)?;
//!
//!     let result = TreeSearcher::new(caps)
//!         .retrieve(&tree, "What fines can a supervisory authority impose?")
//!         .await?;
//!     for source in &result.sources {
//!         println!("{} (pages {}-{})", source.breadcrumb(), source.start_index, source.end_index);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Document**: physical pages of extracted text
//! - **Capabilities**: every model call the pipeline makes, behind one trait
//! - **TreeIndexer**: TOC and content paths, verification, repair, subdivision
//! - **TreeSearcher**: reasoning-based retrieval over a tree
//! - **HybridSearcher**: RRF fusion of chunk channels plus reranking
//! - **TreeStore**: trees on disk, keyed by document id

pub mod config;
pub mod document;
pub mod error;
pub mod eval;
pub mod hybrid;
pub mod indexer;
pub mod llm;
pub mod persistence;
pub mod search;
pub mod tree;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use document::Document;
pub use error::{PageIndexError, Result};
pub use hybrid::{Chunk, HybridSearcher, RankedChunk, Reranker};
pub use indexer::{IndexReport, TreeIndexer};
pub use llm::{Capabilities, LlmCapabilities, LlmClient};
pub use persistence::{TreeStore, load_tree, save_tree};
pub use search::{RetrievalResult, TreeSearcher};
pub use tree::{DocumentTree, TreeNode};
