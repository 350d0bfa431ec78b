//! Configuration for the page indexer.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.
//!
//! The whole [`Config`] is passed explicitly into the indexer, searchers and
//! reranker; nothing here is global, so concurrent document runs can use
//! different settings.

use crate::error::{PageIndexError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the LLM API (e.g., "https://api.openai.com")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Model name (e.g., "gpt-4", "claude-3-opus")
    pub model: String,

    /// Maximum tokens for response (optional)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation (optional)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.0
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "claude-latest".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Retry policy applied to every capability call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after every failure.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Settings for building a tree index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Leading pages scanned for a table of contents; also the size of the
    /// body window used to infer the page offset.
    pub toc_check_pages: usize,
    /// Token budget of one page group fed to the structure generator.
    pub max_tokens_per_group: usize,
    /// Pages repeated at the start of the next group.
    pub group_overlap_pages: usize,
    /// Verify only this many evenly spaced items (`None` verifies all).
    pub verify_sample: Option<usize>,
    /// A TOC-derived structure below this accuracy is discarded.
    pub min_accuracy: f64,
    /// Rounds of relocation attempts for misplaced items.
    pub max_repair_rounds: usize,
    /// A node is subdivided only if it spans more pages than this...
    pub max_pages_per_node: usize,
    /// ...and holds more tokens than this.
    pub max_tokens_per_node: usize,
    /// Maximum nesting created by subdivision.
    pub max_subdivision_depth: usize,
    /// Concurrent capability calls within one batch.
    pub concurrency: usize,
    /// Assign zero-padded node ids.
    pub add_node_id: bool,
    /// Keep the raw text of each node in the tree.
    pub add_node_text: bool,
    /// Summarize every node.
    pub add_node_summary: bool,
    /// Generate a one-paragraph document description.
    pub add_doc_description: bool,
    /// Drop raw text from nodes that have a summary.
    pub strip_text_with_summary: bool,
    /// Node text is truncated to this many characters before summarizing.
    pub summary_char_limit: usize,
    /// Nodes under this many tokens use their own text as summary.
    pub summary_token_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            toc_check_pages: 20,
            max_tokens_per_group: 20_000,
            group_overlap_pages: 1,
            verify_sample: None,
            min_accuracy: 0.6,
            max_repair_rounds: 3,
            max_pages_per_node: 10,
            max_tokens_per_node: 20_000,
            max_subdivision_depth: 4,
            concurrency: 5,
            add_node_id: true,
            add_node_text: true,
            add_node_summary: true,
            add_doc_description: false,
            strip_text_with_summary: false,
            summary_char_limit: 12_000,
            summary_token_threshold: 200,
        }
    }
}

/// Settings for reciprocal rank fusion of the semantic and keyword channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub semantic_weight: f64,
    pub keyword_weight: f64,
    /// Smoothing constant added to every rank.
    pub rrf_k: u32,
    /// Candidates requested from each channel and kept after fusion.
    pub initial_top_k: usize,
    /// Results returned to the caller.
    pub top_k: usize,
    pub enable_reranking: bool,
    /// Add chapter/article cross-references to the query.
    pub expand_query: bool,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.6,
            keyword_weight: 0.4,
            rrf_k: 60,
            initial_top_k: 15,
            top_k: 5,
            enable_reranking: false,
            expand_query: true,
        }
    }
}

/// Settings for the reranker's external scorers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Model used by the primary relevance scorer.
    pub primary_model: Option<String>,
    /// Model tried when the primary scorer fails.
    pub alternate_model: Option<String>,
    /// Characters of each candidate shown to the scorer.
    pub excerpt_chars: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            primary_model: Some("gpt-4o-mini".to_string()),
            alternate_model: None,
            excerpt_chars: 300,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM settings
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    retry: Option<RetryConfig>,
    index: Option<IndexConfig>,
    hybrid: Option<HybridConfig>,
    rerank: Option<RerankConfig>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_API_KEY, LLM_MODEL, ...)
    /// 2. Config file (~/.config/legal-page-indexer/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(tokens) = parse_env("LLM_MAX_TOKENS") {
            self.llm.max_tokens = tokens;
        }

        if let Some(temp) = parse_env("LLM_TEMPERATURE") {
            self.llm.temperature = temp;
        }

        if let Some(timeout) = parse_env("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = timeout;
        }

        if let Some(attempts) = parse_env("LLM_MAX_RETRIES") {
            self.retry.max_attempts = attempts;
        }

        if let Some(concurrency) = parse_env("INDEX_CONCURRENCY") {
            self.index.concurrency = concurrency;
        }

        if let Ok(model) = env::var("RERANK_MODEL") {
            self.rerank.primary_model = Some(model);
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PageIndexError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text; missing sections keep defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| PageIndexError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                config.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(retry) = file_config.retry {
            config.retry = retry;
        }
        if let Some(index) = file_config.index {
            config.index = index;
        }
        if let Some(hybrid) = file_config.hybrid {
            config.hybrid = hybrid;
        }
        if let Some(rerank) = file_config.rerank {
            config.rerank = rerank;
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "legal-page-indexer")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(PageIndexError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.api_key.is_empty() {
            return Err(PageIndexError::Config(
                "LLM API key is required. Set LLM_API_KEY environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(PageIndexError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        self.validate_tuning()
    }

    /// Validate numeric settings that do not depend on the LLM endpoint.
    pub fn validate_tuning(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(PageIndexError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.index.concurrency == 0 {
            return Err(PageIndexError::InvalidConfig(
                "index.concurrency must be at least 1".to_string(),
            ));
        }
        if !(self.index.min_accuracy > 0.0 && self.index.min_accuracy <= 1.0) {
            return Err(PageIndexError::InvalidConfig(format!(
                "index.min_accuracy must be in (0, 1], got {}",
                self.index.min_accuracy
            )));
        }
        if self.index.max_tokens_per_group == 0 {
            return Err(PageIndexError::InvalidConfig(
                "index.max_tokens_per_group must be positive".to_string(),
            ));
        }
        if self.hybrid.semantic_weight < 0.0 || self.hybrid.keyword_weight < 0.0 {
            return Err(PageIndexError::InvalidConfig(
                "hybrid channel weights must not be negative".to_string(),
            ));
        }
        if self.hybrid.rrf_k == 0 {
            return Err(PageIndexError::InvalidConfig(
                "hybrid.rrf_k must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.llm.api_base.is_empty());
        assert!(config.llm.api_key.is_empty());
        assert_eq!(config.llm.model, "claude-latest");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.index.toc_check_pages, 20);
        assert_eq!(config.index.max_repair_rounds, 3);
        assert_eq!(config.index.concurrency, 5);
        assert_eq!(config.hybrid.rrf_k, 60);
    }

    #[test]
    fn test_validate_fails_without_required_fields() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_llm() {
        let config = Config::with_llm("https://api.example.com", "test-key", "gpt-4");
        assert_eq!(config.llm.api_base, "https://api.example.com");
        assert_eq!(config.llm.api_key, "test-key");
        assert_eq!(config.llm.model, "gpt-4");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_sections_merge_with_defaults() {
        let yaml = r#"
llm:
  api_base: "https://llm.internal"
  model: "gpt-4o"
index:
  max_pages_per_node: 50
  verify_sample: 8
hybrid:
  enable_reranking: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.llm.api_base, "https://llm.internal");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.index.max_pages_per_node, 50);
        assert_eq!(config.index.verify_sample, Some(8));
        assert_eq!(config.index.max_tokens_per_node, 20_000);
        assert!(config.hybrid.enable_reranking);
        assert_eq!(config.hybrid.semantic_weight, 0.6);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_bad_tuning() {
        let mut config = Config::with_llm("https://api.example.com", "k", "m");
        config.index.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(PageIndexError::InvalidConfig(_))
        ));

        let mut config = Config::with_llm("https://api.example.com", "k", "m");
        config.index.min_accuracy = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::with_llm("https://api.example.com", "k", "m");
        config.hybrid.keyword_weight = -0.1;
        assert!(config.validate().is_err());
    }
}
