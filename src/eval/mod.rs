//! Retrieval quality evaluation.
//!
//! This module provides:
//! - Keyword and page based metrics (precision@k, recall, MRR, NDCG, MAP, ...)
//! - Question sets with expected pages and keywords
//! - Per-run reports with mean metrics, latency percentiles and
//!   difficulty/category breakdowns

pub mod dataset;
pub mod metrics;

pub use dataset::{EvalQuestion, EvalReport, EvalSet, GroupSummary, QuestionResult, TimingSummary};
pub use metrics::{RetrievalMetrics, Retrieved, chunk_diversity, percentile};
