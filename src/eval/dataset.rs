//! Question sets and per-run reports for retrieval evaluation.

use super::metrics::{Retrieved, RetrievalMetrics, percentile};
use crate::error::{PageIndexError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// A question with the pages and keywords a good answer should cite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalQuestion {
    pub id: String,
    pub query: String,
    /// Document the question is asked against, when a set spans several.
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub expected_pages: Vec<usize>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Topic label, e.g. "definitions" or "penalties".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// "easy", "medium" or "hard".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

/// A named collection of evaluation questions.
///
/// Expected format:
/// ```json
/// {
///   "name": "gdpr",
///   "questions": [
///     {
///       "id": "q1", "query": "What fines apply?", "expected_pages": [82],
///       "keywords": ["fines"], "category": "penalties", "difficulty": "easy"
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSet {
    pub name: String,
    pub questions: Vec<EvalQuestion>,
}

impl EvalSet {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Get a subset of questions (for quick runs).
    pub fn take(&self, n: usize) -> Self {
        Self {
            name: self.name.clone(),
            questions: self.questions.iter().take(n).cloned().collect(),
        }
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PageIndexError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| PageIndexError::Serialization(e.to_string()))
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| PageIndexError::Serialization(e.to_string()))?;
        fs::write(path, content).map_err(|e| PageIndexError::io(path, e))
    }
}

/// Metrics for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub retrieved: usize,
    pub metrics: RetrievalMetrics,
    /// Wall-clock retrieval time; absent when retrieval failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Retrieval latency over the questions that completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl TimingSummary {
    pub fn from_times(times: &[f64]) -> Self {
        if times.is_empty() {
            return Self::default();
        }
        Self {
            mean_ms: times.iter().sum::<f64>() / times.len() as f64,
            p50_ms: percentile(times, 50),
            p95_ms: percentile(times, 95),
            p99_ms: percentile(times, 99),
            min_ms: times.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: times.iter().copied().fold(0.0, f64::max),
        }
    }
}

/// Mean metrics for the questions sharing a category or difficulty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub count: usize,
    pub precision_at_k: f64,
    pub recall: f64,
    pub mrr: f64,
    pub ndcg_at_k: f64,
    pub avg_time_ms: f64,
}

impl GroupSummary {
    fn from_results(results: &[&QuestionResult]) -> Self {
        let metrics: Vec<RetrievalMetrics> = results.iter().map(|r| r.metrics.clone()).collect();
        let mean = RetrievalMetrics::mean(&metrics);
        let times: Vec<f64> = results.iter().filter_map(|r| r.time_ms).collect();
        Self {
            count: results.len(),
            precision_at_k: mean.precision_at_k,
            recall: mean.recall,
            mrr: mean.mrr,
            ndcg_at_k: mean.ndcg_at_k,
            avg_time_ms: TimingSummary::from_times(&times).mean_ms,
        }
    }
}

fn group_by(
    results: &[QuestionResult],
    key: impl Fn(&QuestionResult) -> Option<&str>,
) -> BTreeMap<String, GroupSummary> {
    let mut groups: BTreeMap<String, Vec<&QuestionResult>> = BTreeMap::new();
    for result in results {
        if let Some(label) = key(result) {
            groups.entry(label.to_lowercase()).or_default().push(result);
        }
    }
    groups
        .into_iter()
        .map(|(label, members)| (label, GroupSummary::from_results(&members)))
        .collect()
}

/// Aggregated results of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub set_name: String,
    pub k: usize,
    pub results: Vec<QuestionResult>,
    pub mean: RetrievalMetrics,
    pub failures: usize,
    pub timing: TimingSummary,
    pub by_difficulty: BTreeMap<String, GroupSummary>,
    pub by_category: BTreeMap<String, GroupSummary>,
    /// Total evaluation time (seconds).
    pub total_time_secs: f64,
}

impl EvalReport {
    pub fn new(set_name: &str, k: usize) -> Self {
        Self {
            set_name: set_name.to_string(),
            k,
            results: Vec::new(),
            mean: RetrievalMetrics::default(),
            failures: 0,
            timing: TimingSummary::default(),
            by_difficulty: BTreeMap::new(),
            by_category: BTreeMap::new(),
            total_time_secs: 0.0,
        }
    }

    /// Score `retrieved` against `question`, which took `elapsed` to answer.
    pub fn record(&mut self, question: &EvalQuestion, retrieved: &[Retrieved], elapsed: Duration) {
        self.results.push(QuestionResult {
            id: question.id.clone(),
            category: question.category.clone(),
            difficulty: question.difficulty.clone(),
            retrieved: retrieved.len(),
            metrics: RetrievalMetrics::compute(retrieved, &question.keywords, &question.expected_pages, self.k),
            time_ms: Some(elapsed.as_micros() as f64 / 1000.0),
            error: None,
        });
    }

    /// A question whose retrieval failed scores zero everywhere.
    pub fn record_failure(&mut self, question: &EvalQuestion, error: impl ToString) {
        self.results.push(QuestionResult {
            id: question.id.clone(),
            category: question.category.clone(),
            difficulty: question.difficulty.clone(),
            retrieved: 0,
            metrics: RetrievalMetrics::default(),
            time_ms: None,
            error: Some(error.to_string()),
        });
    }

    /// Calculate summary statistics from question results.
    pub fn calculate_summary(&mut self) {
        let metrics: Vec<RetrievalMetrics> = self.results.iter().map(|r| r.metrics.clone()).collect();
        self.mean = RetrievalMetrics::mean(&metrics);
        self.failures = self.results.iter().filter(|r| r.error.is_some()).count();

        let times: Vec<f64> = self.results.iter().filter_map(|r| r.time_ms).collect();
        self.timing = TimingSummary::from_times(&times);
        self.by_difficulty = group_by(&self.results, |r| r.difficulty.as_deref());
        self.by_category = group_by(&self.results, |r| r.category.as_deref());
    }

    /// Print summary to stdout.
    pub fn print_summary(&self) {
        println!("\n========== Retrieval Evaluation ==========");
        println!("Set: {}  (k = {})", self.set_name, self.k);
        println!("Questions: {}  Failures: {}", self.results.len(), self.failures);
        println!("------------------------------------------");
        println!("Precision@k:      {:.3}", self.mean.precision_at_k);
        println!("Recall:           {:.3}", self.mean.recall);
        println!("F1:               {:.3}", self.mean.f1);
        println!("MRR:              {:.3}", self.mean.mrr);
        println!("NDCG@k:           {:.3}", self.mean.ndcg_at_k);
        println!("MAP:              {:.3}", self.mean.map);
        println!("Hit rate:         {:.3}", self.mean.hit_rate);
        println!("Keyword coverage: {:.3}", self.mean.keyword_coverage);
        println!("Page accuracy:    {:.3}", self.mean.page_accuracy);
        println!("Chunk diversity:  {:.3}", self.mean.chunk_diversity);
        println!("------------------------------------------");
        println!(
            "Retrieval time:   mean {:.0}ms  p50 {:.0}ms  p95 {:.0}ms  p99 {:.0}ms",
            self.timing.mean_ms, self.timing.p50_ms, self.timing.p95_ms, self.timing.p99_ms
        );
        println!("                  min {:.0}ms  max {:.0}ms", self.timing.min_ms, self.timing.max_ms);

        for (heading, groups) in [("By difficulty", &self.by_difficulty), ("By category", &self.by_category)] {
            if groups.is_empty() {
                continue;
            }
            println!("------------------------------------------");
            println!("{}:", heading);
            for (label, g) in groups {
                println!(
                    "  {} (n={}): P@k {:.3} | Recall {:.3} | MRR {:.3} | NDCG {:.3} | {:.0}ms",
                    label, g.count, g.precision_at_k, g.recall, g.mrr, g.ndcg_at_k, g.avg_time_ms
                );
            }
        }
        println!("------------------------------------------");
        println!("Total time: {:.1}s", self.total_time_secs);
        println!("==========================================\n");
    }
}
