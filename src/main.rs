//! Legal Page Indexer CLI
//!
//! Builds page-ranged tree indexes of legal documents and answers queries
//! against them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use legal_page_indexer::{
    config::Config,
    document::{DEFAULT_PAGE_DELIMITER, Document},
    error::PageIndexError,
    eval::{EvalReport, EvalSet, Retrieved},
    hybrid::{Chunk, ChunkChannel, HybridSearcher, Reranker},
    indexer::{IndexReport, TreeIndexer},
    llm::{LlmCapabilities, LlmClient},
    persistence::{TreeStore, load_tree, save_tree, tree_exists, tree_size},
    search::{SearchOptions, TreeSearcher},
    tree::DocumentTree,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Legal Page Indexer - hierarchical page indexes for long legal documents
#[derive(Parser)]
#[command(name = "page-indexer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Where to find a stored tree.
#[derive(Args)]
struct TreeLocation {
    /// Tree store directory
    #[arg(long, default_value = "data/trees")]
    store: PathBuf,

    /// Document id in the store
    #[arg(long)]
    id: Option<String>,

    /// Path to a tree file (overrides --store/--id)
    #[arg(long)]
    index: Option<PathBuf>,
}

impl TreeLocation {
    fn load(&self) -> Result<DocumentTree> {
        if let Some(path) = &self.index {
            if !tree_exists(path) {
                anyhow::bail!("Index not found at '{}'. Run 'index' command first.", path.display());
            }
            return load_tree(path).context("Failed to load tree index");
        }
        let store = TreeStore::open(&self.store).context("Failed to open tree store")?;
        let id = match &self.id {
            Some(id) => id.clone(),
            None => {
                let ids = store.list()?;
                match ids.as_slice() {
                    [only] => only.clone(),
                    [] => anyhow::bail!("Tree store '{}' is empty. Run 'index' first.", self.store.display()),
                    _ => anyhow::bail!("Tree store holds {} documents; pick one with --id", ids.len()),
                }
            }
        };
        store
            .load(&id)
            .with_context(|| format!("Failed to load tree '{}'", id))
    }

    fn file(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.index {
            return Ok(Some(path.clone()));
        }
        match &self.id {
            Some(id) => Ok(Some(TreeStore::open(&self.store)?.path_for(id)?)),
            None => Ok(None),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build tree indexes for a document or a directory of documents
    Index {
        /// Text file (pages separated by form feeds) or directory of them
        document: PathBuf,

        /// Tree store directory
        #[arg(long, default_value = "data/trees")]
        store: PathBuf,

        /// Document id (single file only; defaults to the file name)
        #[arg(long)]
        id: Option<String>,

        /// Also write the tree to this path (.json or .bin)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip TOC detection and generate the structure from page text
        #[arg(long)]
        content_only: bool,

        /// Print the indexing report as JSON
        #[arg(long)]
        report: bool,
    },

    /// Retrieve the sections of a tree that answer a query
    Search {
        /// The search query
        query: String,

        #[command(flatten)]
        tree: TreeLocation,

        /// Maximum number of sections to return
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,

        /// Original document, read for sections stored without text
        #[arg(short, long)]
        document: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fuse externally produced semantic and keyword rankings
    Fuse {
        /// JSON file with "query", "semantic" and "keyword" chunk lists
        lists: PathBuf,

        /// Rerank the fused candidates
        #[arg(long)]
        rerank: bool,

        /// Number of results to return (defaults to the configured top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score tree retrieval against a question set
    Eval {
        /// JSON question set
        questions: PathBuf,

        #[command(flatten)]
        tree: TreeLocation,

        /// Cut-off for precision and NDCG
        #[arg(short = 'k', long, default_value_t = 5)]
        k: usize,

        /// Evaluate only the first N questions
        #[arg(long)]
        limit: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display the tree structure of an index
    Show {
        #[command(flatten)]
        tree: TreeLocation,

        /// Output as JSON instead of formatted tree
        #[arg(long)]
        json: bool,
    },

    /// Show information about an index
    Info {
        #[command(flatten)]
        tree: TreeLocation,
    },

    /// List the documents in a tree store
    List {
        #[arg(long, default_value = "data/trees")]
        store: PathBuf,
    },

    /// Remove a document from a tree store
    Remove {
        id: String,

        #[arg(long, default_value = "data/trees")]
        store: PathBuf,
    },

    /// Test LLM connection
    Test,
}

/// Initialize tracing based on CLI flags.
fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "legal_page_indexer=info",
        1 => "legal_page_indexer=debug",
        _ => "legal_page_indexer=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Index {
            document,
            store,
            id,
            output,
            content_only,
            report,
        } => cmd_index(document, store, id, output, content_only, report).await,
        Commands::Search {
            query,
            tree,
            top_k,
            document,
            json,
        } => cmd_search(query, tree, top_k, document, json).await,
        Commands::Fuse {
            lists,
            rerank,
            top_k,
            json,
        } => cmd_fuse(lists, rerank, top_k, json).await,
        Commands::Eval {
            questions,
            tree,
            k,
            limit,
            json,
        } => cmd_eval(questions, tree, k, limit, json).await,
        Commands::Show { tree, json } => cmd_show(tree, json),
        Commands::Info { tree } => cmd_info(tree),
        Commands::List { store } => cmd_list(store),
        Commands::Remove { id, store } => cmd_remove(id, store),
        Commands::Test => cmd_test().await,
    }
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn capabilities(config: &Config) -> Arc<LlmCapabilities> {
    Arc::new(LlmCapabilities::new(
        LlmClient::new(config.llm.clone()),
        config.retry.clone(),
    ))
}

/// Store id for a document file: its stem with unsupported characters replaced.
fn document_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    stem.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Text files under `root`, sorted.
fn corpus_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(PageIndexError::InvalidCorpusPath(root.to_path_buf()).into());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable corpus entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("txt"))
        .collect();
    if files.is_empty() {
        return Err(PageIndexError::EmptyCorpus(root.to_path_buf()).into());
    }
    files.sort();
    Ok(files)
}

async fn cmd_index(
    document_path: PathBuf,
    store_dir: PathBuf,
    id: Option<String>,
    output: Option<PathBuf>,
    content_only: bool,
    print_report: bool,
) -> Result<()> {
    if !document_path.exists() {
        return Err(PageIndexError::DocumentNotFound(document_path).into());
    }
    let config = load_config()?;
    let indexer = TreeIndexer::with_config(capabilities(&config), config.index.clone());
    let store = TreeStore::open(&store_dir).context("Failed to open tree store")?;

    let files = if document_path.is_dir() {
        if id.is_some() || output.is_some() {
            anyhow::bail!("--id and --output apply to a single document, not a directory");
        }
        corpus_files(&document_path)?
    } else {
        vec![document_path.clone()]
    };

    println!("Indexing {} document(s) with model {}", files.len(), config.llm.model);
    let mut failed = 0usize;
    for path in &files {
        let doc_id = id.clone().unwrap_or_else(|| document_id(path));
        match index_one(&indexer, path, content_only).await {
            Ok((tree, report)) => {
                let saved = store
                    .save(&doc_id, &tree)
                    .with_context(|| format!("Failed to save tree '{}'", doc_id))?;
                if let Some(output) = &output {
                    save_tree(&tree, output).context("Failed to save tree index")?;
                    println!("  Also written to: {}", output.display());
                }
                print_index_summary(&doc_id, &tree, &report, &saved);
                if print_report {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Err(err) if files.len() > 1 => {
                failed += 1;
                let message = format!("{:#}", err);
                warn!(document = %path.display(), error = %message, "indexing failed");
            }
            Err(err) => return Err(err),
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} documents failed to index", failed, files.len());
    }
    Ok(())
}

async fn index_one(
    indexer: &TreeIndexer,
    path: &Path,
    content_only: bool,
) -> Result<(DocumentTree, IndexReport)> {
    let document = Document::from_text_file_with_delimiter(path, DEFAULT_PAGE_DELIMITER)
        .with_context(|| format!("Failed to load document '{}'", path.display()))?;
    info!(
        document = %document.name,
        pages = document.page_count(),
        tokens = document.total_tokens(),
        "loaded document"
    );

    let start = Instant::now();
    let result = if content_only {
        indexer
            .index_without_toc(&document)
            .await
            .map(|tree| (tree, IndexReport::default()))
    } else {
        indexer.index_with_report(&document).await
    };
    let (tree, report) = result.with_context(|| format!("Failed to index '{}'", document.name))?;
    info!(document = %document.name, elapsed = ?start.elapsed(), "indexed");
    Ok((tree, report))
}

fn print_index_summary(id: &str, tree: &DocumentTree, report: &IndexReport, saved: &Path) {
    println!("\n{} ({} pages)", id, tree.total_pages);
    println!("  Structure:   {:?}", report.source);
    if let Some(accuracy) = report.accuracy {
        println!("  Accuracy:    {:.0}%", accuracy * 100.0);
    }
    if report.toc_rejected {
        println!("  TOC rejected, structure generated from content");
    }
    println!("  Sections:    {}", tree.node_count());
    println!("  Max depth:   {}", tree.max_depth());
    if report.repaired > 0 {
        println!("  Repaired:    {}", report.repaired);
    }
    if !report.unresolved.is_empty() {
        println!("  Unverified:  {}", report.unresolved.join("; "));
    }
    println!("  Saved to:    {}", saved.display());
}

async fn cmd_search(
    query: String,
    location: TreeLocation,
    top_k: usize,
    document_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    let tree = location.load()?;
    let searcher = TreeSearcher::with_options(
        capabilities(&config),
        SearchOptions {
            top_k,
            ..SearchOptions::default()
        },
    );

    let start = Instant::now();
    let result = match &document_path {
        Some(path) => {
            let document = Document::from_text_file_with_delimiter(path, DEFAULT_PAGE_DELIMITER)
                .context("Failed to load document")?;
            searcher.retrieve_with_document(&tree, &document, &query).await
        }
        None => searcher.retrieve(&tree, &query).await,
    }
    .context("Search failed")?;
    let elapsed = start.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.is_empty() {
        println!("No relevant sections found.");
        println!("Reasoning: {}", result.reasoning);
        return Ok(());
    }

    println!("Results ({:?} confidence):", result.confidence);
    println!("{}", "─".repeat(60));
    for (i, source) in result.sources.iter().enumerate() {
        println!(
            "{:>2}. {} [pages {}-{}]",
            i + 1,
            source.breadcrumb(),
            source.start_index,
            source.end_index
        );
        let preview: String = source.excerpt.chars().take(200).collect();
        for line in preview.lines().take(3) {
            println!("      {}", line);
        }
        println!();
    }
    println!("{}", "─".repeat(60));
    println!("Reasoning: {}", result.reasoning);
    println!("Found {} sections in {:.2?}", result.sources.len(), elapsed);
    Ok(())
}

/// Input of the `fuse` command.
#[derive(Deserialize)]
struct RankedLists {
    query: String,
    #[serde(default)]
    semantic: Vec<Chunk>,
    #[serde(default)]
    keyword: Vec<Chunk>,
}

/// A channel replaying a ranking computed elsewhere.
struct ReplayChannel {
    name: &'static str,
    chunks: Vec<Chunk>,
}

#[async_trait]
impl ChunkChannel for ReplayChannel {
    fn name(&self) -> &str {
        self.name
    }

    async fn rank(&self, _query: &str, limit: usize) -> legal_page_indexer::Result<Vec<Chunk>> {
        Ok(self.chunks.iter().take(limit).cloned().collect())
    }
}

async fn cmd_fuse(lists_path: PathBuf, rerank: bool, top_k: Option<usize>, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(&lists_path)
        .with_context(|| format!("Failed to read '{}'", lists_path.display()))?;
    let lists: RankedLists = serde_json::from_str(&content).context("Failed to parse ranked lists")?;

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(top_k) = top_k {
        config.hybrid.top_k = top_k;
    }
    config.hybrid.enable_reranking |= rerank;
    config.validate_tuning().context("Invalid configuration")?;

    let mut searcher = HybridSearcher::new(
        Arc::new(ReplayChannel {
            name: "semantic",
            chunks: lists.semantic,
        }),
        Arc::new(ReplayChannel {
            name: "keyword",
            chunks: lists.keyword,
        }),
        config.hybrid.clone(),
    );
    if config.hybrid.enable_reranking {
        let reranker = if config.validate().is_ok() {
            Reranker::from_config(&config.rerank, &config.llm, &config.retry)
        } else {
            warn!("LLM not configured, reranking with the lexical scorer only");
            Reranker::new(Vec::new())
        };
        info!(scorers = ?reranker.scorer_names(), "reranking enabled");
        searcher = searcher.with_reranker(reranker);
    }

    let ranked = searcher.search(&lists.query).await.context("Fusion failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }
    for (i, r) in ranked.iter().enumerate() {
        let preview: String = r.chunk.content.chars().take(80).collect();
        println!(
            "{:>2}. {} score={:.5}{} sem={} kw={}  {}",
            i + 1,
            r.chunk.id,
            r.score,
            r.rerank_score
                .map(|s| format!(" rerank={:.2}", s))
                .unwrap_or_default(),
            r.semantic_rank.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            r.keyword_rank.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

async fn cmd_eval(
    questions_path: PathBuf,
    location: TreeLocation,
    k: usize,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    let mut set = EvalSet::load_json(&questions_path).context("Failed to load question set")?;
    if let Some(limit) = limit {
        set = set.take(limit);
    }
    let searcher = TreeSearcher::with_options(
        capabilities(&config),
        SearchOptions {
            top_k: k,
            ..SearchOptions::default()
        },
    );

    // Questions naming a document are answered from that document's tree.
    let per_question = location.index.is_none();
    let default_tree = if per_question && set.questions.iter().all(|q| q.document_id.is_some()) {
        None
    } else {
        Some(location.load()?)
    };
    let store = TreeStore::open(&location.store).context("Failed to open tree store")?;
    let mut report = EvalReport::new(&set.name, k);
    let run_start = Instant::now();

    for question in &set.questions {
        let loaded;
        let tree = match (&question.document_id, &default_tree) {
            (Some(id), _) if per_question => match store.load(id) {
                Ok(tree) => {
                    loaded = tree;
                    &loaded
                }
                Err(err) => {
                    report.record_failure(question, err);
                    continue;
                }
            },
            (_, Some(tree)) => tree,
            (_, None) => {
                report.record_failure(question, "no tree to search");
                continue;
            }
        };
        let started = Instant::now();
        match searcher.retrieve(tree, &question.query).await {
            Ok(result) => {
                let elapsed = started.elapsed();
                let retrieved: Vec<Retrieved> = result.sources.iter().map(Retrieved::from).collect();
                report.record(question, &retrieved, elapsed);
            }
            Err(err) => {
                warn!(question = %question.id, error = %err, "retrieval failed");
                report.record_failure(question, err);
            }
        }
    }
    report.total_time_secs = run_start.elapsed().as_secs_f64();
    report.calculate_summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_summary();
    }
    Ok(())
}

fn cmd_show(location: TreeLocation, json: bool) -> Result<()> {
    let tree = location.load()?;
    if json {
        let json_str = tree.to_json().context("Failed to serialize tree")?;
        println!("{}", json_str);
    } else {
        println!("{}", tree.format());
    }
    Ok(())
}

fn cmd_info(location: TreeLocation) -> Result<()> {
    let tree = location.load()?;

    println!("Tree Index Information");
    println!("{}", "─".repeat(40));
    println!("  Document:     {}", tree.name);
    println!("  Total pages:  {}", tree.total_pages);
    println!("  Sections:     {}", tree.node_count());
    println!("  Max depth:    {}", tree.max_depth());
    if let Some(path) = location.file()? {
        if let Ok(size) = tree_size(&path) {
            println!("  File size:    {:.1} KB", size as f64 / 1024.0);
        }
        println!("  Index path:   {}", path.display());
    }
    if let Some(desc) = &tree.description {
        println!("  Description:  {}", desc);
    }
    Ok(())
}

fn cmd_list(store_dir: PathBuf) -> Result<()> {
    let store = TreeStore::open(&store_dir).context("Failed to open tree store")?;
    let ids = store.list()?;
    if ids.is_empty() {
        println!("No documents in {}", store_dir.display());
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

fn cmd_remove(id: String, store_dir: PathBuf) -> Result<()> {
    let store = TreeStore::open(&store_dir).context("Failed to open tree store")?;
    if store.delete(&id)? {
        println!("Removed {}", id);
    } else {
        println!("No tree stored for {}", id);
    }
    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("Testing LLM connection...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    let key_prefix: String = config.llm.api_key.chars().take(8).collect();
    println!("  API Key:   {}...", key_prefix);
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(config.llm);

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}
