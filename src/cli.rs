use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::bench::BenchmarkConfig;
use crate::semantic::DEFAULT_MODEL_ID;

#[derive(Parser, Debug)]
#[command(
    name = "wikifacts",
    version,
    about = "Entity fact stores and retrieval benchmarking"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Load(LoadArgs),
    Query(QueryArgs),
    ShowEntity(ShowEntityArgs),
    Status(StatusArgs),
    Compare(CompareArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    #[arg(long, default_value = ".cache/wikifacts")]
    pub cache_root: PathBuf,

    /// Entity JSON file; defaults to `<cache_root>/wikidata_samples.json`.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Load the built-in sample entities even if an input file exists.
    #[arg(long, default_value_t = false)]
    pub sample: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StoreSelection {
    Sqlite,
    Document,
    Both,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long, default_value = ".cache/wikifacts")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub query: String,

    #[arg(long, value_enum, default_value_t = StoreSelection::Both)]
    pub store: StoreSelection,

    #[arg(long, default_value_t = 5)]
    pub limit: usize,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ShowEntityArgs {
    #[arg(long, default_value = ".cache/wikifacts")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub id: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/wikifacts")]
    pub cache_root: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[arg(long, default_value = ".cache/wikifacts")]
    pub cache_root: PathBuf,

    /// Query catalog JSON; the built-in catalog is used when omitted.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Backends to compare (sqlite, document, semantic); all when omitted.
    #[arg(long = "backend")]
    pub backends: Vec<String>,

    #[arg(long, default_value = "sqlite")]
    pub baseline: String,

    #[arg(long, default_value_t = 1)]
    pub warmup: usize,

    #[arg(long, default_value_t = 5)]
    pub repetitions: usize,

    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    #[arg(long, default_value_t = 3)]
    pub k_relevance: usize,

    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    #[arg(long, default_value_t = false)]
    pub parallel: bool,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Cancel remaining work once the whole run exceeds this budget.
    #[arg(long)]
    pub run_budget_ms: Option<u64>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl CompareArgs {
    pub fn benchmark_config(&self) -> BenchmarkConfig {
        BenchmarkConfig {
            warmup_count: self.warmup,
            repetition_count: self.repetitions,
            top_k: self.top_k,
            k_relevance: self.k_relevance,
            per_call_timeout_ms: self.timeout_ms,
            baseline_backend_id: self.baseline.trim().to_string(),
            parallel: self.parallel,
        }
    }
}
