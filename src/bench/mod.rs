mod adapter;
mod catalog;
mod config;
mod error;
mod metrics;
mod relevance;
mod report;
mod runner;
mod timing;
mod types;

#[cfg(test)]
mod tests;

pub use adapter::{BackendAdapter, KeywordBackend, SemanticBackend};
pub use catalog::QueryCatalog;
pub use config::BenchmarkConfig;
pub use report::ComparisonReport;
pub use runner::{CancellationToken, run_comparison};
pub use types::{BackendDescriptor, BackendKind, BackendRole};
