use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use super::output::{write_json_report, write_text_report};
use crate::bench::{
    BackendAdapter, BackendDescriptor, BackendKind, BackendRole, CancellationToken,
    ComparisonReport, KeywordBackend, QueryCatalog, SemanticBackend, run_comparison,
};
use crate::cli::CompareArgs;
use crate::semantic::{EmbeddingModel, ModelScope};
use crate::store::{DocumentStore, EntityStore, SqliteStore, document_path, sqlite_path};
use crate::util::{utc_compact_string, write_json_pretty};

pub(super) const SQLITE_BACKEND_ID: &str = "sqlite";
pub(super) const DOCUMENT_BACKEND_ID: &str = "document";
pub(super) const SEMANTIC_BACKEND_ID: &str = "semantic";
const KNOWN_BACKENDS: [&str; 3] = [SQLITE_BACKEND_ID, DOCUMENT_BACKEND_ID, SEMANTIC_BACKEND_ID];

pub fn run(args: CompareArgs) -> Result<()> {
    let (report, report_path) = execute(&args)?;

    if args.json {
        write_json_report(&report)
    } else {
        write_text_report(&report, &report_path)
    }
}

pub(super) fn execute(args: &CompareArgs) -> Result<(ComparisonReport, PathBuf)> {
    let config = args.benchmark_config();
    let catalog = match &args.catalog {
        Some(path) => QueryCatalog::from_json_file(path)?,
        None => QueryCatalog::default_catalog(),
    };
    let selected = selected_backends(&args.backends)?;
    info!(
        queries = catalog.len(),
        catalog_checksum = %catalog.checksum(),
        backends = %selected.join(","),
        baseline = %config.baseline_backend_id,
        "comparison requested"
    );

    let model_scope = ModelScope::acquire(&args.model_id)?;
    let report = {
        let backends = build_backends(
            &args.cache_root,
            &selected,
            &config.baseline_backend_id,
            &model_scope,
        );
        let cancel = CancellationToken::new();
        let _budget = args
            .run_budget_ms
            .map(|budget_ms| RunBudget::arm(budget_ms, &cancel))
            .transpose()?;
        run_comparison(&config, &catalog, backends, &cancel).context("comparison run failed")?
    };
    drop(model_scope);

    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| default_report_path(&args.cache_root));
    write_json_pretty(&report_path, &report)?;
    info!(path = %report_path.display(), run_id = %report.run_id, "comparison report written");

    Ok((report, report_path))
}

pub(super) fn selected_backends(requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(KNOWN_BACKENDS.iter().map(|id| id.to_string()).collect());
    }

    let mut selected = Vec::<String>::with_capacity(requested.len());
    for value in requested {
        let backend_id = value.trim().to_ascii_lowercase();
        if !KNOWN_BACKENDS.contains(&backend_id.as_str()) {
            bail!(
                "unknown backend '{}'; expected one of: {}",
                value,
                KNOWN_BACKENDS.join(", ")
            );
        }
        selected.push(backend_id);
    }
    Ok(selected)
}

fn descriptor(backend_id: &str, baseline_id: &str, kind: BackendKind) -> BackendDescriptor {
    let role = if backend_id == baseline_id {
        BackendRole::Baseline
    } else {
        BackendRole::Candidate
    };
    BackendDescriptor::new(backend_id, role, kind)
}

/// Opens every selected backend. A store that fails to open still yields a
/// backend, which then reports itself unavailable to the harness.
fn build_backends(
    cache_root: &Path,
    selected: &[String],
    baseline_id: &str,
    model_scope: &ModelScope,
) -> Vec<Arc<dyn BackendAdapter>> {
    selected
        .iter()
        .map(|backend_id| -> Arc<dyn BackendAdapter> {
            match backend_id.as_str() {
                SEMANTIC_BACKEND_ID => Arc::new(semantic_backend(
                    cache_root,
                    descriptor(backend_id, baseline_id, BackendKind::Semantic),
                    model_scope.model(),
                )),
                _ => Arc::new(keyword_backend(
                    cache_root,
                    descriptor(backend_id, baseline_id, BackendKind::Keyword),
                )),
            }
        })
        .collect()
}

fn open_store(cache_root: &Path, backend_id: &str) -> Result<Box<dyn EntityStore>> {
    if backend_id == DOCUMENT_BACKEND_ID {
        Ok(Box::new(DocumentStore::open_existing(&document_path(
            cache_root,
        ))?))
    } else {
        Ok(Box::new(SqliteStore::open_read_only(&sqlite_path(
            cache_root,
        ))?))
    }
}

fn keyword_backend(cache_root: &Path, descriptor: BackendDescriptor) -> KeywordBackend {
    match open_store(cache_root, &descriptor.backend_id) {
        Ok(store) => {
            if let Ok(stats) = store.stats() {
                info!(
                    backend_id = %descriptor.backend_id,
                    entities = stats.entities_count,
                    properties = stats.properties_count,
                    statements = stats.statements_count,
                    "keyword backend opened"
                );
            }
            KeywordBackend::new(descriptor, store)
        }
        Err(err) => {
            let reason = format!("{err:#}");
            KeywordBackend::unavailable(descriptor, reason)
        }
    }
}

/// The semantic index is built from the relational store, falling back to the
/// document store.
fn semantic_backend(
    cache_root: &Path,
    descriptor: BackendDescriptor,
    model: Arc<EmbeddingModel>,
) -> SemanticBackend {
    let documents = [SQLITE_BACKEND_ID, DOCUMENT_BACKEND_ID]
        .iter()
        .find_map(|source| {
            match open_store(cache_root, source).and_then(|store| store.fact_documents()) {
                Ok(documents) if !documents.is_empty() => Some(documents),
                Ok(_) => None,
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(source = %source, error = %error, "semantic corpus source unusable");
                    None
                }
            }
        })
        .unwrap_or_default();

    let backend = SemanticBackend::new(descriptor, model, documents);
    info!(facts = backend.corpus_len(), "semantic backend indexed");
    backend
}

fn default_report_path(cache_root: &Path) -> PathBuf {
    cache_root
        .join("reports")
        .join(format!("comparison-{}.json", utc_compact_string(Utc::now())))
}

/// Cancels the comparison once `budget_ms` elapses unless dropped first.
pub(super) struct RunBudget {
    disarm: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RunBudget {
    pub(super) fn arm(budget_ms: u64, cancel: &CancellationToken) -> Result<Self> {
        let (disarm, disarmed) = mpsc::channel::<()>();
        let cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("run-budget".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) =
                    disarmed.recv_timeout(Duration::from_millis(budget_ms))
                {
                    warn!(budget_ms, "run budget exhausted; cancelling remaining units");
                    cancel.cancel();
                }
            })
            .context("failed to spawn run budget thread")?;

        Ok(Self {
            disarm: Some(disarm),
            handle: Some(handle),
        })
    }
}

impl Drop for RunBudget {
    fn drop(&mut self) {
        self.disarm = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
