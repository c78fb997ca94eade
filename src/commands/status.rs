use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::store::{DocumentStore, EntityStore, SqliteStore, document_path, sqlite_path};

pub fn run(args: StatusArgs) -> Result<()> {
    let sqlite_path = sqlite_path(&args.cache_root);
    let document_path = document_path(&args.cache_root);
    let reports_dir = args.cache_root.join("reports");

    info!(cache_root = %args.cache_root.display(), "status requested");

    if sqlite_path.exists() {
        let store = SqliteStore::open_read_only(&sqlite_path)?;
        let stats = store.stats()?;
        let last_loaded_at = store
            .last_loaded_at()?
            .map(|value| value.to_rfc3339())
            .unwrap_or_default();
        info!(
            path = %sqlite_path.display(),
            entities = stats.entities_count,
            properties = stats.properties_count,
            statements = stats.statements_count,
            last_loaded_at = %last_loaded_at,
            "sqlite store status"
        );
    } else {
        warn!(path = %sqlite_path.display(), "sqlite store missing");
    }

    if document_path.exists() {
        let store = DocumentStore::open_existing(&document_path)?;
        let stats = store.stats()?;
        info!(
            path = %document_path.display(),
            entities = stats.entities_count,
            properties = stats.properties_count,
            statements = stats.statements_count,
            "document store status"
        );
    } else {
        warn!(path = %document_path.display(), "document store missing");
    }

    if reports_dir.exists() {
        let (count, latest) = report_summary(&reports_dir)?;
        info!(
            path = %reports_dir.display(),
            reports = count,
            latest = %latest.unwrap_or_default(),
            "comparison reports"
        );
    } else {
        warn!(path = %reports_dir.display(), "no comparison reports yet");
    }

    Ok(())
}

/// Number of `comparison-*.json` reports and the lexically newest name.
fn report_summary(reports_dir: &Path) -> Result<(usize, Option<String>)> {
    let entries = fs::read_dir(reports_dir)
        .with_context(|| format!("failed to read {}", reports_dir.display()))?;

    let mut names = Vec::<String>::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", reports_dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("comparison-") && name.ends_with(".json") {
            names.push(name);
        }
    }
    names.sort();
    Ok((names.len(), names.pop()))
}
