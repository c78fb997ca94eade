use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::LoadArgs;
use crate::model::{EntityRecord, load_entity_file, sample_entities};
use crate::store::{DocumentStore, EntityStore, SqliteStore, document_path, sqlite_path};
use crate::util::ensure_directory;

pub const DEFAULT_INPUT_FILE_NAME: &str = "wikidata_samples.json";

pub fn run(args: LoadArgs) -> Result<()> {
    ensure_directory(&args.cache_root)?;

    let (entities, source) = resolve_entities(&args)?;
    if entities.is_empty() {
        bail!("no entities found in {source}");
    }
    info!(source = %source, entities = entities.len(), "entities read");

    let sqlite_path = sqlite_path(&args.cache_root);
    let document_path = document_path(&args.cache_root);
    let mut stores: Vec<Box<dyn EntityStore>> = vec![
        Box::new(SqliteStore::open(&sqlite_path)?),
        Box::new(DocumentStore::open(&document_path)?),
    ];

    for store in &mut stores {
        let started = Instant::now();
        let stored = store
            .store_entities(&entities)
            .with_context(|| format!("failed to load entities into {} store", store.store_kind()))?;
        let stats = store.stats()?;
        info!(
            store = store.store_kind(),
            stored,
            entities = stats.entities_count,
            properties = stats.properties_count,
            statements = stats.statements_count,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "entities loaded"
        );
    }

    info!(
        sqlite = %sqlite_path.display(),
        document = %document_path.display(),
        "load complete"
    );
    Ok(())
}

fn resolve_entities(args: &LoadArgs) -> Result<(Vec<EntityRecord>, String)> {
    if args.sample {
        return Ok((sample_entities(), "built-in samples".to_string()));
    }

    if let Some(input) = &args.input {
        return Ok((load_entity_file(input)?, input.display().to_string()));
    }

    let default_input = args.cache_root.join(DEFAULT_INPUT_FILE_NAME);
    if default_input.exists() {
        return Ok((
            load_entity_file(&default_input)?,
            default_input.display().to_string(),
        ));
    }

    warn!(
        path = %default_input.display(),
        "entity file missing; loading built-in samples"
    );
    Ok((sample_entities(), "built-in samples".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_populates_both_stores_from_input_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_root = dir.path().join("cache");
        let input = dir.path().join("entities.json");
        let payload = serde_json::json!({
            "Q90": {
                "entity_id": "Q90",
                "label": "Paris",
                "description": "capital of France",
                "type": "city",
                "aliases": [{"value": "City of Light", "language": "en"}],
                "statements": [
                    {"property": {"property_id": "P17", "label": "country"},
                     "value": "France", "entity_id": "Q142"}
                ]
            }
        });
        std::fs::write(&input, payload.to_string()).expect("write input");

        run(LoadArgs {
            cache_root: cache_root.clone(),
            input: Some(input),
            sample: false,
        })
        .expect("load should succeed");

        let sqlite = SqliteStore::open_read_only(&sqlite_path(&cache_root)).expect("sqlite");
        let document = DocumentStore::open_existing(&document_path(&cache_root)).expect("document");
        for store in [&sqlite as &dyn EntityStore, &document] {
            let stats = store.stats().expect("stats");
            assert_eq!(stats.entities_count, 1, "store {}", store.store_kind());
            assert_eq!(stats.statements_count, 1);
        }
    }

    #[test]
    fn load_falls_back_to_samples_without_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        run(LoadArgs {
            cache_root: dir.path().to_path_buf(),
            input: None,
            sample: false,
        })
        .expect("load should succeed");

        let sqlite = SqliteStore::open_read_only(&sqlite_path(dir.path())).expect("sqlite");
        assert_eq!(sqlite.stats().expect("stats").entities_count, 8);
    }

    #[test]
    fn load_rejects_file_without_entities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("empty.json");
        std::fs::write(&input, "[]").expect("write input");

        let error = run(LoadArgs {
            cache_root: dir.path().to_path_buf(),
            input: Some(input),
            sample: false,
        })
        .expect_err("empty input must fail");
        assert!(error.to_string().contains("no entities found"));
    }
}
