use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use super::output::{write_json_response, write_text_response};
use crate::cli::{QueryArgs, StoreSelection};
use crate::intent::{QueryIntent, classify_query};
use crate::model::QueryHit;
use crate::store::{
    DocumentStore, EntityStore, SqliteStore, answer_intent, document_path, sqlite_path,
};

#[derive(Debug, Serialize)]
pub(super) struct StoreAnswer {
    pub(super) store: &'static str,
    pub(super) duration_ms: f64,
    pub(super) returned: usize,
    pub(super) hits: Vec<QueryHit>,
}

#[derive(Debug, Serialize)]
pub(super) struct QueryResponse {
    pub(super) query: String,
    pub(super) intent: QueryIntent,
    pub(super) limit: usize,
    pub(super) answers: Vec<StoreAnswer>,
}

pub fn run(args: QueryArgs) -> Result<()> {
    let query_text = args.query.trim();
    if query_text.is_empty() {
        bail!("--query must not be empty");
    }
    if args.limit == 0 {
        bail!("--limit must be >= 1");
    }

    let intent = classify_query(query_text)
        .with_context(|| format!("query '{query_text}' has no searchable content"))?;
    info!(query = %query_text, ?intent, "query classified");

    let stores = open_selected_stores(&args.cache_root, args.store)?;
    let answers = stores
        .iter()
        .map(|store| answer_with_timing(store.as_ref(), &intent, args.limit))
        .collect::<Result<Vec<StoreAnswer>>>()?;

    let response = QueryResponse {
        query: query_text.to_string(),
        intent,
        limit: args.limit,
        answers,
    };

    if args.json {
        write_json_response(&response)
    } else {
        write_text_response(&response)
    }
}

fn open_selected_stores(
    cache_root: &Path,
    selection: StoreSelection,
) -> Result<Vec<Box<dyn EntityStore>>> {
    let mut stores = Vec::<Box<dyn EntityStore>>::new();
    if matches!(selection, StoreSelection::Sqlite | StoreSelection::Both) {
        stores.push(Box::new(SqliteStore::open_read_only(&sqlite_path(cache_root))?));
    }
    if matches!(selection, StoreSelection::Document | StoreSelection::Both) {
        stores.push(Box::new(DocumentStore::open_existing(&document_path(
            cache_root,
        ))?));
    }
    Ok(stores)
}

pub(super) fn answer_with_timing(
    store: &dyn EntityStore,
    intent: &QueryIntent,
    limit: usize,
) -> Result<StoreAnswer> {
    let started = Instant::now();
    let hits = answer_intent(store, intent, limit)
        .with_context(|| format!("{} store query failed", store.store_kind()))?;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    info!(
        store = store.store_kind(),
        returned = hits.len(),
        duration_ms,
        "store answered"
    );

    Ok(StoreAnswer {
        store: store.store_kind(),
        duration_ms,
        returned: hits.len(),
        hits,
    })
}
