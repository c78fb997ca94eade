use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::intent::QueryIntent;
use crate::model::{EntityRecord, EntitySummary, FactDocument, QueryHit, StoreStats};

mod document;
mod sqlite;

pub use document::DocumentStore;
pub use sqlite::SqliteStore;

pub const SQLITE_FILE_NAME: &str = "wikifacts.sqlite";
pub const DOCUMENT_FILE_NAME: &str = "wikifacts_documents.json";

/// Storage contract shared by the relational and the document store.
pub trait EntityStore: Send {
    fn store_kind(&self) -> &'static str;

    fn store_entities(&mut self, entities: &[EntityRecord]) -> Result<usize>;

    fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>>;

    fn search_entities(&self, keyword: &str, limit: usize) -> Result<Vec<EntitySummary>>;

    /// Statements of `property_id` whose entity label or alias contains `subject`.
    /// Exact label matches rank first, then entity id, then statement order.
    fn find_facts(&self, subject: &str, property_id: &str, limit: usize) -> Result<Vec<QueryHit>>;

    fn fact_documents(&self) -> Result<Vec<FactDocument>>;

    fn stats(&self) -> Result<StoreStats>;
}

pub fn sqlite_path(cache_root: &Path) -> PathBuf {
    cache_root.join(SQLITE_FILE_NAME)
}

pub fn document_path(cache_root: &Path) -> PathBuf {
    cache_root.join(DOCUMENT_FILE_NAME)
}

pub fn answer_intent(
    store: &dyn EntityStore,
    intent: &QueryIntent,
    limit: usize,
) -> Result<Vec<QueryHit>> {
    match intent {
        QueryIntent::Fact { property, subject } => {
            store.find_facts(subject, property.property_id(), limit)
        }
        QueryIntent::Lookup { keyword } => Ok(store
            .search_entities(keyword, limit)?
            .into_iter()
            .map(|summary| QueryHit {
                item_id: summary.entity_id.clone(),
                entity_id: summary.entity_id,
                label: summary.label,
                value: summary.description,
            })
            .collect()),
    }
}
