use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::EntityStore;
use crate::model::{EntityRecord, EntitySummary, FactDocument, QueryHit, StoreStats, fact_id};
use crate::util::{read_json_file, write_json_pretty};

#[derive(Debug, Default, Serialize, Deserialize)]
struct DocumentFile {
    #[serde(default)]
    entities: BTreeMap<String, EntityRecord>,
}

/// One JSON document per entity, persisted as a single file.
pub struct DocumentStore {
    path: Option<PathBuf>,
    entities: BTreeMap<String, EntityRecord>,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            read_json_file::<DocumentFile>(path)?
        } else {
            DocumentFile::default()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            entities: file.entities,
        })
    }

    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!(
                "document store missing: {}; run `wikifacts load` first",
                path.display()
            );
        }
        Self::open(path)
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entities: BTreeMap::new(),
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let file = DocumentFile {
            entities: self.entities.clone(),
        };
        write_json_pretty(path, &file)
    }
}

fn contains_pattern(term: &str) -> Result<Regex> {
    RegexBuilder::new(&regex::escape(term.trim()))
        .case_insensitive(true)
        .build()
        .with_context(|| format!("failed to build search pattern for '{term}'"))
}

impl EntityStore for DocumentStore {
    fn store_kind(&self) -> &'static str {
        "document"
    }

    fn store_entities(&mut self, entities: &[EntityRecord]) -> Result<usize> {
        for entity in entities {
            self.entities
                .insert(entity.entity_id.clone(), entity.clone());
        }
        self.persist()?;
        Ok(entities.len())
    }

    fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>> {
        Ok(self.entities.get(entity_id).cloned())
    }

    fn search_entities(&self, keyword: &str, limit: usize) -> Result<Vec<EntitySummary>> {
        let pattern = contains_pattern(keyword)?;
        let results = self
            .entities
            .values()
            .filter(|entity| {
                pattern.is_match(&entity.label)
                    || pattern.is_match(&entity.description)
                    || entity.aliases.iter().any(|alias| pattern.is_match(&alias.value))
            })
            .take(limit)
            .map(|entity| EntitySummary {
                entity_id: entity.entity_id.clone(),
                label: entity.label.clone(),
                description: entity.description.clone(),
            })
            .collect();
        Ok(results)
    }

    fn find_facts(&self, subject: &str, property_id: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let pattern = contains_pattern(subject)?;
        let subject = subject.trim();

        let mut matched = self
            .entities
            .values()
            .filter(|entity| {
                pattern.is_match(&entity.label)
                    || entity.aliases.iter().any(|alias| pattern.is_match(&alias.value))
            })
            .collect::<Vec<&EntityRecord>>();
        // Stable sort keeps entity-id order among equally exact matches.
        matched.sort_by_key(|entity| !entity.label.eq_ignore_ascii_case(subject));

        let hits = matched
            .into_iter()
            .flat_map(|entity| {
                entity
                    .statements
                    .iter()
                    .filter(|statement| statement.property.property_id == property_id)
                    .map(move |statement| QueryHit {
                        item_id: fact_id(&entity.entity_id, &statement.property.property_id),
                        entity_id: entity.entity_id.clone(),
                        label: entity.label.clone(),
                        value: statement.value.clone(),
                    })
            })
            .take(limit)
            .collect();
        Ok(hits)
    }

    fn fact_documents(&self) -> Result<Vec<FactDocument>> {
        let documents = self
            .entities
            .values()
            .flat_map(|entity| {
                entity
                    .statements
                    .iter()
                    .map(move |statement| FactDocument::from_statement(entity, statement))
            })
            .collect();
        Ok(documents)
    }

    fn stats(&self) -> Result<StoreStats> {
        let properties = self
            .entities
            .values()
            .flat_map(|entity| entity.statements.iter())
            .map(|statement| statement.property.property_id.as_str())
            .collect::<HashSet<&str>>();

        Ok(StoreStats {
            entities_count: self.entities.len(),
            properties_count: properties.len(),
            statements_count: self
                .entities
                .values()
                .map(|entity| entity.statements.len())
                .sum(),
        })
    }
}
