use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::util::read_json_file;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub aliases: Vec<EntityAlias>,
    #[serde(default)]
    pub statements: Vec<EntityStatement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAlias {
    pub value: String,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStatement {
    pub property: PropertyRef,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRef {
    pub property_id: String,
    #[serde(default)]
    pub label: String,
}

/// Entity files come either keyed by entity id or as a plain list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntityFile {
    Keyed(BTreeMap<String, EntityRecord>),
    Listed(Vec<EntityRecord>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub label: String,
    pub description: String,
}

/// One answer row produced by a store for a natural-language query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub item_id: String,
    pub entity_id: String,
    pub label: String,
    pub value: String,
}

/// A statement flattened into searchable text for the semantic index.
#[derive(Debug, Clone, PartialEq)]
pub struct FactDocument {
    pub fact_id: String,
    pub entity_id: String,
    pub property_id: String,
    pub text: String,
}

impl FactDocument {
    pub fn from_statement(entity: &EntityRecord, statement: &EntityStatement) -> Self {
        Self {
            fact_id: fact_id(&entity.entity_id, &statement.property.property_id),
            entity_id: entity.entity_id.clone(),
            property_id: statement.property.property_id.clone(),
            text: fact_document_text(entity, statement),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entities_count: usize,
    pub properties_count: usize,
    pub statements_count: usize,
}

pub fn load_entity_file(path: &Path) -> Result<Vec<EntityRecord>> {
    let file: EntityFile = read_json_file(path)?;
    let mut entities = match file {
        EntityFile::Keyed(map) => map.into_values().collect::<Vec<EntityRecord>>(),
        EntityFile::Listed(list) => list,
    };
    entities.retain(|entity| !entity.entity_id.trim().is_empty());
    Ok(entities)
}

pub fn property_slug(property_id: &str) -> String {
    let slug = match property_id.trim().to_ascii_uppercase().as_str() {
        "P36" => "capital",
        "P1082" => "population",
        "P37" => "official_language",
        "P17" => "country",
        "P30" => "continent",
        "P38" => "currency",
        "P35" => "head_of_state",
        "P6" => "head_of_government",
        _ => return property_id.trim().to_ascii_lowercase(),
    };
    slug.to_string()
}

pub fn fact_id(entity_id: &str, property_id: &str) -> String {
    format!("{}_{}_value", entity_id, property_slug(property_id))
}

pub fn fact_document_text(entity: &EntityRecord, statement: &EntityStatement) -> String {
    let mut parts = vec![entity.label.clone()];
    parts.extend(entity.aliases.iter().map(|alias| alias.value.clone()));
    parts.push(statement.property.label.clone());
    parts.push(statement.value.clone());
    parts
        .into_iter()
        .filter(|value| !value.trim().is_empty())
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn sample_entities() -> Vec<EntityRecord> {
    vec![
        sample_entity(
            ("Q148", "China", "country in East Asia", "country"),
            &[
                ("People's Republic of China", "en"),
                ("PRC", "en"),
                ("中华人民共和国", "zh"),
            ],
            &[
                ("P36", "capital", "Beijing", Some("Q956")),
                ("P37", "official language", "Standard Chinese", None),
                ("P1082", "population", "1.4 billion", None),
            ],
        ),
        sample_entity(
            ("Q956", "Beijing", "capital of the People's Republic of China", "city"),
            &[("Peking", "en"), ("北京", "zh")],
            &[
                ("P17", "country", "China", Some("Q148")),
                ("P1082", "population", "21.54 million", None),
            ],
        ),
        sample_entity(
            ("Q142", "France", "country in Western Europe", "country"),
            &[("French Republic", "en")],
            &[
                ("P36", "capital", "Paris", Some("Q90")),
                ("P37", "official language", "French", None),
                ("P1082", "population", "67 million", None),
            ],
        ),
        sample_entity(
            ("Q90", "Paris", "capital city of France", "city"),
            &[("City of Light", "en")],
            &[
                ("P17", "country", "France", Some("Q142")),
                ("P1082", "population", "2.1 million", None),
            ],
        ),
        sample_entity(
            ("Q30", "United States", "country in North America", "country"),
            &[("United States of America", "en"), ("USA", "en")],
            &[
                ("P36", "capital", "Washington, D.C.", Some("Q61")),
                ("P1082", "population", "331 million", None),
            ],
        ),
        sample_entity(
            ("Q61", "Washington, D.C.", "capital city of the United States", "city"),
            &[("District of Columbia", "en")],
            &[("P17", "country", "United States", Some("Q30"))],
        ),
        sample_entity(
            ("Q668", "India", "country in South Asia", "country"),
            &[("Republic of India", "en"), ("Bharat", "en")],
            &[
                ("P36", "capital", "New Delhi", Some("Q987")),
                ("P1082", "population", "1.38 billion", None),
            ],
        ),
        sample_entity(
            ("Q987", "New Delhi", "capital city of India", "city"),
            &[],
            &[("P17", "country", "India", Some("Q668"))],
        ),
    ]
}

fn sample_entity(
    (entity_id, label, description, entity_type): (&str, &str, &str, &str),
    aliases: &[(&str, &str)],
    statements: &[(&str, &str, &str, Option<&str>)],
) -> EntityRecord {
    EntityRecord {
        entity_id: entity_id.to_string(),
        label: label.to_string(),
        description: description.to_string(),
        entity_type: entity_type.to_string(),
        aliases: aliases
            .iter()
            .map(|(value, language)| EntityAlias {
                value: value.to_string(),
                language: language.to_string(),
            })
            .collect(),
        statements: statements
            .iter()
            .map(|(property_id, property_label, value, target)| EntityStatement {
                property: PropertyRef {
                    property_id: property_id.to_string(),
                    label: property_label.to_string(),
                },
                value: value.to_string(),
                entity_id: target.map(str::to_string),
            })
            .collect(),
    }
}
