use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::HarnessError;
use super::types::Query;
use crate::util::read_json_file;

/// Ordered, immutable set of benchmark queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCatalog {
    queries: Vec<Query>,
}

impl QueryCatalog {
    pub fn new(queries: Vec<Query>) -> Self {
        Self { queries }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        read_json_file(path)
    }

    pub fn default_catalog() -> Self {
        Self::new(vec![
            Query::new("china-capital", "What is the capital of China?")
                .with_relevant_ids(&["Q148_capital_value"]),
            Query::new("china-population", "What is the population of China?"),
            Query::new("france-capital", "What is the capital of France?"),
            Query::new("france-population", "What is the population of France?"),
            Query::new(
                "united-states-capital",
                "What is the capital of the United States?",
            ),
            Query::new("india-population", "What is the population of India?"),
        ])
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.is_empty() {
            return Err(HarnessError::Configuration(
                "query catalog is empty".to_string(),
            ));
        }

        let mut seen = BTreeSet::<&str>::new();
        for query in &self.queries {
            if query.id.trim().is_empty() {
                return Err(HarnessError::Configuration(
                    "query ids must not be empty".to_string(),
                ));
            }
            if !seen.insert(query.id.as_str()) {
                return Err(HarnessError::Configuration(format!(
                    "duplicate query id '{}'",
                    query.id
                )));
            }
            if query.text.trim().is_empty() {
                return Err(HarnessError::Configuration(format!(
                    "query '{}' has empty text",
                    query.id
                )));
            }
        }
        Ok(())
    }

    /// Content hash over ids, texts and judgments in catalog order.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for query in &self.queries {
            hasher.update(query.id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(query.text.as_bytes());
            if let Some(relevant_ids) = &query.explicit_relevant_ids {
                for relevant_id in relevant_ids {
                    hasher.update([0x1f]);
                    hasher.update(relevant_id.as_bytes());
                }
            }
            hasher.update([0x1e]);
        }
        format!("{:x}", hasher.finalize())
    }
}
