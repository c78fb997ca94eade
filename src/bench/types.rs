use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_relevant_ids: Option<BTreeSet<String>>,
}

impl Query {
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            explicit_relevant_ids: None,
        }
    }

    pub fn with_relevant_ids(mut self, relevant_ids: &[&str]) -> Self {
        self.explicit_relevant_ids = Some(relevant_ids.iter().map(|id| id.to_string()).collect());
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    Baseline,
    Candidate,
}

impl BackendRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Candidate => "candidate",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Keyword,
    Semantic,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub backend_id: String,
    pub role: BackendRole,
    pub kind: BackendKind,
}

impl BackendDescriptor {
    pub fn new(backend_id: &str, role: BackendRole, kind: BackendKind) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            role,
            kind,
        }
    }
}

/// Entity, property and statement counts of the data a backend searches.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CorpusSize {
    pub entities: usize,
    pub properties: usize,
    pub statements: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultItem {
    pub entity_id: String,
    pub rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Timeout,
    Error,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// Outcome of one call to a backend. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResult {
    backend_id: String,
    query_id: String,
    items: Vec<ResultItem>,
    elapsed_time_ms: f64,
    status: ResultStatus,
    message: Option<String>,
}

impl BackendResult {
    pub fn ok(backend_id: &str, query_id: &str, items: Vec<ResultItem>, elapsed_time_ms: f64) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            query_id: query_id.to_string(),
            items,
            elapsed_time_ms,
            status: ResultStatus::Ok,
            message: None,
        }
    }

    pub fn failed(
        backend_id: &str,
        query_id: &str,
        error: &BackendError,
        elapsed_time_ms: f64,
    ) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            query_id: query_id.to_string(),
            items: Vec::new(),
            elapsed_time_ms,
            status: error.status(),
            message: Some(error.to_string()),
        }
    }

    /// The same outcome with its elapsed time taken on the caller's clock.
    pub(crate) fn restamped(self, elapsed_time_ms: f64) -> Self {
        Self {
            elapsed_time_ms,
            ..self
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn items(&self) -> &[ResultItem] {
        &self.items
    }

    pub fn elapsed_time_ms(&self) -> f64 {
        self.elapsed_time_ms
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }

    pub fn retrieved_ids(&self) -> BTreeSet<&str> {
        self.items.iter().map(|item| item.entity_id.as_str()).collect()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceSource {
    Explicit,
    Pseudo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelevanceSet {
    pub query_id: String,
    pub relevant_ids: BTreeSet<String>,
    pub source: RelevanceSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricScore {
    pub backend_id: String,
    pub query_id: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Latency statistics over successful measured runs. `None` means every
/// measured run failed and the statistic is undefined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingStat {
    pub backend_id: String,
    pub mean_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub stddev_ms: Option<f64>,
    pub failures: usize,
    pub attempts: usize,
}

impl TimingStat {
    pub fn is_defined(&self) -> bool {
        self.mean_ms.is_some()
    }
}
