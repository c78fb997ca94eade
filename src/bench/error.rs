use thiserror::Error;

use super::types::ResultStatus;

/// Failure of a single backend call or of a backend's setup probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("query timed out after {timeout_ms} ms during {stage}")]
    Timeout { timeout_ms: u64, stage: String },

    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("backend call failed: {0}")]
    Failed(String),
}

impl BackendError {
    pub fn status(&self) -> ResultStatus {
        match self {
            Self::Timeout { .. } => ResultStatus::Timeout,
            Self::Unavailable(_) | Self::MalformedQuery(_) | Self::Failed(_) => ResultStatus::Error,
        }
    }
}

/// Errors that abort a comparison run before or instead of producing a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error("invalid benchmark configuration: {0}")]
    Configuration(String),

    #[error("no usable backends: {0}")]
    NoUsableBackends(String),
}
