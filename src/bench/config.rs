use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;

use super::error::HarnessError;
use super::types::{BackendDescriptor, BackendRole};

pub const DEFAULT_WARMUP_COUNT: usize = 1;
pub const DEFAULT_REPETITION_COUNT: usize = 5;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_K_RELEVANCE: usize = 3;
pub const DEFAULT_PER_CALL_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_BASELINE_BACKEND_ID: &str = "sqlite";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkConfig {
    pub warmup_count: usize,
    pub repetition_count: usize,
    pub top_k: usize,
    pub k_relevance: usize,
    pub per_call_timeout_ms: u64,
    pub baseline_backend_id: String,
    pub parallel: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            warmup_count: DEFAULT_WARMUP_COUNT,
            repetition_count: DEFAULT_REPETITION_COUNT,
            top_k: DEFAULT_TOP_K,
            k_relevance: DEFAULT_K_RELEVANCE,
            per_call_timeout_ms: DEFAULT_PER_CALL_TIMEOUT_MS,
            baseline_backend_id: DEFAULT_BASELINE_BACKEND_ID.to_string(),
            parallel: false,
        }
    }
}

impl BenchmarkConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.repetition_count < 1 {
            return Err(HarnessError::Configuration(format!(
                "repetition_count must be >= 1 (got {})",
                self.repetition_count
            )));
        }
        if self.top_k < 1 {
            return Err(HarnessError::Configuration(format!(
                "top_k must be >= 1 (got {})",
                self.top_k
            )));
        }
        if self.k_relevance < 1 {
            return Err(HarnessError::Configuration(format!(
                "k_relevance must be >= 1 (got {})",
                self.k_relevance
            )));
        }
        if self.per_call_timeout_ms < 1 {
            return Err(HarnessError::Configuration(format!(
                "per_call_timeout_ms must be >= 1 (got {})",
                self.per_call_timeout_ms
            )));
        }
        if self.baseline_backend_id.trim().is_empty() {
            return Err(HarnessError::Configuration(
                "baseline_backend_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks the backend set: ids are unique and exactly one baseline exists,
    /// carrying `baseline_backend_id`.
    pub fn validate_backends(&self, descriptors: &[BackendDescriptor]) -> Result<(), HarnessError> {
        if descriptors.is_empty() {
            return Err(HarnessError::Configuration(
                "at least one backend is required".to_string(),
            ));
        }

        let mut seen = BTreeSet::<&str>::new();
        for descriptor in descriptors {
            if descriptor.backend_id.trim().is_empty() {
                return Err(HarnessError::Configuration(
                    "backend ids must not be empty".to_string(),
                ));
            }
            if !seen.insert(descriptor.backend_id.as_str()) {
                return Err(HarnessError::Configuration(format!(
                    "duplicate backend id '{}'",
                    descriptor.backend_id
                )));
            }
        }

        let baselines = descriptors
            .iter()
            .filter(|descriptor| descriptor.role == BackendRole::Baseline)
            .collect::<Vec<&BackendDescriptor>>();
        match baselines.as_slice() {
            [baseline] if baseline.backend_id == self.baseline_backend_id => Ok(()),
            [baseline] => Err(HarnessError::Configuration(format!(
                "baseline backend is '{}' but baseline_backend_id is '{}'",
                baseline.backend_id, self.baseline_backend_id
            ))),
            [] => Err(HarnessError::Configuration(format!(
                "no backend carries the baseline role (expected '{}')",
                self.baseline_backend_id
            ))),
            _ => Err(HarnessError::Configuration(format!(
                "{} backends carry the baseline role; exactly one is allowed",
                baselines.len()
            ))),
        }
    }
}
