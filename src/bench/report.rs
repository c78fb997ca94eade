use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::catalog::QueryCatalog;
use super::config::BenchmarkConfig;
use super::relevance::RelevanceOutcome;
use super::timing::UnitMeasurement;
use super::types::{
    BackendDescriptor, BackendKind, BackendResult, BackendRole, CorpusSize, MetricScore,
    RelevanceSet, ResultStatus, TimingStat,
};
use crate::util::{now_utc_string, utc_compact_string};

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub run_id: String,
    pub generated_at: String,
    pub partial: bool,
    pub config: BenchmarkConfig,
    pub catalog_checksum: String,
    pub query_ids: Vec<String>,
    pub backends: Vec<BackendSummary>,
    pub per_query: Vec<MetricScore>,
    pub per_query_timing: Vec<UnitTiming>,
    pub relevance_sets: Vec<RelevanceSet>,
    pub unresolved_queries: Vec<String>,
    pub unresolved_details: Vec<UnresolvedQuery>,
    pub unavailable_backends: Vec<UnavailableBackend>,
    pub failed_units: Vec<FailedUnit>,
    pub latency_ranking: Vec<LatencyRank>,
    pub chart_series: ChartSeries,
}

impl ComparisonReport {
    pub fn backend(&self, backend_id: &str) -> Option<&BackendSummary> {
        self.backends
            .iter()
            .find(|backend| backend.backend_id == backend_id)
    }

    pub fn score(&self, backend_id: &str, query_id: &str) -> Option<&MetricScore> {
        self.per_query
            .iter()
            .find(|score| score.backend_id == backend_id && score.query_id == query_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendSummary {
    pub backend_id: String,
    pub kind: BackendKind,
    pub role: BackendRole,
    pub timing: TimingStat,
    pub metrics_summary: Option<MetricsSummary>,
    pub corpus_size: Option<CorpusSize>,
    /// Mean latency per thousand searched statements; `None` when either the
    /// latency or a non-empty corpus size is missing.
    pub mean_ms_per_1k_statements: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub scored_queries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitTiming {
    pub query_id: String,
    #[serde(flatten)]
    pub timing: TimingStat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedQuery {
    pub query_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableBackend {
    pub backend_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUnit {
    pub backend_id: String,
    pub query_id: String,
    pub status: ResultStatus,
    pub message: Option<String>,
    pub failures: usize,
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyRank {
    pub backend_id: String,
    pub mean_ms: f64,
    pub ratio_to_fastest: Option<f64>,
}

/// Bar-chart input: one category per backend with parallel value arrays.
/// `None` entries are undefined values, not zeros.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub categories: Vec<String>,
    pub latency_ms: Vec<Option<f64>>,
    pub f1: Vec<Option<f64>>,
}

/// Completed state of a comparison run, aggregated into a report without
/// recomputing any metric.
pub(crate) struct ReportBuilder<'a> {
    pub(crate) config: &'a BenchmarkConfig,
    pub(crate) catalog: &'a QueryCatalog,
    pub(crate) descriptors: &'a [BackendDescriptor],
    pub(crate) units: &'a [UnitMeasurement],
    pub(crate) relevance: &'a [RelevanceOutcome],
    pub(crate) scores: &'a [MetricScore],
    pub(crate) corpus_sizes: &'a BTreeMap<String, CorpusSize>,
    pub(crate) unavailable: &'a [UnavailableBackend],
    pub(crate) partial: bool,
}

impl ReportBuilder<'_> {
    pub(crate) fn build(&self, started_at: DateTime<Utc>) -> ComparisonReport {
        let backends = self
            .descriptors
            .iter()
            .map(|descriptor| {
                let timing = self.backend_timing(&descriptor.backend_id);
                let corpus_size = self.corpus_sizes.get(&descriptor.backend_id).copied();
                BackendSummary {
                    backend_id: descriptor.backend_id.clone(),
                    kind: descriptor.kind,
                    role: descriptor.role,
                    mean_ms_per_1k_statements: per_1k_statements(timing.mean_ms, corpus_size),
                    metrics_summary: self.metrics_summary(&descriptor.backend_id),
                    timing,
                    corpus_size,
                }
            })
            .collect::<Vec<BackendSummary>>();

        let latency_ranking = latency_ranking(&backends);
        let chart_series = ChartSeries {
            categories: backends
                .iter()
                .map(|backend| backend.backend_id.clone())
                .collect(),
            latency_ms: backends.iter().map(|backend| backend.timing.mean_ms).collect(),
            f1: backends
                .iter()
                .map(|backend| backend.metrics_summary.as_ref().map(|summary| summary.f1))
                .collect(),
        };

        let mut relevance_sets = Vec::<RelevanceSet>::new();
        let mut unresolved_details = Vec::<UnresolvedQuery>::new();
        for outcome in self.relevance {
            match outcome {
                RelevanceOutcome::Resolved(set) => relevance_sets.push(set.as_ref().clone()),
                RelevanceOutcome::Unresolved { query_id, reason } => {
                    unresolved_details.push(UnresolvedQuery {
                        query_id: query_id.clone(),
                        reason: reason.clone(),
                    })
                }
            }
        }

        ComparisonReport {
            run_id: format!("cmp-{}", utc_compact_string(started_at)),
            generated_at: now_utc_string(),
            partial: self.partial,
            config: self.config.clone(),
            catalog_checksum: self.catalog.checksum(),
            query_ids: self
                .catalog
                .queries()
                .iter()
                .map(|query| query.id.clone())
                .collect(),
            backends,
            per_query: self.scores.to_vec(),
            per_query_timing: self
                .units
                .iter()
                .map(|unit| UnitTiming {
                    query_id: unit.query_id.clone(),
                    timing: unit.timing.clone(),
                })
                .collect(),
            relevance_sets,
            unresolved_queries: unresolved_details
                .iter()
                .map(|unresolved| unresolved.query_id.clone())
                .collect(),
            unresolved_details,
            unavailable_backends: self.unavailable.to_vec(),
            failed_units: self.failed_units(),
            latency_ranking,
            chart_series,
        }
    }

    /// Pools every measured run of the backend across queries.
    fn backend_timing(&self, backend_id: &str) -> TimingStat {
        let runs = self
            .units
            .iter()
            .filter(|unit| unit.backend_id == backend_id)
            .flat_map(|unit| unit.measured_runs.iter().cloned())
            .collect::<Vec<BackendResult>>();
        TimingStat::from_runs(backend_id, &runs)
    }

    fn metrics_summary(&self, backend_id: &str) -> Option<MetricsSummary> {
        let scores = self
            .scores
            .iter()
            .filter(|score| score.backend_id == backend_id)
            .collect::<Vec<&MetricScore>>();
        if scores.is_empty() {
            return None;
        }

        let count = scores.len() as f64;
        Some(MetricsSummary {
            precision: scores.iter().map(|score| score.precision).sum::<f64>() / count,
            recall: scores.iter().map(|score| score.recall).sum::<f64>() / count,
            f1: scores.iter().map(|score| score.f1).sum::<f64>() / count,
            scored_queries: scores.len(),
        })
    }

    fn failed_units(&self) -> Vec<FailedUnit> {
        self.units
            .iter()
            .filter(|unit| !unit.timing.is_defined())
            .map(|unit| {
                let last_failure = unit.last_failure();
                FailedUnit {
                    backend_id: unit.backend_id.clone(),
                    query_id: unit.query_id.clone(),
                    status: last_failure.map_or(ResultStatus::Error, BackendResult::status),
                    message: last_failure.and_then(|run| run.message().map(str::to_string)),
                    failures: unit.timing.failures,
                    attempts: unit.timing.attempts,
                }
            })
            .collect()
    }
}

fn per_1k_statements(mean_ms: Option<f64>, corpus_size: Option<CorpusSize>) -> Option<f64> {
    let statements = corpus_size?.statements;
    if statements == 0 {
        return None;
    }
    mean_ms.map(|mean_ms| mean_ms * 1000.0 / statements as f64)
}

fn latency_ranking(backends: &[BackendSummary]) -> Vec<LatencyRank> {
    let mut defined = backends
        .iter()
        .filter_map(|backend| {
            backend
                .timing
                .mean_ms
                .map(|mean_ms| (backend.backend_id.as_str(), mean_ms))
        })
        .collect::<Vec<(&str, f64)>>();
    defined.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(right.0)));

    let fastest = defined.first().map(|(_, mean_ms)| *mean_ms);
    defined
        .into_iter()
        .map(|(backend_id, mean_ms)| LatencyRank {
            backend_id: backend_id.to_string(),
            mean_ms,
            ratio_to_fastest: fastest
                .filter(|fastest| *fastest > 0.0)
                .map(|fastest| mean_ms / fastest),
        })
        .collect()
}
