use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::adapter::BackendAdapter;
use super::catalog::QueryCatalog;
use super::config::BenchmarkConfig;
use super::error::HarnessError;
use super::metrics::score_result;
use super::relevance::{BaselineEvidence, RelevanceOutcome, resolve_relevance};
use super::report::{ComparisonReport, ReportBuilder, UnavailableBackend};
use super::timing::{BackendWorker, UnitMeasurement, measure_unit};
use super::types::{BackendDescriptor, CorpusSize, MetricScore, RelevanceSet};

/// Shared flag checked between (backend, query) units.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A metric score together with the relevance set it was computed against.
pub(crate) struct ScoredUnit {
    pub(crate) relevance: Arc<RelevanceSet>,
    pub(crate) score: MetricScore,
}

struct BackendRun {
    units: Vec<UnitMeasurement>,
    interrupted: bool,
}

/// Runs the full comparison: validation, availability probes, timed units,
/// relevance resolution, scoring and report aggregation.
pub fn run_comparison(
    config: &BenchmarkConfig,
    catalog: &QueryCatalog,
    backends: Vec<Arc<dyn BackendAdapter>>,
    cancel: &CancellationToken,
) -> Result<ComparisonReport, HarnessError> {
    config.validate()?;
    catalog.validate()?;
    let descriptors = backends
        .iter()
        .map(|backend| backend.identity())
        .collect::<Vec<BackendDescriptor>>();
    config.validate_backends(&descriptors)?;

    if config.k_relevance > config.top_k {
        warn!(
            k_relevance = config.k_relevance,
            top_k = config.top_k,
            "k_relevance exceeds top_k; pseudo-relevant sets are capped by the baseline's result size"
        );
    }

    let started_at = Utc::now();
    let started = Instant::now();

    let mut usable = Vec::<(BackendDescriptor, Arc<dyn BackendAdapter>)>::new();
    let mut unavailable = Vec::<UnavailableBackend>::new();
    let mut corpus_sizes = BTreeMap::<String, CorpusSize>::new();
    for (descriptor, backend) in descriptors.into_iter().zip(backends) {
        match backend.check_available() {
            Ok(()) => {
                if let Some(size) = backend.corpus_size() {
                    info!(
                        backend_id = %descriptor.backend_id,
                        entities = size.entities,
                        properties = size.properties,
                        statements = size.statements,
                        "backend corpus size"
                    );
                    corpus_sizes.insert(descriptor.backend_id.clone(), size);
                }
                usable.push((descriptor, backend));
            }
            Err(error) => {
                warn!(
                    backend_id = %descriptor.backend_id,
                    error = %error,
                    "backend unavailable; excluded from this run"
                );
                unavailable.push(UnavailableBackend {
                    backend_id: descriptor.backend_id,
                    reason: error.to_string(),
                });
            }
        }
    }

    if usable.is_empty() {
        let reasons = unavailable
            .iter()
            .map(|backend| format!("{}: {}", backend.backend_id, backend.reason))
            .collect::<Vec<String>>()
            .join("; ");
        return Err(HarnessError::NoUsableBackends(reasons));
    }

    info!(
        backends = usable.len(),
        unavailable = unavailable.len(),
        queries = catalog.len(),
        warmup_count = config.warmup_count,
        repetition_count = config.repetition_count,
        parallel = config.parallel,
        "comparison started"
    );

    let runs = if config.parallel {
        run_parallel(config, catalog, &usable, cancel)
    } else {
        usable
            .iter()
            .map(|(_, backend)| run_backend(config, catalog, Arc::clone(backend), cancel))
            .collect::<Vec<BackendRun>>()
    };

    let partial = runs.iter().any(|run| run.interrupted);
    let units = runs
        .into_iter()
        .flat_map(|run| run.units)
        .collect::<Vec<UnitMeasurement>>();

    let relevance = resolve_catalog(config, catalog, &units);
    let scored = score_units(&units, catalog, &relevance);
    let scores = scored
        .into_iter()
        .map(|unit| {
            debug!(
                backend_id = %unit.score.backend_id,
                query_id = %unit.score.query_id,
                relevance_source = ?unit.relevance.source,
                relevant = unit.relevance.relevant_ids.len(),
                f1 = unit.score.f1,
                "unit scored"
            );
            unit.score
        })
        .collect::<Vec<MetricScore>>();

    let usable_descriptors = usable
        .into_iter()
        .map(|(descriptor, _)| descriptor)
        .collect::<Vec<BackendDescriptor>>();
    let report = ReportBuilder {
        config,
        catalog,
        descriptors: &usable_descriptors,
        units: &units,
        relevance: &relevance,
        scores: &scores,
        corpus_sizes: &corpus_sizes,
        unavailable: &unavailable,
        partial,
    }
    .build(started_at);

    info!(
        run_id = %report.run_id,
        partial = report.partial,
        units = units.len(),
        scored = report.per_query.len(),
        unresolved = report.unresolved_queries.len(),
        failed_units = report.failed_units.len(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "comparison finished"
    );
    Ok(report)
}

fn run_backend(
    config: &BenchmarkConfig,
    catalog: &QueryCatalog,
    backend: Arc<dyn BackendAdapter>,
    cancel: &CancellationToken,
) -> BackendRun {
    let mut worker = BackendWorker::new(backend);
    let mut units = Vec::<UnitMeasurement>::with_capacity(catalog.len());

    for query in catalog.queries() {
        if cancel.is_cancelled() {
            warn!(
                backend_id = %worker.backend_id(),
                completed = units.len(),
                remaining = catalog.len() - units.len(),
                "comparison cancelled; skipping remaining queries"
            );
            return BackendRun {
                units,
                interrupted: true,
            };
        }
        units.push(measure_unit(&mut worker, query, config));
    }

    if worker.spawned() > 1 {
        info!(
            backend_id = %worker.backend_id(),
            workers_spawned = worker.spawned(),
            "backend workers respawned after abandoned calls"
        );
    }

    BackendRun {
        units,
        interrupted: false,
    }
}

/// One thread per backend; each backend keeps its own worker and resources.
fn run_parallel(
    config: &BenchmarkConfig,
    catalog: &QueryCatalog,
    usable: &[(BackendDescriptor, Arc<dyn BackendAdapter>)],
    cancel: &CancellationToken,
) -> Vec<BackendRun> {
    thread::scope(|scope| {
        let handles = usable
            .iter()
            .map(|(descriptor, backend)| {
                let backend = Arc::clone(backend);
                let handle = scope.spawn(move || run_backend(config, catalog, backend, cancel));
                (descriptor.backend_id.as_str(), handle)
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|(backend_id, handle)| match handle.join() {
                Ok(run) => run,
                Err(_) => {
                    warn!(backend_id = %backend_id, "backend thread panicked; its units are lost");
                    BackendRun {
                        units: Vec::new(),
                        interrupted: true,
                    }
                }
            })
            .collect()
    })
}

/// Resolves each catalog query exactly once, in catalog order.
pub(crate) fn resolve_catalog(
    config: &BenchmarkConfig,
    catalog: &QueryCatalog,
    units: &[UnitMeasurement],
) -> Vec<RelevanceOutcome> {
    let baseline_units = units
        .iter()
        .filter(|unit| unit.backend_id == config.baseline_backend_id)
        .map(|unit| (unit.query_id.as_str(), unit))
        .collect::<BTreeMap<&str, &UnitMeasurement>>();

    catalog
        .queries()
        .iter()
        .map(|query| {
            let evidence = match baseline_units.get(query.id.as_str()) {
                Some(unit) => match unit.representative() {
                    Some(result) => BaselineEvidence::Succeeded(result),
                    None => BaselineEvidence::Failed(unit.last_failure()),
                },
                None => BaselineEvidence::Missing,
            };
            let outcome = resolve_relevance(
                query,
                &config.baseline_backend_id,
                evidence,
                config.k_relevance,
            );
            if let RelevanceOutcome::Unresolved { query_id, reason } = &outcome {
                warn!(
                    query_id = %query_id,
                    reason = %reason,
                    "relevance unresolved; query excluded from metrics"
                );
            }
            outcome
        })
        .collect()
}

/// Scores every unit with a usable result against its query's shared set.
pub(crate) fn score_units(
    units: &[UnitMeasurement],
    catalog: &QueryCatalog,
    relevance: &[RelevanceOutcome],
) -> Vec<ScoredUnit> {
    let sets = catalog
        .queries()
        .iter()
        .zip(relevance)
        .filter_map(|(query, outcome)| {
            outcome
                .relevance_set()
                .map(|set| (query.id.as_str(), Arc::clone(set)))
        })
        .collect::<BTreeMap<&str, Arc<RelevanceSet>>>();

    let mut scored = Vec::<ScoredUnit>::new();
    for query in catalog.queries() {
        let Some(set) = sets.get(query.id.as_str()) else {
            continue;
        };
        for unit in units.iter().filter(|unit| unit.query_id == query.id) {
            let Some(result) = unit.representative() else {
                continue;
            };
            scored.push(ScoredUnit {
                relevance: Arc::clone(set),
                score: score_result(result, set),
            });
        }
    }
    scored
}
