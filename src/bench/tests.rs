use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::adapter::{BackendAdapter, Deadline, KeywordBackend, SemanticBackend};
use super::catalog::QueryCatalog;
use super::config::BenchmarkConfig;
use super::error::{BackendError, HarnessError};
use super::metrics::{score_result, score_sets};
use super::relevance::{BaselineEvidence, RelevanceOutcome, resolve_relevance};
use super::report::ComparisonReport;
use super::runner::{CancellationToken, resolve_catalog, run_comparison, score_units};
use super::timing::{BackendWorker, UnitMeasurement};
use super::types::{
    BackendDescriptor, BackendKind, BackendResult, BackendRole, CorpusSize, Query,
    RelevanceSource, ResultItem, ResultStatus, TimingStat,
};
use crate::model::sample_entities;
use crate::semantic::ModelScope;
use crate::store::{DocumentStore, EntityStore, SqliteStore};

#[derive(Clone)]
enum Script {
    Hits(Vec<&'static str>),
    Fail,
    Malformed,
    Stall(Duration),
    HitsOnceThenStall(Vec<&'static str>, Duration),
}

struct ScriptedBackend {
    descriptor: BackendDescriptor,
    scripts: HashMap<String, Script>,
    default_script: Script,
    unavailable: Option<String>,
    calls: Arc<AtomicUsize>,
    retrieves: AtomicUsize,
    calls_by_query: Mutex<HashMap<String, usize>>,
    cancel_after: Option<(usize, CancellationToken)>,
    corpus: Option<CorpusSize>,
}

impl ScriptedBackend {
    fn new(backend_id: &str, role: BackendRole) -> Self {
        Self {
            descriptor: BackendDescriptor::new(backend_id, role, BackendKind::Keyword),
            scripts: HashMap::new(),
            default_script: Script::Hits(Vec::new()),
            unavailable: None,
            calls: Arc::new(AtomicUsize::new(0)),
            retrieves: AtomicUsize::new(0),
            calls_by_query: Mutex::new(HashMap::new()),
            cancel_after: None,
            corpus: None,
        }
    }

    fn baseline(backend_id: &str) -> Self {
        Self::new(backend_id, BackendRole::Baseline)
    }

    fn candidate(backend_id: &str) -> Self {
        Self::new(backend_id, BackendRole::Candidate)
    }

    fn with_default(mut self, script: Script) -> Self {
        self.default_script = script;
        self
    }

    fn with_script(mut self, query_id: &str, script: Script) -> Self {
        self.scripts.insert(query_id.to_string(), script);
        self
    }

    fn unavailable(mut self, reason: &str) -> Self {
        self.unavailable = Some(reason.to_string());
        self
    }

    fn cancelling_after(mut self, retrieves: usize, token: &CancellationToken) -> Self {
        self.cancel_after = Some((retrieves, token.clone()));
        self
    }

    fn with_corpus(mut self, statements: usize) -> Self {
        self.corpus = Some(CorpusSize {
            entities: statements / 4,
            properties: 3,
            statements,
        });
        self
    }

    fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

fn scripted_items(ids: &[&str], top_k: usize) -> Vec<ResultItem> {
    ids.iter()
        .take(top_k)
        .enumerate()
        .map(|(rank, id)| ResultItem {
            entity_id: id.to_string(),
            rank,
            score: None,
        })
        .collect()
}

impl BackendAdapter for ScriptedBackend {
    fn identity(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.unavailable {
            Some(reason) => Err(BackendError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn corpus_size(&self) -> Option<CorpusSize> {
        self.corpus
    }

    fn retrieve(
        &self,
        query: &Query,
        top_k: usize,
        _deadline: &Deadline,
    ) -> Result<Vec<ResultItem>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let retrieves = self.retrieves.fetch_add(1, Ordering::SeqCst) + 1;
        let call_index = {
            let mut calls = self.calls_by_query.lock().expect("call log lock");
            let entry = calls.entry(query.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        if let Some((after, token)) = &self.cancel_after
            && retrieves >= *after
        {
            token.cancel();
        }

        let script = self
            .scripts
            .get(&query.id)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        match script {
            Script::Hits(ids) => Ok(scripted_items(&ids, top_k)),
            Script::Fail => Err(BackendError::Failed("scripted failure".to_string())),
            Script::Malformed => Err(BackendError::MalformedQuery("scripted rejection".to_string())),
            Script::Stall(duration) => {
                thread::sleep(duration);
                Ok(Vec::new())
            }
            Script::HitsOnceThenStall(ids, duration) => {
                if call_index == 1 {
                    Ok(scripted_items(&ids, top_k))
                } else {
                    thread::sleep(duration);
                    Ok(Vec::new())
                }
            }
        }
    }
}

fn config(baseline_backend_id: &str) -> BenchmarkConfig {
    BenchmarkConfig {
        warmup_count: 0,
        repetition_count: 2,
        top_k: 5,
        k_relevance: 2,
        per_call_timeout_ms: 2_000,
        baseline_backend_id: baseline_backend_id.to_string(),
        parallel: false,
    }
}

fn adapters(backends: Vec<ScriptedBackend>) -> Vec<Arc<dyn BackendAdapter>> {
    backends
        .into_iter()
        .map(|backend| Arc::new(backend) as Arc<dyn BackendAdapter>)
        .collect()
}

fn single_query_catalog(query: Query) -> QueryCatalog {
    QueryCatalog::new(vec![query])
}

fn run(
    config: &BenchmarkConfig,
    catalog: &QueryCatalog,
    backends: Vec<ScriptedBackend>,
) -> ComparisonReport {
    run_comparison(config, catalog, adapters(backends), &CancellationToken::new())
        .expect("comparison should run")
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

fn prf(report: &ComparisonReport, backend_id: &str, query_id: &str) -> (f64, f64, f64) {
    let score = report
        .score(backend_id, query_id)
        .unwrap_or_else(|| panic!("missing score for {backend_id}/{query_id}"));
    (score.precision, score.recall, score.f1)
}

fn ok_result(backend_id: &str, query_id: &str, ids: &[&str]) -> BackendResult {
    BackendResult::ok(backend_id, query_id, scripted_items(ids, usize::MAX), 1.0)
}

#[test]
fn explicit_judgment_scores_hit_and_empty_result() {
    let catalog = single_query_catalog(
        Query::new("china-capital", "capital of China").with_relevant_ids(&["Q148_capital_value"]),
    );
    let report = run(
        &config("a"),
        &catalog,
        vec![
            ScriptedBackend::baseline("a").with_default(Script::Hits(vec!["Q148_capital_value"])),
            ScriptedBackend::candidate("b").with_default(Script::Hits(Vec::new())),
        ],
    );

    assert_eq!(prf(&report, "a", "china-capital"), (1.0, 1.0, 1.0));
    assert_eq!(prf(&report, "b", "china-capital"), (0.0, 0.0, 0.0));
    assert_eq!(report.relevance_sets.len(), 1);
    assert_eq!(report.relevance_sets[0].source, RelevanceSource::Explicit);
    assert!(report.unresolved_queries.is_empty());
}

#[test]
fn pseudo_relevance_takes_baseline_top_k_relevance() {
    let catalog = single_query_catalog(Query::new("q", "some question"));
    let report = run(
        &config("base"),
        &catalog,
        vec![
            ScriptedBackend::baseline("base").with_default(Script::Hits(vec!["Q1", "Q2", "Q3"])),
            ScriptedBackend::candidate("cand").with_default(Script::Hits(vec!["Q2", "Q4"])),
        ],
    );

    let relevance = &report.relevance_sets[0];
    assert_eq!(relevance.source, RelevanceSource::Pseudo);
    assert_eq!(
        relevance.relevant_ids,
        BTreeSet::from(["Q1".to_string(), "Q2".to_string()])
    );
    assert_eq!(prf(&report, "cand", "q"), (0.5, 0.5, 0.5));

    let (precision, recall, f1) = prf(&report, "base", "q");
    assert_close(precision, 2.0 / 3.0);
    assert_close(recall, 1.0);
    assert_close(f1, 0.8);
}

#[test]
fn backend_timing_out_every_repetition_has_undefined_latency() {
    let mut config = config("base");
    config.repetition_count = 5;
    config.per_call_timeout_ms = 25;
    let catalog = single_query_catalog(Query::new("q", "question"));

    let report = run(
        &config,
        &catalog,
        vec![
            ScriptedBackend::baseline("base").with_default(Script::Hits(vec!["Q1"])),
            ScriptedBackend::candidate("slow")
                .with_default(Script::Stall(Duration::from_millis(300))),
        ],
    );

    let slow = report.backend("slow").expect("slow backend summary");
    assert_eq!(slow.timing.failures, 5);
    assert_eq!(slow.timing.attempts, 5);
    assert!(!slow.timing.is_defined());
    assert_eq!(slow.timing.median_ms, None);
    assert_eq!(slow.timing.stddev_ms, None);
    assert!(slow.metrics_summary.is_none());
    assert!(report.score("slow", "q").is_none());

    let base = report.backend("base").expect("base backend summary");
    assert!(base.timing.mean_ms.expect("base latency is defined") >= 0.0);
    assert_eq!(base.timing.failures, 0);

    let ranked = report
        .latency_ranking
        .iter()
        .map(|rank| rank.backend_id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(ranked, vec!["base"]);
    assert_eq!(report.latency_ranking[0].ratio_to_fastest.map(|ratio| ratio == 1.0), Some(true));

    assert_eq!(report.failed_units.len(), 1);
    assert_eq!(report.failed_units[0].backend_id, "slow");
    assert_eq!(report.failed_units[0].status, ResultStatus::Timeout);
    assert_eq!(report.failed_units[0].failures, 5);

    let value = serde_json::to_value(&report).expect("report serializes");
    assert!(value["backends"][1]["timing"]["mean_ms"].is_null());
    assert_eq!(value["backends"][1]["timing"]["failures"], serde_json::json!(5));
    assert!(value["chart_series"]["latency_ms"][1].is_null());
    assert!(value["chart_series"]["f1"][1].is_null());
    assert!(value["chart_series"]["latency_ms"][0].is_number());
}

#[test]
fn timed_out_backend_is_scored_on_successful_warmup_result() {
    let mut config = config("base");
    config.warmup_count = 1;
    config.repetition_count = 5;
    config.per_call_timeout_ms = 25;
    let catalog = single_query_catalog(Query::new("q", "question"));

    let report = run(
        &config,
        &catalog,
        vec![
            ScriptedBackend::baseline("base").with_default(Script::Hits(vec!["Q1"])),
            ScriptedBackend::candidate("slow").with_default(Script::HitsOnceThenStall(
                vec!["Q1"],
                Duration::from_millis(300),
            )),
        ],
    );

    let slow = report.backend("slow").expect("slow backend summary");
    assert_eq!(slow.timing.failures, 5);
    assert!(!slow.timing.is_defined());
    assert_eq!(prf(&report, "slow", "q"), (1.0, 1.0, 1.0));
    assert!(
        report
            .latency_ranking
            .iter()
            .all(|rank| rank.backend_id != "slow")
    );
}

#[test]
fn failed_baseline_leaves_query_unresolved() {
    let catalog = QueryCatalog::new(vec![
        Query::new("q-fail", "first"),
        Query::new("q-ok", "second"),
        Query::new("q-explicit", "third").with_relevant_ids(&["Q1"]),
    ]);
    let report = run(
        &config("base"),
        &catalog,
        vec![
            ScriptedBackend::baseline("base")
                .with_default(Script::Hits(vec!["Q1"]))
                .with_script("q-fail", Script::Fail)
                .with_script("q-explicit", Script::Fail),
            ScriptedBackend::candidate("cand").with_default(Script::Hits(vec!["Q1"])),
        ],
    );

    assert_eq!(report.unresolved_queries, vec!["q-fail".to_string()]);
    assert!(report.unresolved_details[0].reason.contains("base"));
    assert!(report.per_query.iter().all(|score| score.query_id != "q-fail"));

    assert_eq!(prf(&report, "base", "q-ok"), (1.0, 1.0, 1.0));
    assert_eq!(prf(&report, "cand", "q-ok"), (1.0, 1.0, 1.0));
    assert_eq!(prf(&report, "cand", "q-explicit"), (1.0, 1.0, 1.0));
    assert!(report.score("base", "q-explicit").is_none());

    let failed = report
        .failed_units
        .iter()
        .map(|unit| (unit.backend_id.as_str(), unit.query_id.as_str(), unit.status))
        .collect::<Vec<_>>();
    assert_eq!(
        failed,
        vec![
            ("base", "q-fail", ResultStatus::Error),
            ("base", "q-explicit", ResultStatus::Error),
        ]
    );
}

#[test]
fn malformed_query_is_excluded_for_that_backend_only() {
    let catalog = QueryCatalog::new(vec![Query::new("q1", "first"), Query::new("q2", "second")]);
    let report = run(
        &config("base"),
        &catalog,
        vec![
            ScriptedBackend::baseline("base").with_default(Script::Hits(vec!["Q1"])),
            ScriptedBackend::candidate("picky")
                .with_default(Script::Hits(vec!["Q1"]))
                .with_script("q2", Script::Malformed),
        ],
    );

    assert!(report.score("picky", "q2").is_none());
    assert!(report.score("picky", "q1").is_some());
    assert!(report.score("base", "q2").is_some());

    let failed = &report.failed_units[0];
    assert_eq!(failed.backend_id, "picky");
    assert_eq!(failed.status, ResultStatus::Error);
    assert!(
        failed
            .message
            .as_deref()
            .is_some_and(|message| message.contains("malformed query"))
    );

    let picky = report.backend("picky").expect("picky summary");
    assert_eq!(picky.metrics_summary.as_ref().map(|summary| summary.scored_queries), Some(1));
}

#[test]
fn timed_out_worker_is_replaced_for_the_next_query() {
    let mut config = config("base");
    config.repetition_count = 1;
    config.per_call_timeout_ms = 25;
    let catalog = QueryCatalog::new(vec![Query::new("q-slow", "slow"), Query::new("q-fast", "fast")]);

    let report = run(
        &config,
        &catalog,
        vec![
            ScriptedBackend::baseline("base")
                .with_default(Script::Hits(vec!["Q1"]))
                .with_script("q-slow", Script::Stall(Duration::from_millis(300))),
        ],
    );

    assert_eq!(report.unresolved_queries, vec!["q-slow".to_string()]);
    assert_eq!(prf(&report, "base", "q-fast"), (1.0, 1.0, 1.0));
    let timings = report
        .per_query_timing
        .iter()
        .map(|unit| (unit.query_id.as_str(), unit.timing.is_defined()))
        .collect::<Vec<_>>();
    assert_eq!(timings, vec![("q-slow", false), ("q-fast", true)]);
}

#[test]
fn unavailable_backend_is_excluded_and_reported_once() {
    let catalog = single_query_catalog(Query::new("q", "question"));
    let broken = ScriptedBackend::candidate("broken").unavailable("index missing");
    let broken_calls = broken.call_counter();

    let report = run(
        &config("base"),
        &catalog,
        vec![
            ScriptedBackend::baseline("base").with_default(Script::Hits(vec!["Q1"])),
            broken,
        ],
    );

    assert_eq!(report.unavailable_backends.len(), 1);
    assert_eq!(report.unavailable_backends[0].backend_id, "broken");
    assert!(report.unavailable_backends[0].reason.contains("index missing"));
    assert!(report.backend("broken").is_none());
    assert_eq!(report.chart_series.categories, vec!["base".to_string()]);
    assert_eq!(broken_calls.load(Ordering::SeqCst), 1, "only the probe ran");
}

#[test]
fn unavailable_baseline_leaves_pseudo_queries_unresolved() {
    let catalog = QueryCatalog::new(vec![
        Query::new("q-pseudo", "first"),
        Query::new("q-explicit", "second").with_relevant_ids(&["Q1"]),
    ]);
    let report = run(
        &config("base"),
        &catalog,
        vec![
            ScriptedBackend::baseline("base").unavailable("store missing"),
            ScriptedBackend::candidate("cand").with_default(Script::Hits(vec!["Q1"])),
        ],
    );

    assert_eq!(report.unresolved_queries, vec!["q-pseudo".to_string()]);
    assert!(report.unresolved_details[0].reason.contains("did not run"));
    assert_eq!(prf(&report, "cand", "q-explicit"), (1.0, 1.0, 1.0));
}

#[test]
fn zero_usable_backends_is_fatal() {
    let catalog = single_query_catalog(Query::new("q", "question"));
    let error = run_comparison(
        &config("base"),
        &catalog,
        adapters(vec![
            ScriptedBackend::baseline("base").unavailable("down"),
            ScriptedBackend::candidate("cand").unavailable("also down"),
        ]),
        &CancellationToken::new(),
    )
    .expect_err("no usable backends");

    match error {
        HarnessError::NoUsableBackends(reasons) => {
            assert!(reasons.contains("base: backend unavailable: down"));
            assert!(reasons.contains("cand"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn configuration_errors_are_raised_before_any_backend_call() {
    let valid_catalog = single_query_catalog(Query::new("q", "question"));

    let mut zero_repetitions = config("base");
    zero_repetitions.repetition_count = 0;
    let mut zero_top_k = config("base");
    zero_top_k.top_k = 0;
    let mut zero_k_relevance = config("base");
    zero_k_relevance.k_relevance = 0;
    let mut zero_timeout = config("base");
    zero_timeout.per_call_timeout_ms = 0;

    let cases = vec![
        (zero_repetitions, valid_catalog.clone(), "base", "cand", BackendRole::Candidate),
        (zero_top_k, valid_catalog.clone(), "base", "cand", BackendRole::Candidate),
        (zero_k_relevance, valid_catalog.clone(), "base", "cand", BackendRole::Candidate),
        (zero_timeout, valid_catalog.clone(), "base", "cand", BackendRole::Candidate),
        (config("other"), valid_catalog.clone(), "base", "cand", BackendRole::Candidate),
        (config("base"), valid_catalog.clone(), "base", "base", BackendRole::Candidate),
        (config("base"), valid_catalog.clone(), "base", "cand", BackendRole::Baseline),
        (config("base"), QueryCatalog::new(Vec::new()), "base", "cand", BackendRole::Candidate),
        (
            config("base"),
            QueryCatalog::new(vec![Query::new("q", "one"), Query::new("q", "two")]),
            "base",
            "cand",
            BackendRole::Candidate,
        ),
        (
            config("base"),
            single_query_catalog(Query::new("q", "   ")),
            "base",
            "cand",
            BackendRole::Candidate,
        ),
    ];

    for (config, catalog, first_id, second_id, second_role) in cases {
        let first = ScriptedBackend::baseline(first_id);
        let second = ScriptedBackend::new(second_id, second_role);
        let counters = [first.call_counter(), second.call_counter()];

        let error = run_comparison(
            &config,
            &catalog,
            adapters(vec![first, second]),
            &CancellationToken::new(),
        )
        .expect_err("configuration should be rejected");
        assert!(
            matches!(error, HarnessError::Configuration(_)),
            "unexpected error: {error}"
        );
        for counter in counters {
            assert_eq!(counter.load(Ordering::SeqCst), 0);
        }
    }
}

#[test]
fn cancellation_between_units_keeps_completed_work() {
    let token = CancellationToken::new();
    let mut config = config("base");
    config.repetition_count = 1;
    let catalog = QueryCatalog::new(vec![
        Query::new("q1", "first"),
        Query::new("q2", "second"),
        Query::new("q3", "third"),
    ]);

    let report = run_comparison(
        &config,
        &catalog,
        adapters(vec![
            ScriptedBackend::baseline("base")
                .with_default(Script::Hits(vec!["Q1"]))
                .cancelling_after(1, &token),
            ScriptedBackend::candidate("cand").with_default(Script::Hits(vec!["Q1"])),
        ]),
        &token,
    )
    .expect("cancelled comparison still reports");

    assert!(report.partial);
    assert_eq!(report.per_query_timing.len(), 1);
    assert_eq!(report.per_query_timing[0].query_id, "q1");
    assert_eq!(prf(&report, "base", "q1"), (1.0, 1.0, 1.0));
    assert_eq!(
        report.unresolved_queries,
        vec!["q2".to_string(), "q3".to_string()]
    );

    let cand = report.backend("cand").expect("candidate summary");
    assert_eq!(cand.timing.attempts, 0);
    assert!(cand.metrics_summary.is_none());
}

#[test]
fn parallel_mode_produces_the_same_scores() {
    let catalog = QueryCatalog::new(vec![
        Query::new("q1", "first"),
        Query::new("q2", "second").with_relevant_ids(&["Q9"]),
        Query::new("q3", "third"),
    ]);
    let build = || {
        vec![
            ScriptedBackend::baseline("base")
                .with_default(Script::Hits(vec!["Q1", "Q2", "Q3"]))
                .with_script("q3", Script::Fail),
            ScriptedBackend::candidate("cand-a").with_default(Script::Hits(vec!["Q2", "Q4"])),
            ScriptedBackend::candidate("cand-b").with_default(Script::Hits(vec!["Q9"])),
        ]
    };

    let sequential = run(&config("base"), &catalog, build());
    let mut parallel_config = config("base");
    parallel_config.parallel = true;
    let parallel = run(&parallel_config, &catalog, build());

    assert_eq!(sequential.per_query, parallel.per_query);
    assert_eq!(sequential.unresolved_queries, parallel.unresolved_queries);
    assert_eq!(sequential.relevance_sets, parallel.relevance_sets);
    assert!(!parallel.partial);
    assert!(parallel.config.parallel);
}

#[test]
fn relevance_set_is_shared_across_backends() {
    let catalog = single_query_catalog(Query::new("q", "question"));
    let units = ["base", "cand-a", "cand-b"]
        .iter()
        .map(|backend_id| {
            UnitMeasurement::new(
                backend_id,
                "q",
                Vec::new(),
                vec![ok_result(backend_id, "q", &["Q1", "Q2"])],
            )
        })
        .collect::<Vec<UnitMeasurement>>();

    let relevance = resolve_catalog(&config("base"), &catalog, &units);
    assert_eq!(relevance.len(), 1);
    let shared = relevance[0].relevance_set().expect("query resolves");

    let scored = score_units(&units, &catalog, &relevance);
    assert_eq!(scored.len(), 3);
    for unit in &scored {
        assert!(Arc::ptr_eq(&unit.relevance, shared));
    }
}

#[test]
fn vacuous_truth_policy_is_symmetric() {
    let empty = BTreeSet::<&str>::new();
    let one = BTreeSet::from(["Q1"]);

    assert_eq!(score_sets(&empty, &empty), (1.0, 1.0, 1.0));
    assert_eq!(score_sets(&empty, &one), (0.0, 0.0, 0.0));
    assert_eq!(score_sets(&one, &empty), (0.0, 0.0, 0.0));
    assert_eq!(score_sets(&one, &one), (1.0, 1.0, 1.0));
}

#[test]
fn metrics_stay_in_range_and_follow_f1_formula() {
    let universe = ["Q1", "Q2", "Q3", "Q4"];
    let subsets = (0..16_u32)
        .map(|mask| {
            universe
                .iter()
                .enumerate()
                .filter(|(index, _)| mask & (1 << index) != 0)
                .map(|(_, id)| *id)
                .collect::<BTreeSet<&str>>()
        })
        .collect::<Vec<BTreeSet<&str>>>();

    for retrieved in &subsets {
        for relevant in &subsets {
            let (precision, recall, f1) = score_sets(retrieved, relevant);
            for value in [precision, recall, f1] {
                assert!((0.0..=1.0).contains(&value), "{value} out of range");
            }
            if precision + recall > 0.0 {
                assert_close(f1, 2.0 * precision * recall / (precision + recall));
            } else {
                assert_eq!(f1, 0.0);
            }
        }
    }
}

#[test]
fn duplicates_collapse_and_scoring_is_idempotent() {
    let result = ok_result("cand", "q", &["Q1", "Q1", "Q2"]);
    let relevance = resolve_relevance(
        &Query::new("q", "question").with_relevant_ids(&["Q1"]),
        "base",
        BaselineEvidence::Missing,
        3,
    );
    let set = relevance.relevance_set().expect("explicit judgments resolve");

    let first = score_result(&result, set);
    let second = score_result(&result, set);
    assert_eq!(first, second);
    assert_close(first.precision, 0.5);
    assert_close(first.recall, 1.0);
    assert_close(first.f1, 2.0 / 3.0);
}

#[test]
fn pseudo_relevance_follows_rank_not_position() {
    let items = vec![
        ResultItem {
            entity_id: "Q3".to_string(),
            rank: 2,
            score: None,
        },
        ResultItem {
            entity_id: "Q1".to_string(),
            rank: 0,
            score: None,
        },
        ResultItem {
            entity_id: "Q2".to_string(),
            rank: 1,
            score: None,
        },
    ];
    let baseline = BackendResult::ok("base", "q", items, 1.0);
    let outcome = resolve_relevance(
        &Query::new("q", "question"),
        "base",
        BaselineEvidence::Succeeded(&baseline),
        2,
    );
    let set = outcome.relevance_set().expect("pseudo relevance resolves");
    assert_eq!(set.source, RelevanceSource::Pseudo);
    assert_eq!(
        set.relevant_ids,
        BTreeSet::from(["Q1".to_string(), "Q2".to_string()])
    );

    let repeated = ok_result("base", "q", &["Q1", "Q1", "Q2", "Q3"]);
    let outcome = resolve_relevance(
        &Query::new("q", "question"),
        "base",
        BaselineEvidence::Succeeded(&repeated),
        2,
    );
    assert_eq!(
        outcome.relevance_set().map(|set| set.relevant_ids.len()),
        Some(2)
    );
}

#[test]
fn failed_baseline_evidence_is_unresolved() {
    let failure = BackendResult::failed(
        "base",
        "q",
        &BackendError::Timeout {
            timeout_ms: 10,
            stage: "backend call".to_string(),
        },
        10.0,
    );
    let outcome = resolve_relevance(
        &Query::new("q", "question"),
        "base",
        BaselineEvidence::Failed(Some(&failure)),
        3,
    );
    match outcome {
        RelevanceOutcome::Unresolved { query_id, reason } => {
            assert_eq!(query_id, "q");
            assert!(reason.contains("timeout"));
        }
        RelevanceOutcome::Resolved(_) => panic!("failed baseline must not resolve"),
    }
}

#[test]
fn timing_stat_uses_population_statistics() {
    let even = TimingStat::from_samples("b", &[10.0, 20.0, 30.0, 40.0], 1);
    assert_eq!(even.mean_ms, Some(25.0));
    assert_eq!(even.median_ms, Some(25.0));
    assert_close(even.stddev_ms.expect("defined"), 125.0_f64.sqrt());
    assert_eq!(even.failures, 1);
    assert_eq!(even.attempts, 5);

    let odd = TimingStat::from_samples("b", &[3.0, 1.0, 2.0], 0);
    assert_eq!(odd.median_ms, Some(2.0));
    assert_close(odd.stddev_ms.expect("defined"), (2.0_f64 / 3.0).sqrt());

    let undefined = TimingStat::from_samples("b", &[], 3);
    assert!(!undefined.is_defined());
    assert_eq!(undefined.failures, 3);
    assert_eq!(undefined.attempts, 3);
}

#[test]
fn timing_stat_excludes_failed_runs() {
    let runs = vec![
        BackendResult::ok("b", "q", Vec::new(), 4.0),
        BackendResult::failed("b", "q", &BackendError::Failed("boom".to_string()), 1000.0),
        BackendResult::ok("b", "q", Vec::new(), 8.0),
    ];
    let stat = TimingStat::from_runs("b", &runs);
    assert_eq!(stat.mean_ms, Some(6.0));
    assert_eq!(stat.failures, 1);
    assert_eq!(stat.attempts, 3);
}

#[test]
fn execute_marks_overrunning_call_as_timeout() {
    let backend = ScriptedBackend::baseline("base")
        .with_default(Script::Stall(Duration::from_millis(40)));
    let result = backend.execute(&Query::new("q", "question"), 5, 5);
    assert_eq!(result.status(), ResultStatus::Timeout);
    assert!(result.items().is_empty());
    assert!(result.elapsed_time_ms() >= 40.0);

    let fast = ScriptedBackend::baseline("base").with_default(Script::Hits(vec!["Q1"]));
    let result = fast.execute(&Query::new("q", "question"), 5, 1_000);
    assert!(result.is_ok());
    assert_eq!(result.backend_id(), "base");
    assert_eq!(result.query_id(), "q");
    assert_eq!(result.message(), None);
}

/// Does its work outside its own clock and reports zero elapsed time.
struct SelfTimedBackend;

impl BackendAdapter for SelfTimedBackend {
    fn identity(&self) -> BackendDescriptor {
        BackendDescriptor::new("self-timed", BackendRole::Baseline, BackendKind::Keyword)
    }

    fn retrieve(
        &self,
        _query: &Query,
        top_k: usize,
        _deadline: &Deadline,
    ) -> Result<Vec<ResultItem>, BackendError> {
        Ok(scripted_items(&["Q1"], top_k))
    }

    fn execute(&self, query: &Query, top_k: usize, _timeout_ms: u64) -> BackendResult {
        thread::sleep(Duration::from_millis(30));
        BackendResult::ok("self-timed", &query.id, scripted_items(&["Q1"], top_k), 0.0)
    }
}

#[test]
fn worker_times_every_reply_from_dispatch() {
    let mut worker = BackendWorker::new(Arc::new(SelfTimedBackend));
    let query = Query::new("q", "question");

    let result = worker.call(&query, 5, Duration::from_secs(2));
    assert!(result.is_ok());
    assert_eq!(result.items().len(), 1);
    assert!(
        result.elapsed_time_ms() >= 30.0,
        "elapsed {} ms excludes the backend's work",
        result.elapsed_time_ms()
    );

    let timed_out = worker.call(&query, 5, Duration::from_millis(5));
    assert_eq!(timed_out.status(), ResultStatus::Timeout);
    assert!(timed_out.elapsed_time_ms() >= 5.0);
}

#[test]
fn backend_summaries_normalize_latency_by_corpus_size() {
    let mut config = config("base");
    config.per_call_timeout_ms = 25;
    let catalog = single_query_catalog(Query::new("q", "question"));

    let report = run(
        &config,
        &catalog,
        vec![
            ScriptedBackend::baseline("base")
                .with_default(Script::Hits(vec!["Q1"]))
                .with_corpus(2_000),
            ScriptedBackend::candidate("sizeless").with_default(Script::Hits(vec!["Q1"])),
            ScriptedBackend::candidate("slow")
                .with_default(Script::Stall(Duration::from_millis(300)))
                .with_corpus(500),
            ScriptedBackend::candidate("empty")
                .with_default(Script::Hits(vec!["Q1"]))
                .with_corpus(0),
        ],
    );

    let base = report.backend("base").expect("base summary");
    assert_eq!(base.corpus_size.map(|size| size.statements), Some(2_000));
    let mean_ms = base.timing.mean_ms.expect("base latency is defined");
    assert_close(
        base.mean_ms_per_1k_statements.expect("normalized latency"),
        mean_ms * 1000.0 / 2_000.0,
    );

    let sizeless = report.backend("sizeless").expect("sizeless summary");
    assert_eq!(sizeless.corpus_size, None);
    assert_eq!(sizeless.mean_ms_per_1k_statements, None);

    let slow = report.backend("slow").expect("slow summary");
    assert_eq!(slow.corpus_size.map(|size| size.statements), Some(500));
    assert_eq!(slow.mean_ms_per_1k_statements, None);

    let empty = report.backend("empty").expect("empty summary");
    assert!(empty.timing.is_defined());
    assert_eq!(empty.mean_ms_per_1k_statements, None);

    let value = serde_json::to_value(&report).expect("report serializes");
    assert_eq!(
        value["backends"][0]["corpus_size"]["statements"],
        serde_json::json!(2_000)
    );
    assert!(value["backends"][0]["mean_ms_per_1k_statements"].is_number());
    assert!(value["backends"][1]["corpus_size"].is_null());
    assert!(value["backends"][2]["mean_ms_per_1k_statements"].is_null());
}

#[test]
fn catalog_loads_from_json_and_checksums_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("catalog.json");
    let payload = serde_json::json!({
        "queries": [
            {"id": "china-capital", "text": "What is the capital of China?",
             "explicit_relevant_ids": ["Q148_capital_value"]},
            {"id": "france-capital", "text": "What is the capital of France?"}
        ]
    });
    std::fs::write(&path, payload.to_string()).expect("write catalog");

    let catalog = QueryCatalog::from_json_file(&path).expect("catalog parses");
    assert_eq!(catalog.len(), 2);
    assert!(catalog.validate().is_ok());
    assert_eq!(catalog.queries()[1].explicit_relevant_ids, None);
    assert_eq!(catalog.checksum(), catalog.clone().checksum());

    let default_catalog = QueryCatalog::default_catalog();
    assert_eq!(default_catalog.len(), 6);
    assert_ne!(catalog.checksum(), default_catalog.checksum());
    assert_eq!(
        default_catalog.queries()[0].explicit_relevant_ids,
        Some(BTreeSet::from(["Q148_capital_value".to_string()]))
    );
}

#[test]
fn keyword_and_semantic_backends_compare_over_sample_stores() {
    let scope = ModelScope::acquire("").expect("model scope");

    let mut sqlite = SqliteStore::open_in_memory().expect("sqlite");
    sqlite.store_entities(&sample_entities()).expect("load sqlite");
    let documents = sqlite.fact_documents().expect("fact documents");
    let stats = sqlite.stats().expect("sqlite stats");
    let mut document = DocumentStore::in_memory();
    document
        .store_entities(&sample_entities())
        .expect("load document store");

    let backends: Vec<Arc<dyn BackendAdapter>> = vec![
        Arc::new(KeywordBackend::new(
            BackendDescriptor::new("sqlite", BackendRole::Baseline, BackendKind::Keyword),
            Box::new(sqlite),
        )),
        Arc::new(KeywordBackend::new(
            BackendDescriptor::new("document", BackendRole::Candidate, BackendKind::Keyword),
            Box::new(document),
        )),
        Arc::new(SemanticBackend::new(
            BackendDescriptor::new("semantic", BackendRole::Candidate, BackendKind::Semantic),
            scope.model(),
            documents,
        )),
    ];
    let config = BenchmarkConfig {
        warmup_count: 0,
        repetition_count: 1,
        ..BenchmarkConfig::default()
    };

    let catalog = QueryCatalog::default_catalog();
    let report = run_comparison(&config, &catalog, backends, &CancellationToken::new())
        .expect("comparison should run");

    assert!(!report.partial);
    assert!(report.unresolved_queries.is_empty());
    assert!(report.failed_units.is_empty());
    assert_eq!(report.backends.len(), 3);

    for query in catalog.queries() {
        assert_eq!(prf(&report, "sqlite", &query.id), (1.0, 1.0, 1.0), "{}", query.id);
        assert_eq!(prf(&report, "document", &query.id), (1.0, 1.0, 1.0), "{}", query.id);
    }

    let (precision, recall, _) = prf(&report, "semantic", "china-capital");
    assert!(precision > 0.0);
    assert_eq!(recall, 1.0);
    assert_eq!(report.chart_series.categories.len(), 3);
    assert!(report.chart_series.f1.iter().all(Option::is_some));

    let sqlite_summary = report.backend("sqlite").expect("sqlite summary");
    assert_eq!(
        sqlite_summary.corpus_size,
        Some(CorpusSize {
            entities: stats.entities_count,
            properties: stats.properties_count,
            statements: stats.statements_count,
        })
    );
    assert!(sqlite_summary.mean_ms_per_1k_statements.is_some());
    let semantic_summary = report.backend("semantic").expect("semantic summary");
    assert_eq!(
        semantic_summary.corpus_size.map(|size| size.statements),
        Some(stats.statements_count)
    );
}

#[test]
fn lookup_questions_rank_entities_for_every_backend_kind() {
    let scope = ModelScope::acquire("").expect("model scope");

    let mut sqlite = SqliteStore::open_in_memory().expect("sqlite");
    sqlite.store_entities(&sample_entities()).expect("load sqlite");
    let semantic = Arc::new(SemanticBackend::new(
        BackendDescriptor::new("semantic", BackendRole::Candidate, BackendKind::Semantic),
        scope.model(),
        sqlite.fact_documents().expect("fact documents"),
    ));

    let lookup = Query::new("paris", "Tell me about Paris");
    let result = semantic.execute(&lookup, 5, 1_000);
    assert!(result.is_ok());
    let ids = result
        .items()
        .iter()
        .map(|item| item.entity_id.as_str())
        .collect::<Vec<&str>>();
    assert!(ids.contains(&"Q90"), "{ids:?}");
    assert!(ids.iter().all(|id| !id.ends_with("_value")), "{ids:?}");
    assert_eq!(ids.iter().collect::<BTreeSet<_>>().len(), ids.len());

    let fact = semantic.execute(&Query::new("france", "What is the capital of France?"), 5, 1_000);
    let fact_ids = fact
        .items()
        .iter()
        .map(|item| item.entity_id.as_str())
        .collect::<Vec<&str>>();
    assert!(fact_ids.contains(&"Q142_capital_value"), "{fact_ids:?}");
    assert!(fact_ids.iter().all(|id| id.ends_with("_value")), "{fact_ids:?}");

    let backends: Vec<Arc<dyn BackendAdapter>> = vec![
        Arc::new(KeywordBackend::new(
            BackendDescriptor::new("sqlite", BackendRole::Baseline, BackendKind::Keyword),
            Box::new(sqlite),
        )),
        semantic as Arc<dyn BackendAdapter>,
    ];
    let config = BenchmarkConfig {
        warmup_count: 0,
        repetition_count: 1,
        ..BenchmarkConfig::default()
    };
    let report = run_comparison(
        &config,
        &single_query_catalog(lookup),
        backends,
        &CancellationToken::new(),
    )
    .expect("comparison should run");

    assert_eq!(report.relevance_sets[0].source, RelevanceSource::Pseudo);
    assert_eq!(
        report.relevance_sets[0].relevant_ids,
        BTreeSet::from(["Q90".to_string()])
    );
    let (precision, recall, f1) = prf(&report, "semantic", "paris");
    assert!(precision > 0.0);
    assert_eq!(recall, 1.0);
    assert!(f1 > 0.0);
}

#[test]
fn backends_report_unavailable_setups() {
    let empty = KeywordBackend::new(
        BackendDescriptor::new("sqlite", BackendRole::Baseline, BackendKind::Keyword),
        Box::new(SqliteStore::open_in_memory().expect("sqlite")),
    );
    assert!(matches!(
        empty.check_available(),
        Err(BackendError::Unavailable(_))
    ));

    let missing = KeywordBackend::unavailable(
        BackendDescriptor::new("document", BackendRole::Candidate, BackendKind::Keyword),
        "document store missing".to_string(),
    );
    assert_eq!(
        missing.check_available(),
        Err(BackendError::Unavailable("document store missing".to_string()))
    );

    let scope = ModelScope::acquire("").expect("model scope");
    let semantic = SemanticBackend::new(
        BackendDescriptor::new("semantic", BackendRole::Candidate, BackendKind::Semantic),
        scope.model(),
        Vec::new(),
    );
    assert!(matches!(
        semantic.check_available(),
        Err(BackendError::Unavailable(_))
    ));
}

#[test]
fn keyword_backend_rejects_queries_without_content() {
    let mut store = SqliteStore::open_in_memory().expect("sqlite");
    store.store_entities(&sample_entities()).expect("load");
    let backend = KeywordBackend::new(
        BackendDescriptor::new("sqlite", BackendRole::Baseline, BackendKind::Keyword),
        Box::new(store),
    );

    let result = backend.execute(&Query::new("blank", "?!"), 5, 1_000);
    assert_eq!(result.status(), ResultStatus::Error);
    assert!(
        result
            .message()
            .is_some_and(|message| message.contains("malformed query"))
    );

    let result = backend.execute(&Query::new("capital", "What is the capital of France?"), 5, 1_000);
    assert!(result.is_ok());
    let ids = result
        .items()
        .iter()
        .map(|item| (item.entity_id.as_str(), item.rank))
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![("Q142_capital_value", 0)]);
}
