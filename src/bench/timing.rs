use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::adapter::BackendAdapter;
use super::config::BenchmarkConfig;
use super::error::BackendError;
use super::types::{BackendResult, Query, TimingStat};

struct Job {
    query: Query,
    top_k: usize,
    timeout_ms: u64,
    reply: Sender<BackendResult>,
}

/// Drives one backend on a dedicated thread so a stuck call can be abandoned.
///
/// Every job carries its own reply channel; once the caller stops waiting the
/// channel is dropped, so a late reply from an abandoned worker goes nowhere.
pub(crate) struct BackendWorker {
    backend: Arc<dyn BackendAdapter>,
    backend_id: String,
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    spawned: usize,
}

impl BackendWorker {
    pub(crate) fn new(backend: Arc<dyn BackendAdapter>) -> Self {
        let backend_id = backend.identity().backend_id;
        Self {
            backend,
            backend_id,
            jobs: None,
            handle: None,
            spawned: 0,
        }
    }

    pub(crate) fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub(crate) fn spawned(&self) -> usize {
        self.spawned
    }

    fn sender(&mut self) -> Result<Sender<Job>, BackendError> {
        if let Some(jobs) = &self.jobs {
            return Ok(jobs.clone());
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let backend = Arc::clone(&self.backend);
        let handle = thread::Builder::new()
            .name(format!("bench-{}-{}", self.backend_id, self.spawned))
            .spawn(move || {
                for job in receiver {
                    let result = backend.execute(&job.query, job.top_k, job.timeout_ms);
                    let _ = job.reply.send(result);
                }
            })
            .map_err(|err| BackendError::Failed(format!("failed to spawn worker thread: {err}")))?;

        self.spawned += 1;
        self.jobs = Some(sender.clone());
        self.handle = Some(handle);
        Ok(sender)
    }

    fn abandon(&mut self) {
        self.jobs = None;
        self.handle = None;
    }

    /// Runs one call, waiting at most `timeout` for the worker's reply.
    ///
    /// Every outcome is timed from dispatch on this thread, so successful,
    /// failed and timed-out runs share one clock.
    pub(crate) fn call(&mut self, query: &Query, top_k: usize, timeout: Duration) -> BackendResult {
        let timeout_ms = timeout.as_millis() as u64;
        let sender = match self.sender() {
            Ok(sender) => sender,
            Err(error) => return BackendResult::failed(&self.backend_id, &query.id, &error, 0.0),
        };

        let dispatched = Instant::now();
        let elapsed_ms = || dispatched.elapsed().as_secs_f64() * 1000.0;

        let (reply, replies) = mpsc::channel();
        let job = Job {
            query: query.clone(),
            top_k,
            timeout_ms,
            reply,
        };
        if sender.send(job).is_err() {
            self.abandon();
            let error = BackendError::Failed("worker thread is gone".to_string());
            return BackendResult::failed(&self.backend_id, &query.id, &error, elapsed_ms());
        }

        match replies.recv_timeout(timeout) {
            Ok(result) => result.restamped(elapsed_ms()),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    backend_id = %self.backend_id,
                    query_id = %query.id,
                    timeout_ms,
                    "backend call timed out; abandoning worker"
                );
                self.abandon();
                let error = BackendError::Timeout {
                    timeout_ms,
                    stage: "backend call".to_string(),
                };
                BackendResult::failed(&self.backend_id, &query.id, &error, elapsed_ms())
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.abandon();
                let error =
                    BackendError::Failed("worker thread exited without a reply".to_string());
                BackendResult::failed(&self.backend_id, &query.id, &error, elapsed_ms())
            }
        }
    }
}

impl Drop for BackendWorker {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(backend_id = %self.backend_id, "worker thread panicked");
        }
    }
}

/// All runs of one (backend, query) unit.
#[derive(Debug, Clone)]
pub(crate) struct UnitMeasurement {
    pub(crate) backend_id: String,
    pub(crate) query_id: String,
    pub(crate) warmup_runs: Vec<BackendResult>,
    pub(crate) measured_runs: Vec<BackendResult>,
    pub(crate) timing: TimingStat,
}

impl UnitMeasurement {
    pub(crate) fn new(
        backend_id: &str,
        query_id: &str,
        warmup_runs: Vec<BackendResult>,
        measured_runs: Vec<BackendResult>,
    ) -> Self {
        let timing = TimingStat::from_runs(backend_id, &measured_runs);
        Self {
            backend_id: backend_id.to_string(),
            query_id: query_id.to_string(),
            warmup_runs,
            measured_runs,
            timing,
        }
    }

    /// First successful measured run, else the first successful warm-up run.
    pub(crate) fn representative(&self) -> Option<&BackendResult> {
        self.measured_runs
            .iter()
            .find(|run| run.is_ok())
            .or_else(|| self.warmup_runs.iter().find(|run| run.is_ok()))
    }

    pub(crate) fn last_failure(&self) -> Option<&BackendResult> {
        self.measured_runs.iter().rev().find(|run| !run.is_ok())
    }
}

pub(crate) fn measure_unit(
    worker: &mut BackendWorker,
    query: &Query,
    config: &BenchmarkConfig,
) -> UnitMeasurement {
    let timeout = config.per_call_timeout();

    let warmup_runs = (0..config.warmup_count)
        .map(|_| worker.call(query, config.top_k, timeout))
        .collect::<Vec<BackendResult>>();

    let measured_runs = (0..config.repetition_count)
        .map(|repetition| {
            let result = worker.call(query, config.top_k, timeout);
            debug!(
                backend_id = %worker.backend_id(),
                query_id = %query.id,
                repetition,
                status = result.status().as_str(),
                elapsed_ms = result.elapsed_time_ms(),
                items = result.items().len(),
                "measured run"
            );
            result
        })
        .collect::<Vec<BackendResult>>();

    let unit = UnitMeasurement::new(worker.backend_id(), &query.id, warmup_runs, measured_runs);
    if unit.timing.failures > 0 {
        warn!(
            backend_id = %unit.backend_id,
            query_id = %unit.query_id,
            failures = unit.timing.failures,
            attempts = unit.timing.attempts,
            "measured runs failed"
        );
    }
    unit
}

impl TimingStat {
    pub fn from_runs(backend_id: &str, runs: &[BackendResult]) -> Self {
        let samples = runs
            .iter()
            .filter(|run| run.is_ok())
            .map(BackendResult::elapsed_time_ms)
            .collect::<Vec<f64>>();
        let failures = runs.len() - samples.len();
        Self::from_samples(backend_id, &samples, failures)
    }

    /// Mean, median and population standard deviation of successful samples.
    pub fn from_samples(backend_id: &str, samples: &[f64], failures: usize) -> Self {
        let attempts = samples.len() + failures;
        if samples.is_empty() {
            return Self {
                backend_id: backend_id.to_string(),
                mean_ms: None,
                median_ms: None,
                stddev_ms: None,
                failures,
                attempts,
            };
        }

        let count = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let variance = samples
            .iter()
            .map(|sample| (sample - mean).powi(2))
            .sum::<f64>()
            / count;

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let middle = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[middle - 1] + sorted[middle]) / 2.0
        } else {
            sorted[middle]
        };

        Self {
            backend_id: backend_id.to_string(),
            mean_ms: Some(mean),
            median_ms: Some(median),
            stddev_ms: Some(variance.sqrt()),
            failures,
            attempts,
        }
    }
}
