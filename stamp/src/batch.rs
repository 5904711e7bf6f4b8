//! Batch stamping on a bounded rayon pool.
//!
//! Invoices are fanned out across a dedicated thread pool (one thread per
//! core unless configured otherwise). Each rayon job folds its share of the
//! batch into its own [`BatchMetrics`]; the coordinator merges them when the
//! batch completes. There is no shared accumulator, so metrics are
//! deterministic in everything but timing.
//!
//! Results come back in input order regardless of which worker finished
//! first.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::stamping::{StampError, StampingService};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

/// Counters for one batch, or one worker's share of it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchMetrics {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Invoices rejected before any crypto ran.
    pub validation_failures: usize,
    /// Summed per-invoice signing time across workers.
    pub total_sign_time: Duration,
    pub slowest: Duration,
}

impl BatchMetrics {
    /// Record one invoice.
    pub fn record(&mut self, result: &Result<Value, StampError>, elapsed: Duration) {
        self.attempted += 1;
        match result {
            Ok(_) => self.succeeded += 1,
            Err(err) => {
                self.failed += 1;
                if matches!(err, StampError::Validation(_)) {
                    self.validation_failures += 1;
                }
            }
        }
        self.total_sign_time += elapsed;
        self.slowest = self.slowest.max(elapsed);
    }

    /// Fold another worker's metrics into these.
    pub fn merge(&mut self, other: &BatchMetrics) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.validation_failures += other.validation_failures;
        self.total_sign_time += other.total_sign_time;
        self.slowest = self.slowest.max(other.slowest);
    }

    pub fn average_sign_time(&self) -> Duration {
        match u32::try_from(self.attempted) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_sign_time / n,
        }
    }
}

/// Outcome of [`BatchSigner::sign_batch`].
#[derive(Debug)]
pub struct BatchReport {
    /// One entry per input invoice, in input order.
    pub results: Vec<Result<Value, StampError>>,
    pub metrics: BatchMetrics,
    /// Wall-clock time for the whole batch.
    pub elapsed: Duration,
}

/// Stamps many invoices in parallel with one [`StampingService`].
pub struct BatchSigner {
    service: StampingService,
    pool: ThreadPool,
}

impl BatchSigner {
    /// A signer with one worker per available core.
    pub fn new(service: StampingService) -> Result<Self, BatchError> {
        Self::with_workers(service, default_workers())
    }

    pub fn with_workers(service: StampingService, workers: usize) -> Result<Self, BatchError> {
        if workers == 0 {
            return Err(BatchError::NoWorkers);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("firs-stamp-{i}"))
            .build()
            .map_err(|e| BatchError::Pool(e.to_string()))?;
        Ok(Self { service, pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Stamp one invoice, recording it into the caller's metrics.
    pub fn sign_with_metrics(
        &self,
        invoice: &Value,
        metrics: &mut BatchMetrics,
    ) -> Result<Value, StampError> {
        let started = Instant::now();
        let result = self.service.stamp_invoice(invoice);
        metrics.record(&result, started.elapsed());
        result
    }

    /// Stamp every invoice. Individual failures are reported per entry and
    /// never abort the batch.
    pub fn sign_batch(&self, invoices: &[Value]) -> BatchReport {
        let started = Instant::now();

        let (mut indexed, metrics) = self.pool.install(|| {
            invoices
                .par_iter()
                .enumerate()
                .fold(
                    || (Vec::new(), BatchMetrics::default()),
                    |(mut results, mut metrics), (index, invoice)| {
                        let result = self.sign_with_metrics(invoice, &mut metrics);
                        results.push((index, result));
                        (results, metrics)
                    },
                )
                .reduce(
                    || (Vec::new(), BatchMetrics::default()),
                    |(mut results, mut metrics), (other_results, other_metrics)| {
                        results.extend(other_results);
                        metrics.merge(&other_metrics);
                        (results, metrics)
                    },
                )
        });

        indexed.sort_unstable_by_key(|(index, _)| *index);
        let results = indexed.into_iter().map(|(_, result)| result).collect();
        let elapsed = started.elapsed();

        tracing::info!(
            attempted = metrics.attempted,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            workers = self.workers(),
            elapsed_ms = elapsed.as_millis() as u64,
            "batch stamping complete"
        );

        BatchReport {
            results,
            metrics,
            elapsed,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
