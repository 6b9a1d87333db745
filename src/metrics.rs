//! Pool diagnostics: job counts and observed submit-to-completion latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_discarded: AtomicU64,
    /// Jobs executed synchronously on the submitting thread (backpressure
    /// fallback and small fork-join batches).
    inline_runs: AtomicU64,
    total_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Metrics {
        Metrics::default()
    }

    pub(crate) fn record_submit(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_inline(&self) {
        self.inline_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, count: u64) {
        self.jobs_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self, submitted_at: Option<Instant>) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        if let Some(start) = submitted_at {
            let ns = start.elapsed().as_nanos() as u64;
            self.total_latency_ns.fetch_add(ns, Ordering::Relaxed);
            self.max_latency_ns.fetch_max(ns, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        let avg_ns = if completed > 0 { total_ns / completed } else { 0 };
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: completed,
            jobs_discarded: self.jobs_discarded.load(Ordering::Relaxed),
            inline_runs: self.inline_runs.load(Ordering::Relaxed),
            avg_latency: Duration::from_nanos(avg_ns),
            max_latency: Duration::from_nanos(self.max_latency_ns.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time view of the pool's counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_discarded: u64,
    pub inline_runs: u64,
    /// Mean submit-to-completion latency over all completed jobs.
    pub avg_latency: Duration,
    pub max_latency: Duration,
}
