//! Process-wide pipeline counters.
//!
//! Shared by every run of one `RAGPipeline`. All counters are relaxed atomics;
//! a snapshot is a consistent-enough view for dashboards and logs, not a
//! transaction.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::RunStatus;

/// Upper bounds (ms) of the run latency histogram buckets. A final overflow
/// bucket catches everything slower.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000, 120_000];

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    active_runs: AtomicU64,
    accepted: AtomicU64,
    aborted_with_best: AtomicU64,
    failed: AtomicU64,
    corrections: AtomicU64,
    documents_retrieved: AtomicU64,
    total_latency_ms: AtomicU64,
    latency_buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub active_runs: u64,
    pub accepted: u64,
    pub aborted_with_best: u64,
    pub failed: u64,
    pub corrections: u64,
    pub documents_retrieved: u64,
    pub total_latency_ms: u64,
    /// Run counts per `LATENCY_BUCKETS_MS` bucket, plus the overflow bucket.
    pub latency_buckets: Vec<u64>,
}

impl MetricsSnapshot {
    pub fn runs(&self) -> u64 {
        self.accepted + self.aborted_with_best + self.failed
    }

    pub fn mean_latency_ms(&self) -> f64 {
        match self.runs() {
            0 => 0.0,
            n => self.total_latency_ms as f64 / n as f64,
        }
    }
}

/// Marks one run as in flight until dropped, so cancelled runs still leave
/// the gauge.
pub struct ActiveRun<'a> {
    metrics: &'a PipelineMetrics,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.metrics.active_runs.fetch_sub(1, Ordering::Relaxed);
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_run(&self) -> ActiveRun<'_> {
        self.active_runs.fetch_add(1, Ordering::Relaxed);
        ActiveRun { metrics: self }
    }

    pub fn record_run(
        &self,
        status: RunStatus,
        elapsed: Duration,
        corrections: usize,
        documents_retrieved: usize,
    ) {
        let counter = match status {
            RunStatus::Accept => &self.accepted,
            RunStatus::AbortWithBest => &self.aborted_with_best,
            RunStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.corrections
            .fetch_add(corrections as u64, Ordering::Relaxed);
        self.documents_retrieved
            .fetch_add(documents_retrieved as u64, Ordering::Relaxed);

        let ms = elapsed.as_millis() as u64;
        self.total_latency_ms.fetch_add(ms, Ordering::Relaxed);
        let bucket = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_runs: self.active_runs.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            aborted_with_best: self.aborted_with_best.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            documents_retrieved: self.documents_retrieved.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            latency_buckets: self
                .latency_buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_land_in_status_and_latency_buckets() {
        let metrics = PipelineMetrics::new();
        metrics.record_run(RunStatus::Accept, Duration::from_millis(200), 0, 5);
        metrics.record_run(RunStatus::AbortWithBest, Duration::from_millis(2_000), 2, 3);
        metrics.record_run(RunStatus::Failed, Duration::from_secs(600), 0, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs(), 3);
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.aborted_with_best, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.corrections, 2);
        assert_eq!(snapshot.documents_retrieved, 8);
        assert_eq!(snapshot.latency_buckets[0], 1);
        assert_eq!(snapshot.latency_buckets[2], 1);
        assert_eq!(snapshot.latency_buckets[LATENCY_BUCKETS_MS.len()], 1);
        assert!((snapshot.mean_latency_ms() - 602_200.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_active_gauge_follows_guard() {
        let metrics = PipelineMetrics::new();
        let first = metrics.start_run();
        let second = metrics.start_run();
        assert_eq!(metrics.snapshot().active_runs, 2);
        drop(first);
        assert_eq!(metrics.snapshot().active_runs, 1);
        drop(second);
        assert_eq!(metrics.snapshot().active_runs, 0);
    }
}
