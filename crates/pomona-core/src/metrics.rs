//! Structured metrics for harvest runs.
//!
//! The harvester reports counters and timings through [`MetricsSink`] instead
//! of printing them. [`InMemoryMetrics`] aggregates them for an end-of-run
//! summary; a host can plug in its own exporter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

/// Metric names emitted by the harvester.
pub mod names {
    pub const ITEMS_DISCOVERED: &str = "harvest.items.discovered";
    pub const ITEMS_DONE: &str = "harvest.items.done";
    pub const ITEMS_SKIPPED: &str = "harvest.items.skipped";
    pub const ITEMS_FAILED: &str = "harvest.items.failed";
    pub const SLOW_ITEMS: &str = "harvest.items.slow";
    pub const ITEM_DURATION: &str = "harvest.item.duration";
    pub const RECORD_SAVES: &str = "harvest.record.saves";
    pub const RECORD_SAVE_DURATION: &str = "harvest.record.save_duration";
    pub const CHECKPOINTS: &str = "harvest.job.checkpoints";
    pub const CHECKPOINT_DURATION: &str = "harvest.job.checkpoint_duration";
    pub const FETCH_ATTEMPTS: &str = "fetch.attempts";
    pub const FETCH_RETRIES: &str = "fetch.retries";
    pub const BYTES_DOWNLOADED: &str = "fetch.bytes";
    pub const CATALOG_DOWNLOAD_DURATION: &str = "fetch.catalog_duration";
}

/// Receiver for counters and timings.
///
/// Both methods default to no-ops.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str, value: u64) {
        let _ = (name, value);
    }

    fn observe(&self, name: &'static str, elapsed: Duration) {
        let _ = (name, elapsed);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Aggregates metrics in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<&'static str, u64>>,
    timings: Mutex<HashMap<&'static str, Vec<Duration>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current values into a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .lock()
            .map(|c| c.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        let timings = self
            .timings
            .lock()
            .map(|t| {
                t.iter()
                    .map(|(k, samples)| (*k, TimingSummary::from_samples(samples)))
                    .collect()
            })
            .unwrap_or_default();
        MetricsSnapshot { counters, timings }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &'static str, value: u64) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name).or_insert(0) += value;
        }
    }

    fn observe(&self, name: &'static str, elapsed: Duration) {
        if let Ok(mut timings) = self.timings.lock() {
            timings.entry(name).or_default().push(elapsed);
        }
    }
}

/// Summary statistics of one timing metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingSummary {
    pub count: usize,
    pub mean: Duration,
    pub p95: Duration,
    pub max: Duration,
}

impl TimingSummary {
    fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let total: Duration = sorted.iter().sum();
        let p95_index = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        Self {
            count: sorted.len(),
            mean: total / sorted.len() as u32,
            p95: sorted[p95_index.min(sorted.len() - 1)],
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
    pub timings: BTreeMap<&'static str, TimingSummary>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn timing(&self, name: &str) -> Option<&TimingSummary> {
        self.timings.get(name)
    }
}
