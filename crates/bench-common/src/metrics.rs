//! Execution-time metrics for periodic tasks.
//!
//! A fixed-size ring buffer keeps the most recent samples for percentile
//! queries; running totals cover the whole lifetime of the task.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution-time statistics for one periodic task.
#[derive(Debug, Clone)]
pub struct CycleMetrics {
    /// Ring buffer of execution times in nanoseconds.
    samples: Box<[u64]>,
    write_pos: usize,
    /// Number of valid samples (saturates at buffer size).
    sample_count: usize,
    total_cycles: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
    /// Executions that took longer than the task period.
    overrun_count: u64,
    /// Ticks skipped because the scheduler fell behind.
    missed_ticks: u64,
    period_ns: u64,
}

impl CycleMetrics {
    /// Create a collector retaining `histogram_size` samples for a task
    /// with the given `period`.
    #[must_use]
    pub fn new(histogram_size: usize, period: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_cycles: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overrun_count: 0,
            missed_ticks: 0,
            period_ns: duration_ns(period),
        }
    }

    /// Record one task execution. Returns true if it overran the period.
    pub fn record(&mut self, execution: Duration) -> bool {
        let ns = duration_ns(execution);

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = (self.sample_count + 1).min(self.samples.len());

        self.total_cycles += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        let overrun = ns > self.period_ns;
        if overrun {
            self.overrun_count += 1;
        }
        overrun
    }

    /// Count ticks skipped after falling behind schedule.
    pub fn record_missed(&mut self, ticks: u64) {
        self.missed_ticks += ticks;
    }

    /// Total executions recorded.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Minimum observed execution time.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Maximum observed execution time.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean execution time.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_cycles))
    }

    /// Number of executions that exceeded the period.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Number of skipped ticks.
    #[must_use]
    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks
    }

    /// Percentile (0.0 to 100.0) over the retained samples.
    ///
    /// Returns `None` without samples or for an out-of-range percentile.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(Duration::from_nanos(sorted[idx.min(sorted.len() - 1)]))
    }

    /// Snapshot of the current statistics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_cycles: self.total_cycles,
            min_us: self.min().map(|d| d.as_micros()),
            max_us: self.max().map(|d| d.as_micros()),
            mean_us: self.mean().map(|d| d.as_micros()),
            p99_us: self.percentile(99.0).map(|d| d.as_micros()),
            overrun_count: self.overrun_count,
            missed_ticks: self.missed_ticks,
        }
    }
}

fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Point-in-time copy of [`CycleMetrics`], suitable for logging or export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total executions.
    pub total_cycles: u64,
    /// Minimum execution time in microseconds.
    pub min_us: Option<u128>,
    /// Maximum execution time in microseconds.
    pub max_us: Option<u128>,
    /// Mean execution time in microseconds.
    pub mean_us: Option<u128>,
    /// 99th percentile in microseconds.
    pub p99_us: Option<u128>,
    /// Executions longer than the period.
    pub overrun_count: u64,
    /// Skipped ticks.
    pub missed_ticks: u64,
}
