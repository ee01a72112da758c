use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use utoipa::ToSchema;

/// 1ns to 60 seconds
const MAX_TRACKED_NS: u64 = 60_000_000_000;

/// Empty histogram with the tracker's bounds
pub fn histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, MAX_TRACKED_NS, 3).expect("static histogram bounds are valid")
}

/// Record the time since `start` into `histogram`
#[inline]
pub fn record_elapsed(histogram: &mut Histogram<u64>, start: Instant) {
    // Zero is below the histogram's lowest trackable value
    let ns = (start.elapsed().as_nanos() as u64).clamp(1, MAX_TRACKED_NS);
    let _ = histogram.record(ns);
}

/// High-precision latency tracker using HDR Histogram
/// HDR Histograms provide accurate percentile calculations with minimal memory
///
/// Each metric has its own lock. Connections batch command samples locally
/// and merge them here, so the command path does not contend on it.
pub struct LatencyTracker {
    /// Time to push one tick's deltas to every connection
    fanout_latency_ns: Mutex<Histogram<u64>>,

    /// Time to handle one client command
    command_latency_ns: Mutex<Histogram<u64>>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            fanout_latency_ns: Mutex::new(histogram()),
            command_latency_ns: Mutex::new(histogram()),
        }
    }

    #[inline]
    pub fn record_fanout(&self, start: Instant) {
        record_elapsed(&mut self.fanout_latency_ns.lock(), start);
    }

    /// Fold a batch of command samples into the shared histogram
    pub fn merge_commands(&self, samples: &Histogram<u64>) {
        if samples.is_empty() {
            return;
        }
        let _ = self.command_latency_ns.lock().add(samples);
    }

    pub fn fanout_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("fanout", &self.fanout_latency_ns.lock())
    }

    pub fn command_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("command", &self.command_latency_ns.lock())
    }

    pub fn all_stats(&self) -> Vec<LatencyStats> {
        vec![self.fanout_stats(), self.command_stats()]
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LatencyStats {
    pub metric_name: String,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub sample_count: u64,
}

impl LatencyStats {
    fn from_histogram(name: &str, histogram: &Histogram<u64>) -> Self {
        Self {
            metric_name: name.to_string(),
            p50_ns: histogram.value_at_percentile(50.0),
            p95_ns: histogram.value_at_percentile(95.0),
            p99_ns: histogram.value_at_percentile(99.0),
            max_ns: histogram.max(),
            mean_ns: histogram.mean(),
            sample_count: histogram.len(),
        }
    }
}

/// RAII guard that records fan-out latency on drop
pub struct LatencyGuard<'a> {
    tracker: &'a LatencyTracker,
    start: Instant,
}

impl<'a> LatencyGuard<'a> {
    pub fn fanout(tracker: &'a LatencyTracker) -> Self {
        Self {
            tracker,
            start: Instant::now(),
        }
    }
}

impl<'a> Drop for LatencyGuard<'a> {
    fn drop(&mut self) {
        self.tracker.record_fanout(self.start);
    }
}
