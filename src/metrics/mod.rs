pub mod latency;

pub use latency::{histogram, record_elapsed, LatencyGuard, LatencyStats, LatencyTracker};
