//! # oob-metrics
//!
//! Transport statistics for the out-of-band messaging layer.
//!
//! Features:
//! - Named counters (messages, bytes, connects, failures)
//! - Gauges (connected peers)
//! - Latency histograms with bucket quantiles (handshake time)
//! - JSON snapshot export
//!
//! Metric names used by the TCP transport live in [`names`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collector;
mod export;
mod histogram;
pub mod names;

pub use collector::Metrics;
pub use export::{HistogramSummary, MetricsSnapshot};
pub use histogram::Histogram;

/// Time a block and record the elapsed microseconds into a histogram.
#[macro_export]
macro_rules! timed {
    ($metrics:expr, $name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        $metrics.observe($name, start.elapsed().as_micros() as u64);
        result
    }};
}
