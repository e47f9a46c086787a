//! Point-in-time snapshot and JSON export

use crate::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of every metric, sorted by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values
    pub counters: BTreeMap<String, u64>,
    /// Gauge values
    pub gauges: BTreeMap<String, i64>,
    /// Histogram summaries
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Summary of one histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Observation count
    pub count: u64,
    /// Mean value
    pub mean: f64,
    /// Median bucket bound
    pub p50: u64,
    /// 99th percentile bucket bound
    pub p99: u64,
    /// Largest value seen
    pub max: u64,
}

impl MetricsSnapshot {
    /// Capture the current values of a store
    pub fn from_metrics(metrics: &Metrics) -> Self {
        let histograms = metrics
            .histograms()
            .into_iter()
            .map(|(name, h)| {
                let summary = HistogramSummary {
                    count: h.count(),
                    mean: h.mean(),
                    p50: h.quantile(0.5),
                    p99: h.quantile(0.99),
                    max: h.max(),
                };
                (name, summary)
            })
            .collect();
        Self {
            counters: metrics.counters().into_iter().collect(),
            gauges: metrics.gauges().into_iter().collect(),
            histograms,
        }
    }

    /// Counter value, 0 if never touched
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Export as pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export as single-line JSON
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names;

    #[test]
    fn test_snapshot_json() {
        let metrics = Metrics::new();
        metrics.add(names::BYTES_SENT, 1024);
        metrics.adjust_gauge(names::PEERS_CONNECTED, 2);
        metrics.observe(names::HANDSHAKE_US, 80);

        let snapshot = MetricsSnapshot::from_metrics(&metrics);
        assert_eq!(snapshot.counter(names::BYTES_SENT), 1024);
        assert_eq!(snapshot.counter(names::MSGS_SENT), 0);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("oob.bytes_sent"));
        assert!(json.contains("1024"));
        assert!(json.contains("oob.peers_connected"));
        assert!(json.contains("oob.handshake_us"));
    }

    #[test]
    fn test_snapshot_compact_roundtrip() {
        let metrics = Metrics::new();
        metrics.incr(names::CONNECTS);
        let snapshot = MetricsSnapshot::from_metrics(&metrics);
        let json = snapshot.to_json_compact().unwrap();
        assert!(!json.contains('\n'));
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
