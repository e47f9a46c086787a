//! Shared metrics store

use crate::Histogram;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Named counters, gauges and histograms.
///
/// Entries are created on first use. The fast path only takes the read lock.
pub struct Metrics {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, Arc<AtomicI64>>>,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
}

impl Metrics {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// Create an empty store behind an `Arc`
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn counter_handle(&self, name: &str) -> Arc<AtomicU64> {
        if let Some(c) = self.counters.read().get(name) {
            return Arc::clone(c);
        }
        let mut counters = self.counters.write();
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        )
    }

    fn gauge_handle(&self, name: &str) -> Arc<AtomicI64> {
        if let Some(g) = self.gauges.read().get(name) {
            return Arc::clone(g);
        }
        let mut gauges = self.gauges.write();
        Arc::clone(
            gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicI64::new(0))),
        )
    }

    /// Add `delta` to a counter
    pub fn add(&self, name: &str, delta: u64) {
        self.counter_handle(name).fetch_add(delta, Ordering::Relaxed);
    }

    /// Increment a counter by one
    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    /// Set a gauge
    pub fn set_gauge(&self, name: &str, value: i64) {
        self.gauge_handle(name).store(value, Ordering::Relaxed);
    }

    /// Move a gauge up or down
    pub fn adjust_gauge(&self, name: &str, delta: i64) {
        self.gauge_handle(name).fetch_add(delta, Ordering::Relaxed);
    }

    /// Record a histogram observation
    pub fn observe(&self, name: &str, value: u64) {
        if let Some(h) = self.histograms.read().get(name) {
            h.observe(value);
            return;
        }
        let mut histograms = self.histograms.write();
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::new()))
            .observe(value);
    }

    /// Current counter value
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
    }

    /// Current gauge value
    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
    }

    /// Observation count of a histogram
    pub fn histogram_count(&self, name: &str) -> Option<u64> {
        self.histograms.read().get(name).map(|h| h.count())
    }

    pub(crate) fn counters(&self) -> Vec<(String, u64)> {
        self.counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    pub(crate) fn gauges(&self) -> Vec<(String, i64)> {
        self.gauges
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    pub(crate) fn histograms(&self) -> Vec<(String, Arc<Histogram>)> {
        self.histograms
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Log every counter and gauge at debug level
    pub fn log_summary(&self) {
        let mut counters = self.counters();
        counters.sort();
        for (name, value) in counters {
            tracing::debug!(metric = %name, value, "counter");
        }
        for (name, value) in self.gauges() {
            tracing::debug!(metric = %name, value, "gauge");
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
