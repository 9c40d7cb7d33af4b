//! Prometheus metrics for the recorder itself
//!
//! - Entries recorded (by type)
//! - Record failures (by type)
//! - Entries pruned by the retention sweep
//! - Observers connected and dropped

use prometheus::{CounterVec, Gauge, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

use debugscope_core::EntryType;

#[derive(Clone)]
pub struct ScopeMetrics {
    registry: Arc<Registry>,

    /// Entries persisted
    pub entries_recorded_total: CounterVec,
    /// Entries whose save failed
    pub record_failures_total: CounterVec,
    /// Entries removed by retention sweeps
    pub entries_pruned_total: IntCounter,
    /// Retention sweeps that failed
    pub prune_failures_total: IntCounter,
    /// Currently registered real-time observers
    pub observers_connected: Gauge,
    /// Observers deregistered after a failed send
    pub observers_dropped_total: IntCounter,
}

impl ScopeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let entries_recorded_total = CounterVec::new(
            Opts::new("debugscope_entries_recorded_total", "Total number of entries recorded"),
            &["type"],
        )?;

        let record_failures_total = CounterVec::new(
            Opts::new(
                "debugscope_record_failures_total",
                "Total number of entries that failed to persist",
            ),
            &["type"],
        )?;

        let entries_pruned_total = IntCounter::with_opts(Opts::new(
            "debugscope_entries_pruned_total",
            "Total number of entries removed by retention",
        ))?;

        let prune_failures_total = IntCounter::with_opts(Opts::new(
            "debugscope_prune_failures_total",
            "Total number of failed retention sweeps",
        ))?;

        let observers_connected = Gauge::with_opts(Opts::new(
            "debugscope_observers_connected",
            "Number of connected real-time observers",
        ))?;

        let observers_dropped_total = IntCounter::with_opts(Opts::new(
            "debugscope_observers_dropped_total",
            "Total number of observers dropped after a failed send",
        ))?;

        registry.register(Box::new(entries_recorded_total.clone()))?;
        registry.register(Box::new(record_failures_total.clone()))?;
        registry.register(Box::new(entries_pruned_total.clone()))?;
        registry.register(Box::new(prune_failures_total.clone()))?;
        registry.register(Box::new(observers_connected.clone()))?;
        registry.register(Box::new(observers_dropped_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            entries_recorded_total,
            record_failures_total,
            entries_pruned_total,
            prune_failures_total,
            observers_connected,
            observers_dropped_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_entry(&self, entry_type: EntryType) {
        self.entries_recorded_total
            .with_label_values(&[entry_type.as_str()])
            .inc();
    }

    pub fn record_failure(&self, entry_type: EntryType) {
        self.record_failures_total
            .with_label_values(&[entry_type.as_str()])
            .inc();
    }

    pub fn record_pruned(&self, count: u64) {
        self.entries_pruned_total.inc_by(count);
    }

    pub fn record_prune_failure(&self) {
        self.prune_failures_total.inc();
    }

    /// Sync observer gauges with the hub's counters
    ///
    /// `dropped_total` is the hub's monotonic drop count.
    pub fn set_observers(&self, connected: usize, dropped_total: u64) {
        self.observers_connected.set(connected as f64);
        let seen = self.observers_dropped_total.get();
        if dropped_total > seen {
            self.observers_dropped_total.inc_by(dropped_total - seen);
        }
    }

    /// Render in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ScopeMetrics::new().unwrap();
        metrics.record_entry(EntryType::Log);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_counters_render() {
        let metrics = ScopeMetrics::new().unwrap();
        metrics.record_entry(EntryType::Query);
        metrics.record_entry(EntryType::Query);
        metrics.record_failure(EntryType::Request);
        metrics.record_pruned(7);

        let text = metrics.encode().unwrap();
        assert!(text.contains("debugscope_entries_recorded_total{type=\"query\"} 2"));
        assert!(text.contains("debugscope_record_failures_total{type=\"request\"} 1"));
        assert!(text.contains("debugscope_entries_pruned_total 7"));
    }

    #[test]
    fn test_observer_drop_counter_is_monotonic() {
        let metrics = ScopeMetrics::new().unwrap();
        metrics.set_observers(3, 2);
        metrics.set_observers(1, 2);
        metrics.set_observers(1, 5);

        assert_eq!(metrics.observers_dropped_total.get(), 5);
        assert_eq!(metrics.observers_connected.get(), 1.0);
    }
}
