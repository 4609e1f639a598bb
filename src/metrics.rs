//! A minimal metrics sink interface.
//!
//! The server increments a handful of named counters (requests received,
//! errors by code class, notifications processed, active workers) through
//! this trait. A full metrics registry -- scraping, exposition formats,
//! histograms -- is an external collaborator's job; this
//! crate defines only the narrow interface `rpc.serverInfo` and the
//! dispatcher need, with a simple in-process default implementation for
//! tests and small deployments.

use std::collections::HashMap;
use std::sync::Mutex;

/// Something that can count named events.
pub trait MetricsSink: Send + Sync {
    /// Increments the named counter by one.
    fn incr(&self, name: &str);

    /// Returns a snapshot of every counter's current value.
    fn snapshot(&self) -> HashMap<String, u64>;
}

/// An in-process [`MetricsSink`] backed by a `Mutex<HashMap<..>>`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
}

impl InMemoryMetrics {
    /// Builds an empty sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr(&self, name: &str) {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        *counters.entry(name.to_string()).or_insert(0) += 1;
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// A [`MetricsSink`] that discards everything, for callers that don't
/// care to wire one up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _name: &str) {}

    fn snapshot(&self) -> HashMap<String, u64> {
        HashMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_counts() {
        let m = InMemoryMetrics::new();
        m.incr("requests");
        m.incr("requests");
        m.incr("errors");
        let snap = m.snapshot();
        assert_eq!(snap.get("requests"), Some(&2));
        assert_eq!(snap.get("errors"), Some(&1));
    }

    #[test]
    fn test_noop_never_records() {
        let m = NoopMetrics;
        m.incr("anything");
        assert!(m.snapshot().is_empty());
    }
}
