//! Reader Metrics
//!
//! Prometheus counters for the read path. Counters are plain `IntCounter`s
//! (atomic internally) so the hot path never locks.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};

use super::coordinator::Unavailable;
use crate::error::Result;

const NAMESPACE: &str = "columnlet_cache";

/// Read-path counters
#[derive(Debug, Clone)]
pub struct ReaderMetrics {
    hits: IntCounter,
    misses: IntCounter,
    unavailable_writer: IntCounter,
    unavailable_saturated: IntCounter,
    malformed: IntCounter,
    miss_report_failures: IntCounter,
    bytes_served: IntCounter,
}

fn counter(name: &str, help: &str) -> IntCounter {
    // Static names and help strings always form valid options.
    IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))
        .unwrap_or_else(|e| unreachable!("invalid metric {name}: {e}"))
}

impl Default for ReaderMetrics {
    fn default() -> Self {
        Self {
            hits: counter("hits_total", "Reads served from the cache"),
            misses: counter("misses_total", "Reads not found in the index"),
            unavailable_writer: counter(
                "unavailable_writer_total",
                "Reads refused while a writer rebuilt the index",
            ),
            unavailable_saturated: counter(
                "unavailable_saturated_total",
                "Reads refused because the reader count was saturated",
            ),
            malformed: counter(
                "malformed_total",
                "Lookups aborted on malformed index or content data",
            ),
            miss_report_failures: counter(
                "miss_report_failures_total",
                "Miss reports dropped by the miss channel",
            ),
            bytes_served: counter("bytes_served_total", "Payload bytes returned on hits"),
        }
    }
}

impl ReaderMetrics {
    /// Create a new set of counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every counter with `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        for c in [
            &self.hits,
            &self.misses,
            &self.unavailable_writer,
            &self.unavailable_saturated,
            &self.malformed,
            &self.miss_report_failures,
            &self.bytes_served,
        ] {
            registry.register(Box::new(c.clone()))?;
        }
        Ok(())
    }

    pub fn record_hit(&self, bytes: usize) {
        self.hits.inc();
        self.bytes_served.inc_by(bytes as u64);
    }

    pub fn record_miss(&self) {
        self.misses.inc();
    }

    pub fn record_unavailable(&self, reason: Unavailable) {
        match reason {
            Unavailable::WriterActive => self.unavailable_writer.inc(),
            Unavailable::Saturated => self.unavailable_saturated.inc(),
        }
    }

    pub fn record_malformed(&self) {
        self.malformed.inc();
    }

    pub fn record_miss_report_failure(&self) {
        self.miss_report_failures.inc();
    }

    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }

    /// Refused reads, both reasons combined
    pub fn unavailable(&self) -> u64 {
        self.unavailable_writer.get() + self.unavailable_saturated.get()
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.get()
    }

    pub fn miss_report_failures(&self) -> u64 {
        self.miss_report_failures.get()
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.get()
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

/// Render a registry in the Prometheus text exposition format
pub fn encode_text(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = ReaderMetrics::new();
        m.record_hit(100);
        m.record_hit(28);
        m.record_miss();
        m.record_unavailable(Unavailable::WriterActive);
        m.record_unavailable(Unavailable::Saturated);
        m.record_malformed();
        m.record_miss_report_failure();

        assert_eq!(m.hits(), 2);
        assert_eq!(m.misses(), 1);
        assert_eq!(m.unavailable(), 2);
        assert_eq!(m.malformed(), 1);
        assert_eq!(m.miss_report_failures(), 1);
        assert_eq!(m.bytes_served(), 128);
    }

    #[test]
    fn test_hit_ratio() {
        let m = ReaderMetrics::new();
        assert_eq!(m.hit_ratio(), 0.0);
        m.record_hit(1);
        m.record_miss();
        assert_eq!(m.hit_ratio(), 0.5);
    }

    #[test]
    fn test_register_and_encode() {
        let m = ReaderMetrics::new();
        let registry = Registry::new();
        m.register(&registry).unwrap();
        m.record_hit(5);

        let text = encode_text(&registry).unwrap();
        assert!(text.contains("columnlet_cache_hits_total 1"));
        assert!(text.contains("columnlet_cache_bytes_served_total 5"));
    }

    #[test]
    fn test_double_register_fails() {
        let m = ReaderMetrics::new();
        let registry = Registry::new();
        m.register(&registry).unwrap();
        assert!(m.register(&registry).is_err());
    }

    #[test]
    fn test_clones_share_counters() {
        let m = ReaderMetrics::new();
        let other = m.clone();
        other.record_miss();
        assert_eq!(m.misses(), 1);
    }
}
