//! Metrics registry
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start
//! - Thread-safe, lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by the meta cache, controller and backends.
///
/// All counters use Relaxed ordering; exact cross-counter consistency is
/// not required.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    meta_builds: AtomicU64,
    meta_build_failures: AtomicU64,
    invalidations: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
    rejections: AtomicU64,
    journal_records: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Meta cache

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_meta_builds(&self) {
        self.meta_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_meta_build_failures(&self) {
        self.meta_build_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_invalidations(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    // Documents

    pub fn increment_inserts(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_updates(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_removes(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rejections(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    // Storage

    pub fn add_journal_records(&self, count: u64) {
        self.journal_records.fetch_add(count, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            meta_builds: self.meta_builds.load(Ordering::Relaxed),
            meta_build_failures: self.meta_build_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            journal_records: self.journal_records.load(Ordering::Relaxed),
        }
    }

    /// Snapshot rendered as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub meta_builds: u64,
    pub meta_build_failures: u64,
    pub invalidations: u64,
    pub inserts: u64,
    pub updates: u64,
    pub removes: u64,
    pub rejections: u64,
    pub journal_records: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.cache_hits, 0);
        assert_eq!(snapshot.inserts, 0);
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();
        registry.increment_cache_hits();
        registry.increment_cache_hits();
        registry.increment_cache_misses();
        registry.increment_meta_builds();
        registry.increment_rejections();
        registry.add_journal_records(5);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.meta_builds, 1);
        assert_eq!(snapshot.rejections, 1);
        assert_eq!(snapshot.journal_records, 5);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_inserts();
        let json = registry.to_json();
        assert_eq!(json["inserts"], 1);
        assert_eq!(json["removes"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_cache_hits();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().cache_hits, 800);
    }
}
