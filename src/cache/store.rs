//! Cache store: namespace id to current snapshot
//!
//! Reads are lock-free (`arc-swap` pointer loads); installs replace the whole
//! snapshot atomically and are serialized per namespace by the slot's refresh
//! guard. Superseded snapshots live until the last in-flight reader drops its
//! reference.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::cache::NamespaceSnapshot;

#[derive(Default)]
pub(crate) struct SlotMeta {
    pub(crate) last_checked_at: Option<Instant>,
    pub(crate) last_applied_checksum: Option<String>,
    pub(crate) last_refresh_at: Option<DateTime<Utc>>,
    pub(crate) refresh_errors: u64,
}

/// Per-namespace cache slot.
pub(crate) struct NamespaceSlot {
    /// Current snapshot; `None` until the first install or after eviction.
    pub(crate) snapshot: ArcSwapOption<NamespaceSnapshot>,

    /// Serializes refreshes for this namespace; concurrent triggers coalesce
    /// behind it (single-flight).
    pub(crate) refresh_guard: tokio::sync::Mutex<()>,

    pub(crate) meta: RwLock<SlotMeta>,

    /// Milliseconds since the cache epoch of the last read, for LRU
    /// eviction. Atomic so reads stay lock-free.
    last_read_ms: AtomicU64,
}

impl NamespaceSlot {
    fn new() -> Self {
        Self {
            snapshot: ArcSwapOption::empty(),
            refresh_guard: tokio::sync::Mutex::new(()),
            meta: RwLock::new(SlotMeta::default()),
            last_read_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_fresh(&self, refresh_interval: Duration) -> bool {
        if self.snapshot.load().is_none() {
            return false;
        }
        self.meta
            .read()
            .last_checked_at
            .map(|at| at.elapsed() <= refresh_interval)
            .unwrap_or(false)
    }

    pub(crate) fn mark_checked(&self) {
        self.meta.write().last_checked_at = Some(Instant::now());
    }

    pub(crate) fn record_refresh_error(&self) {
        self.meta.write().refresh_errors += 1;
    }
}

/// Point-in-time cache statistics for one namespace.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Namespace id.
    pub namespace: String,
    /// Whether a snapshot is currently resident.
    pub resident: bool,
    /// Checksum of the resident snapshot.
    pub checksum: Option<String>,
    /// Build time of the resident snapshot.
    pub built_at: Option<DateTime<Utc>>,
    /// Last successful refresh.
    pub last_refresh_at: Option<DateTime<Utc>>,
    /// Seconds since the last successful refresh.
    pub staleness_seconds: Option<f64>,
    /// Cumulative refresh failures.
    pub refresh_errors: u64,
    /// Rough footprint of the resident snapshot.
    pub approx_bytes: u64,
}

/// Maps namespace ids to their current snapshots.
pub struct SnapshotCache {
    slots: DashMap<String, Arc<NamespaceSlot>>,
    max_bytes: u64,
    epoch: Instant,
}

impl SnapshotCache {
    /// Create a cache bounded by `max_bytes` of aggregate snapshot footprint
    /// (0 disables the ceiling).
    pub fn new(max_bytes: u64) -> Self {
        Self {
            slots: DashMap::new(),
            max_bytes,
            epoch: Instant::now(),
        }
    }

    pub(crate) fn slot(&self, namespace: &str) -> Arc<NamespaceSlot> {
        self.slots
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(NamespaceSlot::new()))
            .value()
            .clone()
    }

    fn existing_slot(&self, namespace: &str) -> Option<Arc<NamespaceSlot>> {
        self.slots.get(namespace).map(|entry| entry.value().clone())
    }

    /// Capture a stable reference to the current snapshot, if resident.
    /// Never blocks on a concurrent install.
    pub fn read(&self, namespace: &str) -> Option<Arc<NamespaceSnapshot>> {
        let slot = self.existing_slot(namespace)?;
        let snapshot = slot.snapshot.load_full()?;
        slot.last_read_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
        Some(snapshot)
    }

    /// Atomically replace the namespace's snapshot. The old snapshot is
    /// released once its last reader drops.
    pub fn install(&self, namespace: &str, snapshot: Arc<NamespaceSnapshot>) {
        let slot = self.slot(namespace);
        {
            let mut meta = slot.meta.write();
            meta.last_applied_checksum = Some(snapshot.checksum.clone());
            meta.last_refresh_at = Some(Utc::now());
            meta.last_checked_at = Some(Instant::now());
        }
        slot.snapshot.store(Some(snapshot));
        slot.last_read_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.enforce_budget(namespace);
    }

    /// Drop the namespace's cache entry entirely.
    pub fn invalidate(&self, namespace: &str) {
        self.slots.remove(namespace);
    }

    /// Ids of all namespaces currently known to the cache.
    pub fn known_namespaces(&self) -> Vec<String> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Aggregate footprint of resident snapshots.
    pub fn total_bytes(&self) -> u64 {
        self.slots
            .iter()
            .filter_map(|entry| entry.snapshot.load().as_ref().map(|s| s.approx_bytes))
            .sum()
    }

    /// Statistics for one namespace, if the cache has seen it.
    pub fn stats(&self, namespace: &str) -> Option<CacheStats> {
        let slot = self.existing_slot(namespace)?;
        let snapshot = slot.snapshot.load_full();
        let meta = slot.meta.read();
        Some(CacheStats {
            namespace: namespace.to_string(),
            resident: snapshot.is_some(),
            checksum: snapshot.as_ref().map(|s| s.checksum.clone()),
            built_at: snapshot.as_ref().map(|s| s.built_at),
            last_refresh_at: meta.last_refresh_at,
            staleness_seconds: meta
                .last_refresh_at
                .map(|at| (Utc::now() - at).num_milliseconds() as f64 / 1000.0),
            refresh_errors: meta.refresh_errors,
            approx_bytes: snapshot.as_ref().map(|s| s.approx_bytes).unwrap_or(0),
        })
    }

    /// Evict least-recently-read snapshots until the aggregate footprint fits
    /// the ceiling. The just-installed namespace is never the victim, so an
    /// oversized single snapshot still serves until something replaces it.
    fn enforce_budget(&self, just_installed: &str) {
        if self.max_bytes == 0 {
            return;
        }
        while self.total_bytes() > self.max_bytes {
            let victim = self
                .slots
                .iter()
                .filter(|entry| {
                    entry.key().as_str() != just_installed && entry.snapshot.load().is_some()
                })
                .min_by_key(|entry| entry.last_read_ms.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());

            let Some(victim) = victim else { break };
            if let Some(slot) = self.existing_slot(&victim) {
                slot.snapshot.store(None);
                // Clearing the applied checksum forces a rebuild on the next
                // read-through for this namespace.
                slot.meta.write().last_applied_checksum = None;
                debug!(namespace = %victim, "evicted snapshot to honor cache ceiling");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(namespace: &str, checksum: &str, padding: usize) -> Arc<NamespaceSnapshot> {
        Arc::new(NamespaceSnapshot {
            namespace: namespace.to_string(),
            checksum: checksum.to_string(),
            built_at: Utc::now(),
            approx_bytes: padding as u64,
            fields: HashMap::new(),
            active_functions: HashMap::new(),
            active_rules: HashMap::new(),
            active_workflows: HashMap::new(),
            terminals: HashMap::new(),
        })
    }

    #[test]
    fn install_then_read_returns_the_same_snapshot() {
        let cache = SnapshotCache::new(0);
        let snap = snapshot("demo", "abc", 100);
        cache.install("demo", snap.clone());

        let read = cache.read("demo").unwrap();
        assert!(Arc::ptr_eq(&read, &snap));
        assert!(cache.read("other").is_none());
    }

    #[test]
    fn in_flight_reader_keeps_superseded_snapshot_alive() {
        let cache = SnapshotCache::new(0);
        let old = snapshot("demo", "v1", 100);
        cache.install("demo", old.clone());

        let captured = cache.read("demo").unwrap();
        let new = snapshot("demo", "v2", 100);
        cache.install("demo", new.clone());

        // The request that captured the old snapshot still sees it; new
        // readers see the replacement.
        assert_eq!(captured.checksum, "v1");
        assert_eq!(cache.read("demo").unwrap().checksum, "v2");
    }

    #[test]
    fn budget_evicts_least_recently_read() {
        let cache = SnapshotCache::new(250);
        cache.install("a", snapshot("a", "ca", 100));
        cache.install("b", snapshot("b", "cb", 100));

        // Touch "a" so "b" becomes the LRU victim.
        std::thread::sleep(Duration::from_millis(5));
        cache.read("a");

        cache.install("c", snapshot("c", "cc", 100));

        assert!(cache.read("a").is_some());
        assert!(cache.read("b").is_none());
        assert!(cache.read("c").is_some());
        assert!(cache.total_bytes() <= 250);
    }

    #[test]
    fn stats_reflect_residency() {
        let cache = SnapshotCache::new(0);
        assert!(cache.stats("demo").is_none());

        cache.install("demo", snapshot("demo", "abc", 42));
        let stats = cache.stats("demo").unwrap();
        assert!(stats.resident);
        assert_eq!(stats.checksum.as_deref(), Some("abc"));
        assert_eq!(stats.approx_bytes, 42);
        assert_eq!(stats.refresh_errors, 0);
    }

    #[test]
    fn invalidate_removes_the_entry() {
        let cache = SnapshotCache::new(0);
        cache.install("demo", snapshot("demo", "abc", 10));
        cache.invalidate("demo");
        assert!(cache.read("demo").is_none());
        assert!(cache.known_namespaces().is_empty());
    }
}
