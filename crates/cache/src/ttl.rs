//! In-process TTL cache backed by DashMap.
//! Holds responses of idempotent reads so repeated lookups skip the network.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// TTL applied by [`TtlCache::insert`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry<V> {
    value: V,
    stored_at_ms: u64,
    ttl_ms: u64,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) < self.ttl_ms
    }
}

/// Key → value store where every entry expires after its own TTL.
///
/// Cloning is cheap and yields a handle onto the same entries. Values are
/// handed out as clones; entries never leave the map by reference.
pub struct TtlCache<V> {
    store: Arc<DashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    name: &'static str,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            default_ttl: self.default_ttl,
            clock: Arc::clone(&self.clock),
            name: self.name,
        }
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            default_ttl,
            clock,
            name: "default",
        }
    }

    /// Label reported with this cache's metrics.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a value, returns None if expired or missing. Expired entries are
    /// evicted on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        {
            let entry = match self.store.get(key) {
                Some(entry) => entry,
                None => {
                    metrics::counter!("cache.miss", "cache" => self.name).increment(1);
                    return None;
                }
            };
            if entry.is_fresh(now) {
                metrics::counter!("cache.hit", "cache" => self.name).increment(1);
                return Some(entry.value.clone());
            }
        }

        // Only drop the entry we judged stale; a concurrent `set` may have
        // already replaced it.
        if self
            .store
            .remove_if(key, |_, entry| !entry.is_fresh(now))
            .is_some()
        {
            metrics::counter!("cache.evicted", "cache" => self.name).increment(1);
            debug!(cache = self.name, key = key, "Evicted expired entry on read");
        }
        metrics::counter!("cache.miss", "cache" => self.name).increment(1);
        None
    }

    /// Insert or overwrite `key` with an explicit TTL.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.store.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at_ms: self.clock.now_millis(),
                ttl_ms: millis(ttl),
            },
        );
    }

    /// Insert or overwrite `key` with the cache's default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Remove every entry whose key matches `pattern`. Returns the number
    /// removed.
    pub fn clear_matching(&self, pattern: &Regex) -> usize {
        let mut removed = 0;
        self.store.retain(|key, _| {
            let matched = pattern.is_match(key);
            removed += usize::from(matched);
            !matched
        });
        if removed > 0 {
            debug!(
                cache = self.name,
                pattern = pattern.as_str(),
                removed = removed,
                "Invalidated cache entries"
            );
        }
        removed
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut evicted = 0;
        self.store.retain(|_, entry| {
            let fresh = entry.is_fresh(now);
            evicted += usize::from(!fresh);
            fresh
        });
        metrics::counter!("cache.evicted", "cache" => self.name).increment(evicted as u64);
        evicted
    }

    /// Whether a fresh entry exists for `key`. Does not evict.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.store
            .get(key)
            .map(|entry| entry.is_fresh(now))
            .unwrap_or(false)
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Whole milliseconds in `duration`, saturating instead of wrapping.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache_with_clock() -> (TtlCache<serde_json::Value>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::with_clock(DEFAULT_TTL, clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_expiry_with_simulated_clock() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", serde_json::json!({"id": 1}), Duration::from_millis(1000));
        assert_eq!(cache.get("k"), Some(serde_json::json!({"id": 1})));

        clock.advance(Duration::from_millis(1100));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0, "expired entry must be evicted, not just hidden");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_ttl_boundary() {
        let (cache, clock) = cache_with_clock();
        cache.set("a", serde_json::json!(1), Duration::from_millis(500));

        clock.advance(Duration::from_millis(499));
        assert!(cache.get("a").is_some());

        clock.advance(Duration::from_millis(1));
        assert!(cache.get("a").is_none(), "age == ttl counts as expired");
    }

    #[test]
    fn test_default_ttl_is_five_minutes() {
        let (cache, clock) = cache_with_clock();
        cache.insert("a", serde_json::json!("v"));
        clock.advance(Duration::from_secs(299));
        assert!(cache.get("a").is_some());
        clock.advance(Duration::from_secs(1));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_set_overwrites_and_restarts_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("a", serde_json::json!(1), Duration::from_millis(100));
        clock.advance(Duration::from_millis(80));
        cache.set("a", serde_json::json!(2), Duration::from_millis(100));
        clock.advance(Duration::from_millis(80));
        assert_eq!(cache.get("a"), Some(serde_json::json!(2)));
    }

    #[test]
    fn test_delete_and_clear() {
        let (cache, _) = cache_with_clock();
        cache.insert("a", serde_json::json!(1));
        cache.insert("b", serde_json::json!(2));

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"), "deleting a missing key is not an error");
        assert_eq!(cache.get("a"), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_matching_is_selective_and_idempotent() {
        let (cache, _) = cache_with_clock();
        cache.insert("tenant:acme:/stations", serde_json::json!([1]));
        cache.insert("tenant:acme:/stations:{\"page\":2}", serde_json::json!([2]));
        cache.insert("tenant:acme:/dashboards", serde_json::json!([3]));
        cache.insert("tenant:beta:/stations", serde_json::json!([4]));

        let pattern = Regex::new("^tenant:acme:/stations").unwrap();
        assert_eq!(cache.clear_matching(&pattern), 2);
        assert_eq!(cache.clear_matching(&pattern), 0);

        assert_eq!(cache.get("tenant:acme:/dashboards"), Some(serde_json::json!([3])));
        assert_eq!(cache.get("tenant:beta:/stations"), Some(serde_json::json!([4])));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_huge_ttl_does_not_wrap() {
        let (cache, clock) = cache_with_clock();
        cache.set("forever", serde_json::json!(1), Duration::from_secs(u64::MAX));
        clock.advance(Duration::from_secs(24 * 60 * 60));
        assert!(cache.get("forever").is_some());
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache_with_clock();
        cache.set("short", serde_json::json!(1), Duration::from_millis(10));
        cache.set("long", serde_json::json!(2), Duration::from_secs(10));
        clock.advance(Duration::from_millis(20));

        assert!(!cache.contains_key("short"));
        assert_eq!(cache.len(), 2, "contains_key does not evict");
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.contains_key("long"));
    }

    #[test]
    fn test_clones_share_entries() {
        let (cache, _) = cache_with_clock();
        let other = cache.clone();
        other.insert("shared", serde_json::json!(true));
        assert_eq!(cache.get("shared"), Some(serde_json::json!(true)));
    }
}
