// Result Cache
// Content-addressed probe results with per-kind TTL and a durable-or-local store

mod fingerprint;
mod memory;
mod sweeper;
mod ttl;

pub use fingerprint::{cache_key, fingerprint, kind_of_key, KEY_NAMESPACE};
pub use memory::MemoryStore;
pub use sweeper::CacheSweeper;
pub use ttl::{CacheConfig, TtlPolicy, DEFAULT_TTL_SECS};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::{CacheEntry, Payload, ProbeParams};
use crate::port::{CacheBackend, SystemTimeProvider, TimeProvider};

/// Backend name reported for the process-local store
pub const MEMORY_BACKEND: &str = "memory";

enum Store {
    Durable(Arc<dyn CacheBackend>),
    Local(MemoryStore),
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub backend: String,
    pub total_entries: usize,
    pub valid_entries: usize,
    pub by_kind: BTreeMap<String, usize>,
}

/// Result cache shared by every concurrently running probe.
///
/// Backend selection happens once at construction. A durable backend that
/// fails its ping is replaced by the local store for the cache's lifetime.
/// Runtime backend errors are logged and reported as misses.
pub struct ResultCache {
    store: Store,
    ttl: TtlPolicy,
    clock: Arc<dyn TimeProvider>,
    degraded_reason: Option<String>,
}

impl ResultCache {
    /// Process-local cache
    pub fn in_memory(ttl: TtlPolicy) -> Self {
        Self {
            store: Store::Local(MemoryStore::new()),
            ttl,
            clock: Arc::new(SystemTimeProvider),
            degraded_reason: None,
        }
    }

    /// Durable cache, downgraded to local if the backend does not answer
    pub async fn connect(backend: Arc<dyn CacheBackend>, ttl: TtlPolicy) -> Self {
        match backend.ping().await {
            Ok(()) => {
                info!(backend = backend.name(), "Result cache using durable backend");
                Self {
                    store: Store::Durable(backend),
                    ttl,
                    clock: Arc::new(SystemTimeProvider),
                    degraded_reason: None,
                }
            }
            Err(e) => {
                warn!(
                    backend = backend.name(),
                    error = %e,
                    "Durable cache unreachable, falling back to in-memory cache"
                );
                let mut cache = Self::in_memory(ttl);
                cache.degraded_reason = Some(e.to_string());
                cache
            }
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend_kind(&self) -> &str {
        match &self.store {
            Store::Durable(backend) => backend.name(),
            Store::Local(_) => MEMORY_BACKEND,
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.store, Store::Durable(_))
    }

    /// Why the durable backend was abandoned at construction, if it was
    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded_reason.as_deref()
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Cached payload, if a live entry exists
    pub async fn get(&self, probe_kind: &str, target: &str, params: &ProbeParams) -> Option<Payload> {
        self.lookup(probe_kind, target, params)
            .await
            .map(|entry| entry.payload)
    }

    /// Full cache entry, including its creation time
    pub async fn lookup(
        &self,
        probe_kind: &str,
        target: &str,
        params: &ProbeParams,
    ) -> Option<CacheEntry> {
        let key = cache_key(probe_kind, target, params);
        let now = self.clock.now_millis();

        let entry = match &self.store {
            Store::Local(store) => store.get(&key, now),
            Store::Durable(backend) => match backend.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                    Ok(entry) if !entry.is_expired(now) => Some(entry),
                    Ok(_) => {
                        drop_entry(backend.as_ref(), &key).await;
                        None
                    }
                    Err(e) => {
                        error!(key = %key, error = %e, "Corrupt cache entry, dropping");
                        drop_entry(backend.as_ref(), &key).await;
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    error!(key = %key, error = %e, "Cache read failed");
                    None
                }
            },
        };

        match &entry {
            Some(_) => debug!(probe_kind, target, "Cache hit"),
            None => debug!(probe_kind, target, "Cache miss"),
        }
        entry
    }

    /// Store a successful payload; returns false if the write was lost
    pub async fn set(
        &self,
        probe_kind: &str,
        target: &str,
        params: &ProbeParams,
        payload: &Payload,
        scan_class: Option<&str>,
        ttl: Option<Duration>,
    ) -> bool {
        let ttl = self.ttl.resolve(probe_kind, scan_class, ttl);
        let key = cache_key(probe_kind, target, params);
        let now = self.clock.now_millis();
        let entry = CacheEntry {
            fingerprint: fingerprint(probe_kind, target, params),
            payload: payload.clone(),
            created_at: now,
            expires_at: now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
            probe_kind: probe_kind.to_string(),
            target: target.to_string(),
        };

        match &self.store {
            Store::Local(store) => store.insert(key, entry),
            Store::Durable(backend) => {
                let raw = match serde_json::to_string(&entry) {
                    Ok(raw) => raw,
                    Err(e) => {
                        error!(key = %key, error = %e, "Cache entry serialization failed");
                        return false;
                    }
                };
                // Durable expiry has second granularity
                let ttl_secs = ttl.as_secs().max(1);
                if let Err(e) = backend.set_with_expiry(&key, &raw, ttl_secs).await {
                    error!(key = %key, error = %e, "Cache write failed");
                    return false;
                }
            }
        }

        debug!(probe_kind, target, ttl_secs = ttl.as_secs(), "Cached result");
        true
    }

    pub async fn invalidate(&self, probe_kind: &str, target: &str, params: &ProbeParams) -> bool {
        let key = cache_key(probe_kind, target, params);
        match &self.store {
            Store::Local(store) => store.remove(&key),
            Store::Durable(backend) => backend.delete(&key).await.unwrap_or_else(|e| {
                error!(key = %key, error = %e, "Cache invalidate failed");
                false
            }),
        }
    }

    /// Glob pattern matching every entry of one probe kind
    pub fn kind_pattern(probe_kind: &str) -> String {
        format!("{}{}:*", KEY_NAMESPACE, glob::Pattern::escape(probe_kind))
    }

    /// Clear namespaced entries, optionally only those matching a glob.
    ///
    /// Patterns without the namespace prefix are matched inside it.
    pub async fn clear(&self, pattern: Option<&str>) -> usize {
        let matcher = match pattern {
            None => None,
            Some(p) => {
                let full = if p.starts_with(KEY_NAMESPACE) {
                    p.to_string()
                } else {
                    format!("{}{}", KEY_NAMESPACE, p)
                };
                match glob::Pattern::new(&full) {
                    Ok(compiled) => Some(compiled),
                    Err(e) => {
                        error!(pattern = p, error = %e, "Invalid cache clear pattern");
                        return 0;
                    }
                }
            }
        };
        let selected = |key: &str| {
            key.starts_with(KEY_NAMESPACE) && matcher.as_ref().map_or(true, |m| m.matches(key))
        };

        let cleared = match &self.store {
            Store::Local(store) => store.remove_matching(selected),
            Store::Durable(backend) => {
                let keys = match backend.keys_with_prefix(KEY_NAMESPACE).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        error!(error = %e, "Cache key listing failed");
                        return 0;
                    }
                };
                let doomed: Vec<String> = keys.into_iter().filter(|k| selected(k)).collect();
                if doomed.is_empty() {
                    0
                } else {
                    match backend.delete_many(&doomed).await {
                        Ok(n) => n as usize,
                        Err(e) => {
                            error!(error = %e, "Cache clear failed");
                            0
                        }
                    }
                }
            }
        };

        info!(cleared, pattern = pattern.unwrap_or("*"), "Cache cleared");
        cleared
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.clock.now_millis();
        let mut stats = CacheStats {
            backend: self.backend_kind().to_string(),
            total_entries: 0,
            valid_entries: 0,
            by_kind: BTreeMap::new(),
        };

        let keys: Vec<(String, bool)> = match &self.store {
            Store::Local(store) => store.snapshot(now),
            Store::Durable(backend) => match backend.keys_with_prefix(KEY_NAMESPACE).await {
                Ok(keys) => keys.into_iter().map(|k| (k, false)).collect(),
                Err(e) => {
                    error!(error = %e, "Cache key listing failed");
                    Vec::new()
                }
            },
        };

        for (key, expired) in keys {
            stats.total_entries += 1;
            if expired {
                continue;
            }
            stats.valid_entries += 1;
            if let Some(kind) = kind_of_key(&key) {
                *stats.by_kind.entry(kind.to_string()).or_insert(0) += 1;
            }
        }
        stats
    }

    /// Sweep expired entries; returns how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let removed = match &self.store {
            Store::Local(store) => store.purge_expired(self.clock.now_millis()),
            Store::Durable(backend) => match backend.purge_expired().await {
                Ok(n) => n as usize,
                Err(e) => {
                    error!(error = %e, "Cache purge failed");
                    0
                }
            },
        };
        if removed > 0 {
            info!(removed, "Expired cache entries removed");
        }
        removed
    }
}

async fn drop_entry(backend: &dyn CacheBackend, key: &str) {
    if let Err(e) = backend.delete(key).await {
        error!(key = %key, error = %e, "Cache entry removal failed");
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("backend", &self.backend_kind())
            .field("degraded_reason", &self.degraded_reason)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::cache_backend::mocks::UnreachableBackend;
    use crate::port::cache_backend::CacheError;
    use crate::port::time_provider::mocks::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed raw values and refuses every delete
    #[derive(Default)]
    struct StuckBackend {
        values: HashMap<String, String>,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl CacheBackend for StuckBackend {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            Ok(self.values.get(key).cloned())
        }

        async fn set_with_expiry(&self, _: &str, _: &str, _: u64) -> Result<(), CacheError> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Backend("database is locked".to_string()))
        }

        async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, CacheError> {
            Ok(self.values.keys().cloned().collect())
        }

        async fn delete_many(&self, _keys: &[String]) -> Result<u64, CacheError> {
            Ok(0)
        }
    }

    fn payload(n: i64) -> Payload {
        let mut p = Payload::new();
        p.insert("open_ports".into(), json!(n));
        p
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> ProbeParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn cache_with_clock() -> (ResultCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = ResultCache::in_memory(TtlPolicy::builtin()).with_clock(clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_round_trip_then_expiry() {
        let (cache, clock) = cache_with_clock();
        let p = ProbeParams::new();

        assert!(cache.set("httpx", "example.com", &p, &payload(3), None, None).await);
        assert_eq!(cache.get("httpx", "example.com", &p).await, Some(payload(3)));

        // httpx lives 30 minutes
        clock.advance(Duration::from_secs(30 * 60));
        assert_eq!(cache.get("httpx", "example.com", &p).await, None);
        assert_eq!(cache.stats().await.total_entries, 0, "expired read purges");
    }

    #[test]
    fn test_clear_without_namespace_prefix() {
        let (cache, _) = cache_with_clock();
        let p = ProbeParams::new();

        tokio_test::block_on(async {
            cache.set("nmap", "a", &p, &payload(1), None, None).await;
            cache.set("nmap", "b", &p, &payload(2), None, None).await;
            cache.set("httpx", "a", &p, &payload(3), None, None).await;

            assert_eq!(cache.clear(Some("nmap:*")).await, 2);
            assert_eq!(cache.stats().await.by_kind.get("httpx"), Some(&1));
        });
    }

    #[tokio::test]
    async fn test_param_order_hits_same_entry() {
        let (cache, _) = cache_with_clock();
        let ab = params(&[("a", json!(1)), ("b", json!(2))]);
        let ba = params(&[("b", json!(2)), ("a", json!(1))]);

        cache.set("nmap", "10.0.0.1", &ab, &payload(1), None, None).await;
        assert_eq!(cache.get("nmap", "10.0.0.1", &ba).await, Some(payload(1)));
    }

    #[tokio::test]
    async fn test_explicit_ttl_override() {
        let (cache, clock) = cache_with_clock();
        let p = ProbeParams::new();

        cache
            .set("nuclei", "t", &p, &payload(1), Some("quick_scan"), Some(Duration::from_secs(5)))
            .await;
        clock.advance(Duration::from_secs(4));
        assert!(cache.get("nuclei", "t", &p).await.is_some());
        clock.advance(Duration::from_secs(1));
        assert!(cache.get("nuclei", "t", &p).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let (cache, _) = cache_with_clock();
        let p = ProbeParams::new();
        cache.set("nmap", "t", &p, &payload(1), None, None).await;

        assert!(cache.invalidate("nmap", "t", &p).await);
        assert!(!cache.invalidate("nmap", "t", &p).await);
        assert!(cache.get("nmap", "t", &p).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_with_kind_pattern() {
        let (cache, _) = cache_with_clock();
        let p = ProbeParams::new();
        cache.set("nmap", "a", &p, &payload(1), None, None).await;
        cache.set("nmap", "b", &p, &payload(2), None, None).await;
        cache.set("httpx", "a", &p, &payload(3), None, None).await;

        let pattern = ResultCache::kind_pattern("nmap");
        assert_eq!(cache.clear(Some(&pattern)).await, 2);
        assert!(cache.get("httpx", "a", &p).await.is_some());

        // relative pattern is matched inside the namespace
        assert_eq!(cache.clear(Some("httpx:*")).await, 1);
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_clear_all_and_invalid_pattern() {
        let (cache, _) = cache_with_clock();
        let p = ProbeParams::new();
        cache.set("nmap", "a", &p, &payload(1), None, None).await;
        cache.set("httpx", "a", &p, &payload(1), None, None).await;

        assert_eq!(cache.clear(Some("[")).await, 0);
        assert_eq!(cache.clear(None).await, 2);
    }

    #[tokio::test]
    async fn test_stats_and_cleanup() {
        let (cache, clock) = cache_with_clock();
        let p = ProbeParams::new();
        cache.set("httpx", "a", &p, &payload(1), None, None).await; // 30m
        cache.set("nmap", "a", &p, &payload(1), None, None).await; // 2h
        cache.set("nmap", "b", &p, &payload(1), None, None).await;

        clock.advance(Duration::from_secs(45 * 60));
        let stats = cache.stats().await;
        assert_eq!(stats.backend, MEMORY_BACKEND);
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.valid_entries, 2);
        assert_eq!(stats.by_kind.get("nmap"), Some(&2));
        assert_eq!(stats.by_kind.get("httpx"), None);

        assert_eq!(cache.cleanup_expired().await, 1);
        assert_eq!(cache.stats().await.total_entries, 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_downgrades() {
        let cache = ResultCache::connect(Arc::new(UnreachableBackend), TtlPolicy::builtin()).await;

        assert!(!cache.is_durable());
        assert_eq!(cache.backend_kind(), MEMORY_BACKEND);
        assert!(cache.degraded_reason().unwrap().contains("connection refused"));

        // Still fully functional in process
        let p = ProbeParams::new();
        assert!(cache.set("nmap", "t", &p, &payload(1), None, None).await);
        assert!(cache.get("nmap", "t", &p).await.is_some());
    }

    #[tokio::test]
    async fn test_failed_removal_of_stale_entries_is_a_miss() {
        let p = ProbeParams::new();
        let stale = CacheEntry {
            fingerprint: fingerprint("nmap", "old", &p),
            payload: payload(1),
            created_at: 0,
            expires_at: 10,
            probe_kind: "nmap".to_string(),
            target: "old".to_string(),
        };
        let mut backend = StuckBackend::default();
        backend
            .values
            .insert(cache_key("nmap", "old", &p), serde_json::to_string(&stale).unwrap());
        backend
            .values
            .insert(cache_key("nmap", "garbled", &p), "{not json".to_string());
        let backend = Arc::new(backend);

        let cache = ResultCache::connect(backend.clone(), TtlPolicy::builtin())
            .await
            .with_clock(Arc::new(ManualClock::new(1_000_000)));
        assert!(cache.is_durable());

        assert!(cache.lookup("nmap", "old", &p).await.is_none());
        assert!(cache.lookup("nmap", "garbled", &p).await.is_none());
        assert_eq!(backend.deletes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_kind_pattern_treats_glob_characters_literally() {
        let (cache, _) = cache_with_clock();
        let p = ProbeParams::new();
        cache.set("scan[1]", "a", &p, &payload(1), None, None).await;
        cache.set("scan1", "a", &p, &payload(2), None, None).await;
        cache.set("web*", "a", &p, &payload(3), None, None).await;
        cache.set("webx", "a", &p, &payload(4), None, None).await;

        assert_eq!(cache.clear(Some(&ResultCache::kind_pattern("scan[1]"))).await, 1);
        assert!(cache.get("scan[1]", "a", &p).await.is_none());
        assert_eq!(cache.get("scan1", "a", &p).await, Some(payload(2)));

        assert_eq!(cache.clear(Some(&ResultCache::kind_pattern("web*"))).await, 1);
        assert_eq!(cache.get("webx", "a", &p).await, Some(payload(4)));
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_wrap_into_the_past() {
        let (cache, clock) = cache_with_clock();
        let p = ProbeParams::new();

        cache
            .set("nmap", "t", &p, &payload(1), None, Some(Duration::from_secs(u64::MAX)))
            .await;
        assert_eq!(cache.get("nmap", "t", &p).await, Some(payload(1)));

        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
        assert_eq!(cache.get("nmap", "t", &p).await, Some(payload(1)));
    }
}
