use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::deduplication::{DeduplicationConfig, RequestDeduplicator};
use crate::error::Error;
use crate::storage::KeyValueStore;

/// Namespace prefix for durable keys owned by the cache. `clear_all` and the
/// sweeper only ever touch keys carrying it.
pub const CACHE_NAMESPACE: &str = "placecache:";

/// TTL ceiling for entries backfilled from the durable tier into memory.
const BACKFILL_TTL_MINUTES: i64 = 30;

/// Configuration for the cache system.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long entries stay live unless a call overrides the TTL.
    pub ttl: Duration,
    /// Maximum number of entries in the volatile tier. The durable tier is
    /// unbounded in count; its entries still expire by TTL.
    pub max_entries: usize,
    /// Whether caching is enabled.
    pub enabled: bool,
    /// How often the background sweeper evicts expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(60),
            max_entries: 100,
            enabled: true,
            sweep_interval: Duration::minutes(10),
        }
    }
}

/// A cached payload with its expiry window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(data: Value, ttl: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            data,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_live(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Where a looked-up value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupSource {
    /// Live entry in the volatile tier.
    Memory,
    /// Live entry in the durable tier (now backfilled into memory).
    Durable,
    /// Attached to another caller's in-flight computation.
    Shared,
    /// Computed fresh by this caller.
    Computed,
}

impl LookupSource {
    /// True unless this caller itself triggered the external computation.
    pub fn served_from_cache(&self) -> bool {
        !matches!(self, LookupSource::Computed)
    }
}

/// A value plus the tier (or computation) that produced it.
#[derive(Clone, Debug)]
pub struct Lookup<T> {
    pub value: T,
    pub source: LookupSource,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "graphql", derive(async_graphql::SimpleObject))]
pub struct CacheStats {
    pub memory_entries: usize,
    pub durable_entries: usize,
    pub total_entries: usize,
}

/// Two-tier read-through/write-through cache.
///
/// Lookups try the volatile tier, then the durable tier (backfilling memory
/// on a hit), and only then compute — with concurrent identical computations
/// collapsed into one by the deduplicator. Expired entries are never
/// returned: a stale read deletes the entry and proceeds as a miss.
pub struct PlacesCache {
    memory: DashMap<String, CacheEntry>,
    store: Arc<dyn KeyValueStore>,
    deduplicator: RequestDeduplicator,
    pub config: CacheConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl PlacesCache {
    pub fn new(config: CacheConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_deduplication(config, DeduplicationConfig::default(), store)
    }

    pub fn with_deduplication(
        config: CacheConfig,
        dedup_config: DeduplicationConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            memory: DashMap::new(),
            store,
            deduplicator: RequestDeduplicator::new(dedup_config),
            config,
            sweeper: Mutex::new(None),
        }
    }

    fn durable_key(&self, key: &str) -> String {
        format!("{}{}", CACHE_NAMESPACE, key)
    }

    /// Returns the cached value for `key`, or computes, stores, and returns
    /// it. Concurrent callers for the same key share a single computation.
    /// Failures propagate to every sharer and cache nothing.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Lookup<T>, Error>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        if !self.config.enabled {
            let value = compute().await?;
            return Ok(Lookup {
                value,
                source: LookupSource::Computed,
            });
        }

        if let Some(data) = self.get_memory(key) {
            return Ok(Lookup {
                value: decode(data)?,
                source: LookupSource::Memory,
            });
        }

        if let Some(entry) = self.get_durable(key).await {
            // Backfill memory with the shorter of the backfill ceiling and
            // the record's own TTL.
            let record_ttl = entry.expires_at - entry.created_at;
            let backfill_ttl = std::cmp::min(Duration::minutes(BACKFILL_TTL_MINUTES), record_ttl);
            self.set_memory(key, entry.data.clone(), backfill_ttl);
            log::debug!("durable cache hit for key: {}", key);
            return Ok(Lookup {
                value: decode(entry.data)?,
                source: LookupSource::Durable,
            });
        }

        log::debug!("cache miss for key: {}", key);
        let outcome = self
            .deduplicator
            .share_or_start(key, move || async move {
                let value = compute().await?;
                serde_json::to_value(&value).map_err(|e| Error::decode(e.to_string()))
            })
            .await?;

        let source = if outcome.leader {
            self.set_memory(key, outcome.value.clone(), ttl);
            self.set_durable(key, outcome.value.clone(), ttl).await;
            LookupSource::Computed
        } else {
            LookupSource::Shared
        };

        Ok(Lookup {
            value: decode(outcome.value)?,
            source,
        })
    }

    /// Inserts into the volatile tier, evicting the single oldest entry when
    /// the insert would push the tier past capacity.
    pub fn set_memory(&self, key: &str, data: Value, ttl: Duration) {
        if !self.config.enabled {
            return;
        }
        self.insert_memory_entry(key, CacheEntry::new(data, ttl));
    }

    /// Inserts into the durable tier. A failed write degrades to a volatile
    /// write and is never raised to the caller.
    pub async fn set_durable(&self, key: &str, data: Value, ttl: Duration) {
        if !self.config.enabled {
            return;
        }

        let entry = CacheEntry::new(data, ttl);
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("could not serialize entry for {}, keeping volatile copy: {}", key, e);
                self.insert_memory_entry(key, entry);
                return;
            }
        };

        if let Err(e) = self.store.set(&self.durable_key(key), &raw).await {
            log::warn!("durable write failed for {}, keeping volatile copy: {}", key, e);
            self.insert_memory_entry(key, entry);
        }
    }

    /// Removes `key` from both tiers. A no-op for absent keys.
    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        if let Err(e) = self.store.remove(&self.durable_key(key)).await {
            log::warn!("could not remove durable entry for {}: {}", key, e);
        }
    }

    /// Removes every entry this cache owns, in both tiers. Durable keys
    /// outside the cache namespace are untouched.
    pub async fn clear_all(&self) {
        self.memory.clear();

        match self.store.keys().await {
            Ok(keys) => {
                for key in keys.into_iter().filter(|k| k.starts_with(CACHE_NAMESPACE)) {
                    if let Err(e) = self.store.remove(&key).await {
                        log::warn!("could not remove durable entry {}: {}", key, e);
                    }
                }
            }
            Err(e) => log::warn!("could not list durable keys while clearing: {}", e),
        }

        log::info!("cache cleared");
    }

    /// Evicts expired entries from both tiers, and durable entries that no
    /// longer deserialize. Maintenance only; reads never wait for this.
    pub async fn sweep_expired(&self) -> usize {
        let mut evicted = 0;

        let expired: Vec<String> = self
            .memory
            .iter()
            .filter(|entry| !entry.value().is_live())
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            if self.memory.remove(&key).is_some() {
                evicted += 1;
            }
        }

        match self.store.keys().await {
            Ok(keys) => {
                for key in keys.into_iter().filter(|k| k.starts_with(CACHE_NAMESPACE)) {
                    let remove = match self.store.get(&key).await {
                        Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                            Ok(entry) => !entry.is_live(),
                            Err(_) => {
                                log::debug!("removing corrupt durable entry: {}", key);
                                true
                            }
                        },
                        Ok(None) => false,
                        Err(e) => {
                            log::warn!("could not read durable entry {} during sweep: {}", key, e);
                            false
                        }
                    };

                    if remove && self.store.remove(&key).await.is_ok() {
                        evicted += 1;
                    }
                }
            }
            Err(e) => log::warn!("could not list durable keys during sweep: {}", e),
        }

        log::debug!("sweep evicted {} cache entries", evicted);
        evicted
    }

    /// Spawns the recurring sweep task. Idempotent; the task holds only a
    /// weak reference, so dropping the cache ends it as well.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.lock_sweeper();
        if sweeper.is_some() {
            return;
        }

        let period = self
            .config
            .sweep_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(600));
        let cache = Arc::downgrade(self);

        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired().await;
                    }
                    None => break,
                }
            }
        }));

        log::info!("cache sweeper started (every {:?})", period);
    }

    /// Stops the recurring sweep task if one is running.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.lock_sweeper().take() {
            handle.abort();
            log::info!("cache sweeper stopped");
        }
    }

    /// Cache statistics across both tiers.
    pub async fn stats(&self) -> CacheStats {
        let memory_entries = self.memory.len();
        let durable_entries = match self.store.keys().await {
            Ok(keys) => keys.iter().filter(|k| k.starts_with(CACHE_NAMESPACE)).count(),
            Err(e) => {
                log::warn!("could not count durable entries: {}", e);
                0
            }
        };

        CacheStats {
            memory_entries,
            durable_entries,
            total_entries: memory_entries + durable_entries,
        }
    }

    /// Statistics about in-flight request sharing.
    pub fn deduplication_stats(&self) -> crate::deduplication::DeduplicationStats {
        self.deduplicator.stats()
    }

    fn get_memory(&self, key: &str) -> Option<Value> {
        let expired = match self.memory.get(key) {
            Some(entry) => {
                if entry.is_live() {
                    log::debug!("memory cache hit for key: {}", key);
                    return Some(entry.data.clone());
                }
                true
            }
            None => false,
        };

        // The read guard is released above; a stale read evicts before
        // reporting the miss.
        if expired {
            log::debug!("memory cache expired for key: {}", key);
            self.memory.remove(key);
        }
        None
    }

    async fn get_durable(&self, key: &str) -> Option<CacheEntry> {
        let durable_key = self.durable_key(key);

        let raw = match self.store.get(&durable_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("durable read failed for {}: {}", key, e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                // Treated as a miss; the sweeper removes it.
                log::debug!("corrupt durable entry for {}: {}", key, e);
                return None;
            }
        };

        if !entry.is_live() {
            log::debug!("durable cache expired for key: {}", key);
            if let Err(e) = self.store.remove(&durable_key).await {
                log::warn!("could not remove expired durable entry {}: {}", key, e);
            }
            return None;
        }

        Some(entry)
    }

    fn insert_memory_entry(&self, key: &str, entry: CacheEntry) {
        if !self.memory.contains_key(key) && self.memory.len() >= self.config.max_entries {
            self.evict_oldest_memory();
        }
        self.memory.insert(key.to_string(), entry);
        log::debug!("stored in memory cache: {}", key);
    }

    fn evict_oldest_memory(&self) {
        let oldest = self
            .memory
            .iter()
            .min_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.memory.remove(&key);
            log::debug!("evicted oldest memory entry: {}", key);
        }
    }

    fn lock_sweeper(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.sweeper.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PlacesCache {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_sweeper().take() {
            handle.abort();
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| Error::decode(e.to_string()))
}

/// Thread-safe handle to the cache.
pub type SharedPlacesCache = Arc<PlacesCache>;
