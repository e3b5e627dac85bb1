pub mod cache;
pub mod deduplication;
mod error;
pub mod fingerprint;
mod models;
pub mod optimizer;
mod provider;
mod search_options;
pub mod storage;


use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

pub use cache::{
    CacheConfig, CacheEntry, CacheStats, Lookup, LookupSource, PlacesCache, SharedPlacesCache,
    CACHE_NAMESPACE,
};
pub use deduplication::{
    DedupOutcome, DeduplicationConfig, DeduplicationStats, RequestDeduplicator,
};
pub use error::{Error, ErrorKind};
pub use fingerprint::fingerprint;
pub use models::{DistanceResult, GeocodeResult, Place, PlaceDetails};
pub use optimizer::{
    OperationKind, OptimizationConfig, OptimizationConfigUpdate, OptimizationReport, SampleKind,
    SharedUsageOptimizer, UsageMetrics, UsageOptimizer,
};
pub use provider::{HttpPlacesProvider, PlacesProvider};
pub use search_options::{
    DistanceOptions, GeocodeOptions, NearbySearchOptions, PlaceCategory, PlaceDetailsOptions,
};
pub use storage::{JsonFileStore, KeyValueStore, MemoryKeyValueStore};

/// Client for the mapping provider, with two-tier caching, in-flight request
/// sharing, and adaptive cost control in front of every call.
pub struct PlacesClient {
    provider: Arc<dyn PlacesProvider>,
    cache: Option<SharedPlacesCache>,
    optimizer: SharedUsageOptimizer,
}

impl PlacesClient {
    /// Client without caching. Every call reaches the provider; usage is
    /// still metered.
    pub async fn new(provider: Arc<dyn PlacesProvider>) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        Self {
            provider,
            cache: None,
            optimizer: Arc::new(UsageOptimizer::load(store).await),
        }
    }

    /// Client with caching over an in-process store.
    pub async fn with_cache(provider: Arc<dyn PlacesProvider>, cache_config: CacheConfig) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        Self::with_cache_and_store(provider, cache_config, DeduplicationConfig::default(), store)
            .await
    }

    /// Client with caching over a caller-supplied durable store. Optimizer
    /// metrics and configuration are restored from the same store.
    pub async fn with_cache_and_store(
        provider: Arc<dyn PlacesProvider>,
        cache_config: CacheConfig,
        dedup_config: DeduplicationConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let cache = Arc::new(PlacesCache::with_deduplication(
            cache_config,
            dedup_config,
            store.clone(),
        ));
        log::info!(
            "initialized places client with caching (ttl: {} min, max entries: {})",
            cache.config.ttl.num_minutes(),
            cache.config.max_entries
        );

        Self {
            provider,
            cache: Some(cache),
            optimizer: Arc::new(UsageOptimizer::load(store).await),
        }
    }

    /// Geocodes an address, cached.
    pub async fn geocode(&self, options: &GeocodeOptions) -> Result<GeocodeResult, Error> {
        let operation = OperationKind::Geocode;
        let key = fingerprint(&operation.to_string(), &options.cache_params());
        let provider = self.provider.clone();
        let options = options.clone();

        self.run_cached(operation, key, move || async move {
            provider.geocode(&options).await
        })
        .await
    }

    /// Searches for places around a coordinate, cached. The full provider
    /// result is cached; the returned list is capped by the optimizer's
    /// current recommendation.
    pub async fn search_nearby(&self, options: &NearbySearchOptions) -> Result<Vec<Place>, Error> {
        let operation = OperationKind::NearbySearch;
        let key = fingerprint(&operation.to_string(), &options.cache_params());
        let provider = self.provider.clone();
        let options = *options;

        let mut places: Vec<Place> = self
            .run_cached(operation, key, move || async move {
                provider.search_nearby(&options).await
            })
            .await?;

        let cap = self.optimizer.optimal_max_results();
        if places.len() > cap {
            log::debug!("capping {} places to {}", places.len(), cap);
            places.truncate(cap);
        }
        Ok(places)
    }

    /// Fetches one place's details, cached.
    pub async fn place_details(&self, options: &PlaceDetailsOptions) -> Result<PlaceDetails, Error> {
        let operation = OperationKind::PlaceDetails;
        let key = fingerprint(&operation.to_string(), &options.cache_params());
        let provider = self.provider.clone();
        let options = options.clone();

        self.run_cached(operation, key, move || async move {
            provider.place_details(&options).await
        })
        .await
    }

    /// Computes travel distance between two coordinates, cached.
    pub async fn distance(&self, options: &DistanceOptions) -> Result<DistanceResult, Error> {
        let operation = OperationKind::Distance;
        let key = fingerprint(&operation.to_string(), &options.cache_params());
        let provider = self.provider.clone();
        let options = *options;

        self.run_cached(operation, key, move || async move {
            provider.distance(&options).await
        })
        .await
    }

    /// Get cache statistics if caching is enabled.
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    /// Statistics about in-flight request sharing, if caching is enabled.
    pub fn deduplication_stats(&self) -> Option<DeduplicationStats> {
        self.cache.as_ref().map(|cache| cache.deduplication_stats())
    }

    /// Removes one fingerprint from both cache tiers.
    pub async fn invalidate(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(key).await;
        }
    }

    /// Clears everything the cache owns, in both tiers.
    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear_all().await;
        }
    }

    /// Evicts expired cache entries immediately.
    pub async fn evict_expired_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.sweep_expired().await;
        }
    }

    /// Starts the recurring expiry sweep if caching is enabled.
    pub fn start_sweeper(&self) {
        if let Some(cache) = &self.cache {
            cache.start_sweeper();
        }
    }

    /// Stops the recurring expiry sweep.
    pub fn stop_sweeper(&self) {
        if let Some(cache) = &self.cache {
            cache.stop_sweeper();
        }
    }

    /// The usage optimizer, for metrics, reports, and configuration.
    pub fn optimizer(&self) -> &SharedUsageOptimizer {
        &self.optimizer
    }

    async fn run_cached<T, F, Fut>(
        &self,
        operation: OperationKind,
        key: String,
        compute: F,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let started = Instant::now();

        let (value, sample) = match &self.cache {
            Some(cache) => {
                let ttl = Duration::minutes(self.optimizer.optimal_cache_timeout() as i64);
                let lookup = cache.get_or_compute(&key, ttl, compute).await?;
                let sample = if lookup.source.served_from_cache() {
                    log::info!("returning cached {} result", operation);
                    SampleKind::Cache
                } else {
                    SampleKind::External
                };
                (lookup.value, sample)
            }
            None => (compute().await?, SampleKind::External),
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.optimizer
            .record_sample(sample, latency_ms, operation)
            .await;

        Ok(value)
    }
}
