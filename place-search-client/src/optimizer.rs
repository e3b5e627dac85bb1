use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use strum_macros::{Display, EnumString};

use crate::storage::KeyValueStore;

/// Durable keys for persisted optimizer state. Outside the cache namespace,
/// so `clear_all` on the cache never wipes usage history.
const METRICS_KEY: &str = "placeopt:metrics";
const CONFIG_KEY: &str = "placeopt:config";

/// Rolling latency window size, FIFO.
const LATENCY_WINDOW: usize = 100;

/// Assumed per-request cost with no caching at all, for the savings estimate.
const BASELINE_UNIT_COST: f64 = 1.5;

// Conservation-mode entry thresholds.
const CONSERVATION_EXTERNAL_CALLS: u64 = 50;
const CONSERVATION_COST: f64 = 10.0;
const CONSERVATION_HIT_RATE: f64 = 30.0;
const CONSERVATION_MAX_RESULTS: usize = 10;

/// What a recorded sample measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SampleKind {
    /// Served from a cache tier or a shared in-flight computation.
    Cache,
    /// Served by a fresh call to the mapping provider.
    External,
}

/// The billable operation classes of the mapping provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Geocode,
    NearbySearch,
    PlaceDetails,
    Distance,
}

impl OperationKind {
    /// Cost units charged per external call of this class.
    pub fn unit_cost(&self) -> f64 {
        match self {
            OperationKind::Geocode => 1.0,
            OperationKind::NearbySearch => 2.0,
            OperationKind::PlaceDetails => 1.5,
            OperationKind::Distance => 1.0,
        }
    }
}

/// Usage counters observed since the last reset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "graphql", derive(async_graphql::SimpleObject))]
pub struct UsageMetrics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub external_calls: u64,
    pub cost_estimate: f64,
    pub rolling_average_latency_ms: f64,
}

/// Tunables the optimizer works against.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "graphql", derive(async_graphql::SimpleObject))]
pub struct OptimizationConfig {
    pub debounce_ms: u64,
    pub max_results: usize,
    pub cache_timeout_minutes: u32,
    pub aggression_enabled: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            max_results: 20,
            cache_timeout_minutes: 60,
            aggression_enabled: false,
        }
    }
}

/// Partial update merged into the current configuration.
#[derive(Clone, Debug, Default)]
pub struct OptimizationConfigUpdate {
    pub debounce_ms: Option<u64>,
    pub max_results: Option<usize>,
    pub cache_timeout_minutes: Option<u32>,
    pub aggression_enabled: Option<bool>,
}

/// Human-readable usage report.
#[derive(Clone, Debug, Serialize)]
#[cfg_attr(feature = "graphql", derive(async_graphql::SimpleObject))]
pub struct OptimizationReport {
    pub summary: String,
    pub recommendations: Vec<String>,
    pub metrics: UsageMetrics,
    pub cache_hit_rate: f64,
    pub estimated_savings: f64,
}

#[derive(Serialize, Deserialize, Default)]
struct MetricsSnapshot {
    metrics: UsageMetrics,
    latency_window: VecDeque<f64>,
}

struct OptimizerState {
    metrics: UsageMetrics,
    latency_window: VecDeque<f64>,
    config: OptimizationConfig,
}

/// Feedback loop over observed cache and provider behavior.
///
/// Conservation mode is derived fresh from current metrics on every query —
/// there is no latched state, so the answer can flip between consecutive
/// requests as counters move across the thresholds.
pub struct UsageOptimizer {
    state: RwLock<OptimizerState>,
    store: Arc<dyn KeyValueStore>,
}

impl UsageOptimizer {
    /// Builds the optimizer, restoring persisted metrics and configuration.
    /// Absent or corrupt snapshots fall back to defaults.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let snapshot = Self::load_json::<MetricsSnapshot>(&store, METRICS_KEY)
            .await
            .unwrap_or_default();
        let config = Self::load_json::<OptimizationConfig>(&store, CONFIG_KEY)
            .await
            .unwrap_or_default();

        Self {
            state: RwLock::new(OptimizerState {
                metrics: snapshot.metrics,
                latency_window: snapshot.latency_window,
                config,
            }),
            store,
        }
    }

    async fn load_json<T: serde::de::DeserializeOwned>(
        store: &Arc<dyn KeyValueStore>,
        key: &str,
    ) -> Option<T> {
        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("could not load {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("discarding corrupt snapshot under {}: {}", key, e);
                None
            }
        }
    }

    /// Records one served request. External samples also accrue the
    /// operation's unit cost. The updated snapshot is persisted best-effort.
    pub async fn record_sample(&self, kind: SampleKind, latency_ms: f64, operation: OperationKind) {
        let snapshot = {
            let mut state = self.write_state();

            state.metrics.total_requests += 1;
            match kind {
                SampleKind::Cache => state.metrics.cache_hits += 1,
                SampleKind::External => {
                    state.metrics.external_calls += 1;
                    state.metrics.cost_estimate += operation.unit_cost();
                }
            }

            state.latency_window.push_back(latency_ms);
            while state.latency_window.len() > LATENCY_WINDOW {
                state.latency_window.pop_front();
            }
            state.metrics.rolling_average_latency_ms =
                state.latency_window.iter().sum::<f64>() / state.latency_window.len() as f64;

            log::debug!(
                "recorded {} sample for {} ({:.0} ms)",
                kind,
                operation,
                latency_ms
            );

            MetricsSnapshot {
                metrics: state.metrics.clone(),
                latency_window: state.latency_window.clone(),
            }
        };

        self.persist(METRICS_KEY, &snapshot).await;
    }

    /// Whether usage is heavy enough to run in conservation mode right now.
    pub fn should_use_aggressive_mode(&self) -> bool {
        let state = self.read_state();
        if !state.config.aggression_enabled {
            return false;
        }

        state.metrics.external_calls > CONSERVATION_EXTERNAL_CALLS
            || state.metrics.cost_estimate > CONSERVATION_COST
            || hit_rate(&state.metrics) < CONSERVATION_HIT_RATE
    }

    /// Result-set cap downstream callers should apply.
    pub fn optimal_max_results(&self) -> usize {
        let configured = self.read_state().config.max_results;
        if self.should_use_aggressive_mode() {
            CONSERVATION_MAX_RESULTS.min(configured)
        } else {
            configured
        }
    }

    /// Cache TTL (minutes) downstream callers should use.
    pub fn optimal_cache_timeout(&self) -> u32 {
        let configured = self.read_state().config.cache_timeout_minutes;
        if self.should_use_aggressive_mode() {
            configured * 2
        } else {
            configured
        }
    }

    /// Share of requests served without an external call, as a percentage.
    pub fn cache_hit_rate(&self) -> f64 {
        hit_rate(&self.read_state().metrics)
    }

    /// Cost units avoided relative to an uncached baseline.
    pub fn estimated_savings(&self) -> f64 {
        let metrics = &self.read_state().metrics;
        let uncached = metrics.total_requests as f64 * BASELINE_UNIT_COST;
        (uncached - metrics.cost_estimate).max(0.0)
    }

    /// Snapshot of the current counters.
    pub fn metrics(&self) -> UsageMetrics {
        self.read_state().metrics.clone()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> OptimizationConfig {
        self.read_state().config.clone()
    }

    /// Merges a partial update into the configuration and persists it.
    pub async fn set_config(&self, update: OptimizationConfigUpdate) {
        let config = {
            let mut state = self.write_state();
            if let Some(debounce_ms) = update.debounce_ms {
                state.config.debounce_ms = debounce_ms;
            }
            if let Some(max_results) = update.max_results {
                state.config.max_results = max_results;
            }
            if let Some(cache_timeout_minutes) = update.cache_timeout_minutes {
                state.config.cache_timeout_minutes = cache_timeout_minutes;
            }
            if let Some(aggression_enabled) = update.aggression_enabled {
                state.config.aggression_enabled = aggression_enabled;
            }
            state.config.clone()
        };

        self.persist(CONFIG_KEY, &config).await;
    }

    /// Zeroes every counter and the latency window, and persists the zeroed
    /// state.
    pub async fn reset(&self) {
        let snapshot = {
            let mut state = self.write_state();
            state.metrics = UsageMetrics::default();
            state.latency_window.clear();
            MetricsSnapshot::default()
        };

        self.persist(METRICS_KEY, &snapshot).await;
        log::info!("usage metrics reset");
    }

    /// Usage summary with fixed-threshold recommendations.
    pub fn build_report(&self) -> OptimizationReport {
        let metrics = self.metrics();
        let cache_hit_rate = hit_rate(&metrics);
        let estimated_savings = self.estimated_savings();

        let mut recommendations = Vec::new();
        if metrics.total_requests > 0 && cache_hit_rate < 40.0 {
            recommendations
                .push("Cache hit rate is below 40%; consider raising cache TTLs".to_string());
        }
        if metrics.cost_estimate > 20.0 {
            recommendations.push(
                "Estimated cost exceeds 20 units; consider enabling aggressive conservation"
                    .to_string(),
            );
        }
        if metrics.rolling_average_latency_ms > 2000.0 {
            recommendations
                .push("Average latency exceeds 2s; consider lowering max results".to_string());
        }
        if metrics.external_calls > 100 {
            recommendations
                .push("More than 100 external calls; consider caching more aggressively".to_string());
        }

        let summary = format!(
            "{} requests, {:.1}% served from cache, {:.2} cost units spent, ~{:.2} saved",
            metrics.total_requests, cache_hit_rate, metrics.cost_estimate, estimated_savings
        );

        OptimizationReport {
            summary,
            recommendations,
            metrics,
            cache_hit_rate,
            estimated_savings,
        }
    }

    async fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("could not serialize {}: {}", key, e);
                return;
            }
        };

        // Best-effort: in-memory state stays authoritative either way.
        if let Err(e) = self.store.set(key, &raw).await {
            log::warn!("could not persist {}: {}", key, e);
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, OptimizerState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, OptimizerState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn hit_rate(metrics: &UsageMetrics) -> f64 {
    if metrics.total_requests == 0 {
        return 0.0;
    }
    metrics.cache_hits as f64 / metrics.total_requests as f64 * 100.0
}

/// Thread-safe handle to the optimizer.
pub type SharedUsageOptimizer = Arc<UsageOptimizer>;
