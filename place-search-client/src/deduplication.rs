use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;

use crate::error::Error;

/// Configuration for request deduplication.
#[derive(Clone, Debug)]
pub struct DeduplicationConfig {
    /// How long a registration may sit unsettled before a later caller is
    /// allowed to start fresh.
    pub grace: Duration,
    /// Whether deduplication is enabled.
    pub enabled: bool,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            grace: Duration::seconds(5),
            enabled: true,
        }
    }
}

type SharedComputation = Shared<BoxFuture<'static, Result<Value, Error>>>;

struct Pending {
    started_at: DateTime<Utc>,
    computation: SharedComputation,
}

/// Result of a deduplicated call.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// The computed (or shared) value.
    pub value: Value,
    /// True for the caller whose invocation actually ran the computation.
    pub leader: bool,
}

/// Deduplicates concurrent identical outbound requests.
///
/// The first caller for a key registers the computation as a shared future;
/// everyone arriving while it is pending awaits a clone of the same future,
/// so all of them observe the same success or the same failure. The
/// check-then-register step happens inside a single map-entry transition, so
/// two concurrent first callers cannot both become leader.
pub struct RequestDeduplicator {
    pending: DashMap<String, Pending>,
    config: DeduplicationConfig,
}

impl RequestDeduplicator {
    pub fn new(config: DeduplicationConfig) -> Self {
        Self {
            pending: DashMap::new(),
            config,
        }
    }

    /// Runs `start` for `key`, or attaches to an already-pending run.
    pub async fn share_or_start<F, Fut>(&self, key: &str, start: F) -> Result<DedupOutcome, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, Error>> + Send + 'static,
    {
        if !self.config.enabled {
            let value = start().await?;
            return Ok(DedupOutcome { value, leader: true });
        }

        self.sweep_stale();

        let started_at = Utc::now();
        let (computation, leader) = match self.pending.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                log::debug!("attaching to in-flight request for key: {}", key);
                (entry.get().computation.clone(), false)
            }
            Entry::Vacant(entry) => {
                log::debug!("starting request for key: {}", key);
                let computation: SharedComputation = start().boxed().shared();
                entry.insert(Pending {
                    started_at,
                    computation: computation.clone(),
                });
                (computation, true)
            }
        };

        let result = computation.await;

        if leader {
            // Remove only our own registration; a grace sweep may already
            // have replaced it with a newer one.
            self.pending
                .remove_if(key, |_, pending| pending.started_at == started_at);
        }

        result.map(|value| DedupOutcome { value, leader })
    }

    /// Drops registrations older than the grace window. Callers already
    /// holding a clone of the shared computation keep it; only future callers
    /// start fresh.
    fn sweep_stale(&self) {
        let now = Utc::now();
        let grace = self.config.grace;
        self.pending.retain(|key, pending| {
            let stale = now - pending.started_at > grace;
            if stale {
                log::debug!("dropping stale in-flight registration for key: {}", key);
            }
            !stale
        });
    }

    /// Statistics about pending requests.
    pub fn stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            pending_requests: self.pending.len(),
        }
    }

    /// Clears all pending registrations.
    pub fn clear(&self) {
        self.pending.clear();
        log::info!("request deduplicator cleared");
    }
}

/// Statistics for request deduplication.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "graphql", derive(async_graphql::SimpleObject))]
pub struct DeduplicationStats {
    pub pending_requests: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let deduplicator = Arc::new(RequestDeduplicator::new(DeduplicationConfig::default()));
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..5 {
            let deduplicator = deduplicator.clone();
            let executions = executions.clone();

            handles.push(tokio::spawn(async move {
                deduplicator
                    .share_or_start("nearby_search_k1", move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(100)).await;
                        Ok(json!({ "places": 3 }))
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.value, json!({ "places": 3 }));
            if outcome.leader {
                leaders += 1;
            }
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
    }

    #[tokio::test]
    async fn different_keys_are_not_deduplicated() {
        let deduplicator = Arc::new(RequestDeduplicator::new(DeduplicationConfig::default()));
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for key in ["geocode_a", "geocode_b"] {
            let deduplicator = deduplicator.clone();
            let executions = executions.clone();

            handles.push(tokio::spawn(async move {
                deduplicator
                    .share_or_start(key, move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(50)).await;
                        Ok(Value::Null)
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_shared_with_every_caller() {
        let deduplicator = Arc::new(RequestDeduplicator::new(DeduplicationConfig::default()));

        let mut handles = vec![];
        for _ in 0..3 {
            let deduplicator = deduplicator.clone();
            handles.push(tokio::spawn(async move {
                deduplicator
                    .share_or_start("geocode_broken", || async {
                        tokio::time::sleep(StdDuration::from_millis(50)).await;
                        Err(Error::request("provider unreachable"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let error = handle.await.unwrap().unwrap_err();
            assert!(error.is_kind(ErrorKind::Request));
        }

        // A settled failure leaves nothing registered, so a retry may run.
        assert_eq!(deduplicator.stats().pending_requests, 0);
    }

    #[tokio::test]
    async fn stale_registration_lets_a_new_call_start() {
        let config = DeduplicationConfig {
            grace: Duration::milliseconds(50),
            enabled: true,
        };
        let deduplicator = Arc::new(RequestDeduplicator::new(config));
        let executions = Arc::new(AtomicUsize::new(0));

        let first = {
            let deduplicator = deduplicator.clone();
            let executions = executions.clone();
            tokio::spawn(async move {
                deduplicator
                    .share_or_start("slow_key", move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(200)).await;
                        Ok(json!(1))
                    })
                    .await
            })
        };

        tokio::time::sleep(StdDuration::from_millis(100)).await;

        // The first registration is past its grace window by now.
        let second = deduplicator
            .share_or_start("slow_key", {
                let executions = executions.clone();
                move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(2))
                }
            })
            .await
            .unwrap();

        let first = first.await.unwrap().unwrap();

        assert_eq!(executions.load(Ordering::SeqCst), 2);
        assert_eq!(first.value, json!(1));
        assert_eq!(second.value, json!(2));
        assert!(first.leader && second.leader);
    }

    #[tokio::test]
    async fn disabled_deduplication_always_executes() {
        let config = DeduplicationConfig {
            grace: Duration::seconds(5),
            enabled: false,
        };
        let deduplicator = RequestDeduplicator::new(config);
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let executions = executions.clone();
            deduplicator
                .share_or_start("key", move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                })
                .await
                .unwrap();
        }

        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }
}
