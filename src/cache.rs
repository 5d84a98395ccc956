//! Result cache with TTL, capacity budget, and per-key single-flight.
//!
//! One compute runs per key at any instant: concurrent callers for the same
//! key await the leader's result over a watch channel instead of invoking
//! the compute themselves. Failures are delivered to every waiter and never
//! cached, so the next call for that key starts a fresh compute. Capacity is
//! a budget over estimated serialized size, enforced by least-recently-used
//! eviction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::types::{CacheConfig, Error, Result};

/// Result of an in-flight compute, shared with every waiter.
/// `None` until the flight leader publishes.
type FlightResult = Option<std::result::Result<Value, Arc<Error>>>;

/// A cached value. Owned exclusively by the manager; callers only ever see
/// cloned values.
#[derive(Debug)]
struct CacheEntry {
    value: Value,
    #[allow(dead_code)] // kept for debug inspection of entry age
    computed_at: DateTime<Utc>,
    expires_at: Instant,
    last_used: Instant,
    size_estimate: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
    inflight: HashMap<String, watch::Receiver<FlightResult>>,
}

impl CacheState {
    /// Evict least-recently-used entries until `total_size <= budget`.
    /// Keys with an in-flight compute are never victims.
    fn evict_to_budget(&mut self, budget: u64) -> u64 {
        let mut evicted = 0;
        while self.total_size > budget {
            let victim = self
                .entries
                .iter()
                .filter(|(key, _)| !self.inflight.contains_key(*key))
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    if let Some(entry) = self.entries.remove(&key) {
                        self.total_size = self.total_size.saturating_sub(entry.size_estimate);
                        evicted += 1;
                    }
                }
                None => break,
            }
        }
        evicted
    }

    fn remove_entry(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.total_size = self.total_size.saturating_sub(entry.size_estimate);
        }
    }
}

/// Counters and sizes exposed on the reporting surface.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub inflight: usize,
}

/// TTL + capacity cache with per-key single-flight compute.
#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

enum FlightRoute {
    Join(watch::Receiver<FlightResult>),
    Lead(watch::Sender<FlightResult>),
}

/// Removes the in-flight marker if the leader future is dropped before it
/// publishes (request cancellation), so later callers start a fresh compute
/// instead of waiting on a dead channel forever.
struct FlightCleanup<'a> {
    cache: &'a CacheManager,
    key: &'a str,
    armed: bool,
}

impl Drop for FlightCleanup<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.lock_state().inflight.remove(self.key);
        }
    }
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the live entry for `key`, or compute one.
    ///
    /// A live (non-expired) entry is returned without invoking `compute`.
    /// Otherwise exactly one caller becomes the flight leader and runs
    /// `compute`; every other concurrent caller for the same key awaits the
    /// leader's outcome. A successful value is stored with
    /// `expires_at = now + ttl`; a failure is returned to leader and waiters
    /// alike as [`Error::CacheCompute`] and nothing is stored.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if !self.config.enabled {
            return compute().await;
        }

        // Join an existing flight or become its leader; decided under one
        // lock hold so two callers can never both lead the same key.
        let route = {
            let mut state = self.lock_state();
            let now = Instant::now();

            if let Some(entry) = state.entries.get_mut(key) {
                if entry.expires_at > now {
                    entry.last_used = now;
                    let value = entry.value.clone();
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
            }
            // Expired entries are dropped here so they can never be served again.
            state.remove_entry(key);
            self.misses.fetch_add(1, Ordering::Relaxed);

            if let Some(rx) = state.inflight.get(key).cloned() {
                FlightRoute::Join(rx)
            } else {
                let (tx, rx) = watch::channel(None);
                state.inflight.insert(key.to_string(), rx);
                FlightRoute::Lead(tx)
            }
        };

        match route {
            FlightRoute::Lead(tx) => self.lead_flight(key, ttl, compute, tx).await,
            FlightRoute::Join(mut rx) => {
                let outcome = rx
                    .wait_for(|result| result.is_some())
                    .await
                    .map_err(|_| Error::cache_compute("compute abandoned before completing"))?;
                match &*outcome {
                    Some(Ok(value)) => Ok(value.clone()),
                    Some(Err(err)) => Err(Error::cache_compute(err.to_string())),
                    None => Err(Error::cache_compute("compute completed without a result")),
                }
            }
        }
    }

    async fn lead_flight<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
        tx: watch::Sender<FlightResult>,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut cleanup = FlightCleanup {
            cache: self,
            key,
            armed: true,
        };
        let outcome = compute().await;

        match outcome {
            Ok(value) => {
                let size = estimate_size(&value);
                let evicted = {
                    let mut state = self.lock_state();
                    state.inflight.remove(key);
                    cleanup.armed = false;
                    state.remove_entry(key);
                    let now = Instant::now();
                    state.entries.insert(
                        key.to_string(),
                        CacheEntry {
                            value: value.clone(),
                            computed_at: Utc::now(),
                            expires_at: now + ttl,
                            last_used: now,
                            size_estimate: size,
                        },
                    );
                    state.total_size += size;
                    state.evict_to_budget(self.config.max_size)
                };
                self.evictions.fetch_add(evicted, Ordering::Relaxed);
                let _ = tx.send(Some(Ok(value.clone())));
                Ok(value)
            }
            Err(err) => {
                {
                    let mut state = self.lock_state();
                    state.inflight.remove(key);
                    cleanup.armed = false;
                }
                let shared = Arc::new(err);
                let _ = tx.send(Some(Err(shared.clone())));
                Err(Error::cache_compute(shared.to_string()))
            }
        }
    }

    /// Drop an entry immediately regardless of TTL. Returns whether one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.lock_state();
        let present = state.entries.contains_key(key);
        state.remove_entry(key);
        present
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.lock_state();
        let now = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove_entry(key);
        }
        expired.len()
    }

    /// Evict LRU-first until total estimated size is within `budget`.
    pub fn shrink_to(&self, budget: u64) -> u64 {
        let evicted = self.lock_state().evict_to_budget(budget);
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        evicted
    }

    /// Non-expired presence check. Does not refresh recency.
    pub fn contains(&self, key: &str) -> bool {
        let state = self.lock_state();
        state
            .entries
            .get(key)
            .map(|entry| entry.expires_at > Instant::now())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        CacheStats {
            entries: state.entries.len(),
            total_size: state.total_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            inflight: state.inflight.len(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // Lock is never held across an await; poisoning only means a panic
        // mid-update in a test build, where the state is still consistent
        // enough to continue.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn estimate_size(value: &Value) -> u64 {
    serde_json::to_string(value)
        .map(|s| s.len() as u64)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tokio::time::sleep;

    fn test_config(max_size: u64) -> CacheConfig {
        CacheConfig {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_size,
        }
    }

    #[tokio::test]
    async fn test_live_entry_served_without_recompute() {
        let cache = CacheManager::new(test_config(1024 * 1024));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value = cache
                .get_or_compute("host:overview", Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"cpu": 12.5}))
                })
                .await
                .unwrap();
            assert_eq!(value, json!({"cpu": 12.5}));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_recompute_after_ttl_expiry() {
        let cache = CacheManager::new(test_config(1024 * 1024));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_compute("host:overview", Duration::from_millis(40), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                })
                .await
                .unwrap();
            sleep(Duration::from_millis(90)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_concurrent_callers() {
        let cache = Arc::new(CacheManager::new(test_config(1024 * 1024)));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("docker:list", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(100)).await;
                        Ok(json!(["media", "adguard"]))
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value, json!(["media", "adguard"]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_error_reaches_every_waiter_and_is_not_cached() {
        let cache = Arc::new(CacheManager::new(test_config(1024 * 1024)));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("plex:status", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        Err(Error::upstream("plex unreachable"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), "cache_compute_error");
            assert!(err.to_string().contains("plex unreachable"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The failure was not cached: the next call computes again.
        let calls2 = calls.clone();
        let value = cache
            .get_or_compute("plex:status", Duration::from_secs(60), move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(json!("up"))
            })
            .await
            .unwrap();
        assert_eq!(value, json!("up"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_recency() {
        // Each json string of 100 chars serializes to 102 bytes; budget fits two.
        let cache = CacheManager::new(test_config(250));
        let payload = |tag: &str| json!(tag.repeat(100));

        for key in ["first", "second"] {
            let value = payload(&key[..1]);
            cache
                .get_or_compute(key, Duration::from_secs(60), move || async move { Ok(value) })
                .await
                .unwrap();
            sleep(Duration::from_millis(5)).await;
        }

        // Touch "first" so "second" becomes least recently used.
        cache
            .get_or_compute("first", Duration::from_secs(60), || async {
                Ok(json!("should not recompute"))
            })
            .await
            .unwrap();
        sleep(Duration::from_millis(5)).await;

        let value = payload("t");
        cache
            .get_or_compute("third", Duration::from_secs(60), move || async move { Ok(value) })
            .await
            .unwrap();

        assert!(cache.contains("first"));
        assert!(cache.contains("third"));
        assert!(!cache.contains("second"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = CacheManager::new(test_config(1024 * 1024));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_compute("host:overview", Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(cache.invalidate("host:overview"));
        assert!(!cache.invalidate("host:overview"));

        let calls2 = calls.clone();
        cache
            .get_or_compute("host:overview", Duration::from_secs(60), move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(json!(2))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_purge_expired_and_shrink_to() {
        let cache = CacheManager::new(test_config(1024 * 1024));
        for (key, ttl) in [("a", 30), ("b", 30), ("c", 60_000)] {
            cache
                .get_or_compute(key, Duration::from_millis(ttl), || async { Ok(json!("v")) })
                .await
                .unwrap();
        }
        sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("c"));

        assert_eq!(cache.shrink_to(0), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let cache = CacheManager::new(CacheConfig {
            enabled: false,
            ..test_config(1024 * 1024)
        });
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_compute("host:overview", Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().entries, 0);
    }
}
