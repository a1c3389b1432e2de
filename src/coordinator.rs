//! Load Coordinator
//!
//! Get-or-load on top of `CacheStore`, with at most one loader invocation in
//! flight per key.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheStore, MetricsCollector, Payload, PutOptions};
use crate::error::{CacheError, Result};

// == Loader ==
/// Fetches the content for a key on a cache miss.
///
/// The cache never performs network or file I/O itself; callers hand it a
/// loader that does.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, key: &str) -> anyhow::Result<Payload>;
}

#[async_trait]
impl<F, Fut> Loader for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Payload>> + Send,
{
    async fn load(&self, key: &str) -> anyhow::Result<Payload> {
        (self)(key.to_string()).await
    }
}

/// Wraps an async closure as a shareable loader.
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn Loader>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Payload>> + Send + 'static,
{
    Arc::new(f)
}

/// Where a `get_or_load` result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// Already resident in the store
    Cache,
    /// This call started the loader
    Loaded,
    /// This call awaited a load another caller started
    Joined,
}

type SharedLoad = Shared<BoxFuture<'static, Result<Payload>>>;

struct InFlight {
    id: u64,
    future: SharedLoad,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

fn lock(map: &InFlightMap) -> MutexGuard<'_, HashMap<String, InFlight>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears an in-flight registration when the load task ends, however it
/// ends (success, error, timeout, panic or abort).
struct ReleaseOnDrop {
    in_flight: InFlightMap,
    key: String,
    id: u64,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let mut map = lock(&self.in_flight);
        if map.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            map.remove(&self.key);
        }
    }
}

// == Load Coordinator ==
/// Deduplicates concurrent loads for the same key.
///
/// Each load runs as its own task, so it settles (and frees its slot) even
/// when every caller has stopped waiting for it.
#[derive(Clone)]
pub struct LoadCoordinator {
    store: Arc<CacheStore>,
    metrics: Arc<MetricsCollector>,
    in_flight: InFlightMap,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("in_flight", &self.in_flight_count())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LoadCoordinator {
    pub fn new(store: Arc<CacheStore>, timeout: Duration) -> Self {
        let metrics = store.metrics().clone();
        Self {
            store,
            metrics,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    // == Get Or Load ==
    /// Returns the cached value for `key`, loading and caching it on a miss.
    ///
    /// Concurrent callers for the same key share one loader invocation and
    /// receive the same value or the same error. Failed loads are not cached
    /// and not retried; the next call starts a fresh load.
    pub async fn get_or_load(
        &self,
        key: &str,
        loader: Arc<dyn Loader>,
        opts: PutOptions,
    ) -> Result<Payload> {
        self.get_or_load_traced(key, loader, opts)
            .await
            .map(|(value, _)| value)
    }

    /// Like `get_or_load`, also reporting where the value came from.
    pub async fn get_or_load_traced(
        &self,
        key: &str,
        loader: Arc<dyn Loader>,
        opts: PutOptions,
    ) -> Result<(Payload, LoadSource)> {
        let pending = lock(&self.in_flight).get(key).map(|slot| slot.future.clone());
        if let Some(pending) = pending {
            debug!("Joining in-flight load for '{}'", key);
            return pending.await.map(|value| (value, LoadSource::Joined));
        }

        match self.store.get(key).await {
            Ok(Some(value)) => return Ok((value, LoadSource::Cache)),
            Ok(None) => {}
            Err(e) => warn!("Cache lookup for '{}' failed, loading instead: {}", key, e),
        }

        let (future, leader) = self.claim(key, loader, opts);
        let source = if leader {
            LoadSource::Loaded
        } else {
            LoadSource::Joined
        };
        future.await.map(|value| (value, source))
    }

    /// Warms `key` in the background path: residency is checked with
    /// `contains`, so hit/miss counters and promotion are left alone.
    ///
    /// Shares the in-flight map with `get_or_load`, so a speculative load and
    /// an organic one for the same key never both reach the loader.
    pub async fn prefetch(
        &self,
        key: &str,
        loader: Arc<dyn Loader>,
        opts: PutOptions,
    ) -> Result<LoadSource> {
        let pending = lock(&self.in_flight).get(key).map(|slot| slot.future.clone());
        if let Some(pending) = pending {
            return pending.await.map(|_| LoadSource::Joined);
        }
        if self.store.contains(key).await {
            return Ok(LoadSource::Cache);
        }

        let (future, leader) = self.claim(key, loader, opts);
        future.await.map(|_| {
            if leader {
                LoadSource::Loaded
            } else {
                LoadSource::Joined
            }
        })
    }

    /// Registers a new load for `key`, or returns the one already running.
    fn claim(&self, key: &str, loader: Arc<dyn Loader>, opts: PutOptions) -> (SharedLoad, bool) {
        let mut map = lock(&self.in_flight);
        if let Some(slot) = map.get(key) {
            return (slot.future.clone(), false);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(self.clone().run_load(key.to_string(), id, loader, opts));

        let owned_key = key.to_string();
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(CacheError::loader(
                    owned_key,
                    anyhow::anyhow!("load task failed: {}", join_err),
                )),
            }
        }
        .boxed()
        .shared();

        map.insert(
            key.to_string(),
            InFlight {
                id,
                future: future.clone(),
            },
        );
        (future, true)
    }

    async fn run_load(
        self,
        key: String,
        id: u64,
        loader: Arc<dyn Loader>,
        opts: PutOptions,
    ) -> Result<Payload> {
        // Built on first poll: claim() still holds the map lock at spawn time
        let release = ReleaseOnDrop {
            in_flight: self.in_flight.clone(),
            key: key.clone(),
            id,
        };
        // Another load may have cached the key between our miss and claim
        if let Ok(Some(entry)) = self.store.peek(&key).await {
            debug!("'{}' became resident before loading, skipping loader", key);
            drop(release);
            return Ok(entry.value);
        }
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, loader.load(&key)).await {
            Ok(Ok(value)) => {
                self.metrics
                    .record_load_time(started.elapsed().as_secs_f64() * 1000.0);
                match self.store.put(&key, value.clone(), opts).await {
                    Ok(tier) => debug!("Loaded '{}' into {} tier", key, tier),
                    Err(e) => warn!("Loaded '{}' but could not cache it: {}", key, e),
                }
                Ok(value)
            }
            Ok(Err(e)) => Err(CacheError::loader(key.as_str(), e)),
            Err(_) => Err(CacheError::LoadTimeout {
                key: key.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        drop(release);
        outcome
    }
}
