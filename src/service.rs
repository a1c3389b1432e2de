//! Cache Service
//!
//! Owns one instance of every component (tiers, coordinator, recorder,
//! engine, scheduler, metrics) and exposes the public cache API over them.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CacheStats, CacheStore, MetricsCollector, Payload, PutOptions, Tier, TierBackends};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::coordinator::{LoadCoordinator, Loader};
use crate::error::Result;
use crate::prediction::{AccessEvent, AccessPatternRecorder, Context, Prediction, PredictionEngine};
use crate::prefetch::{InteractionEventSource, InteractionHub, PrefetchOptions, PrefetchScheduler};
use crate::storage::{FileModelStore, FileStore, MemoryModelStore, MemoryStore, ModelStore};
use crate::tasks::{persist_model, spawn_maintenance_task};

const MODEL_FILE: &str = "patterns.json";

/// Injected collaborators for a `CacheService`.
#[derive(Clone)]
pub struct ServiceParts {
    pub clock: Arc<dyn Clock>,
    pub backends: TierBackends,
    pub models: Arc<dyn ModelStore>,
    /// Origin used for speculative loads
    pub prefetch_loader: Arc<dyn Loader>,
}

impl ServiceParts {
    /// In-memory tiers and model with the system clock.
    pub fn in_memory(prefetch_loader: Arc<dyn Loader>) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            backends: TierBackends::in_memory(),
            models: Arc::new(MemoryModelStore::new()),
            prefetch_loader,
        }
    }

    /// File-backed Mid/Cold tiers and model when `config.data_dir` is set,
    /// in-memory otherwise. The Fast tier always lives in memory.
    pub async fn from_config(config: &Config, prefetch_loader: Arc<dyn Loader>) -> Result<Self> {
        let Some(dir) = &config.data_dir else {
            return Ok(Self::in_memory(prefetch_loader));
        };
        info!("Persisting slow tiers under {}", dir.display());
        Ok(Self {
            clock: Arc::new(SystemClock),
            backends: TierBackends {
                fast: Arc::new(MemoryStore::new()),
                mid: Arc::new(FileStore::open(dir.join("mid")).await?),
                cold: Arc::new(FileStore::open(dir.join("cold")).await?),
            },
            models: Arc::new(FileModelStore::new(dir.join(MODEL_FILE))),
            prefetch_loader,
        })
    }
}

// == Cache Service ==
pub struct CacheService {
    config: Config,
    store: Arc<CacheStore>,
    coordinator: LoadCoordinator,
    recorder: Arc<AccessPatternRecorder>,
    engine: Arc<PredictionEngine>,
    scheduler: PrefetchScheduler,
    models: Arc<dyn ModelStore>,
    events: Arc<InteractionHub>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("started", &self.is_started())
            .finish()
    }
}

impl CacheService {
    /// Wires a service from validated configuration and its collaborators.
    pub fn new(config: Config, parts: ServiceParts) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new());
        let store = Arc::new(CacheStore::new(
            config.tier_limits(),
            config.default_ttl,
            parts.backends,
            metrics,
            parts.clock.clone(),
        ));
        let coordinator = LoadCoordinator::new(store.clone(), config.load_timeout);
        let recorder = Arc::new(AccessPatternRecorder::new(
            parts.clock.clone(),
            config.recorder_limits(),
        ));
        let engine = Arc::new(PredictionEngine::new(
            recorder.clone(),
            parts.clock,
            config.prediction_limits(),
        ));
        let scheduler = PrefetchScheduler::new(
            engine.clone(),
            coordinator.clone(),
            parts.prefetch_loader,
            config.prefetch_settings(),
        );
        let events = Arc::new(InteractionHub::new());
        events.subscribe(Arc::new(scheduler.clone()));

        Ok(Self {
            config,
            store,
            coordinator,
            recorder,
            engine,
            scheduler,
            models: parts.models,
            events,
            maintenance: Mutex::new(None),
        })
    }

    /// Convenience constructor with every backend in memory.
    pub fn in_memory(config: Config, prefetch_loader: Arc<dyn Loader>) -> Result<Self> {
        Self::new(config, ServiceParts::in_memory(prefetch_loader))
    }

    // == Lifecycle ==
    /// Re-indexes persisted tiers, restores the pattern model and starts the
    /// maintenance task. Calling it on a started service does nothing.
    pub async fn start(&self) -> Result<()> {
        if self.is_started() {
            warn!("Cache service already started");
            return Ok(());
        }

        let restored = self.store.reindex().await?;
        match self.models.load().await {
            Ok(Some(snapshot)) => {
                info!(
                    "Restored access patterns for {} subjects",
                    snapshot.subjects.len()
                );
                self.recorder.restore(snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable access-pattern model: {}", e),
        }

        let handle = spawn_maintenance_task(
            self.store.clone(),
            self.recorder.clone(),
            self.models.clone(),
            self.config.sweep_interval,
        );
        *self.lock_maintenance() = Some(handle);
        info!("Cache service started with {} persisted entries", restored);
        Ok(())
    }

    /// Stops maintenance and queued prefetches, then saves the pattern model.
    pub async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.lock_maintenance().take() {
            handle.abort();
        }
        self.scheduler.shutdown();
        persist_model(&self.recorder, self.models.as_ref()).await?;
        info!("Cache service stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.lock_maintenance().is_some()
    }

    fn lock_maintenance(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // == Cache Operations ==
    pub async fn put(&self, key: &str, value: impl Into<Payload>, opts: PutOptions) -> Result<Tier> {
        self.store.put(key, value.into(), opts).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Payload>> {
        self.store.get(key).await
    }

    /// See `LoadCoordinator::get_or_load`.
    pub async fn get_or_load(
        &self,
        key: &str,
        loader: Arc<dyn Loader>,
        opts: PutOptions,
    ) -> Result<Payload> {
        self.coordinator.get_or_load(key, loader, opts).await
    }

    /// Records the access for `subject_id`, then gets or loads `key`.
    pub async fn get_or_load_for(
        &self,
        subject_id: &str,
        key: &str,
        context: Context,
        loader: Arc<dyn Loader>,
        opts: PutOptions,
    ) -> Result<Payload> {
        self.recorder.record(subject_id, key, context);
        self.coordinator.get_or_load(key, loader, opts).await
    }

    /// Removes `key` from whichever tier holds it.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }

    // == Prediction ==
    pub fn record_access(&self, subject_id: &str, key: &str, context: Context) -> AccessEvent {
        self.recorder.record(subject_id, key, context)
    }

    pub fn predict(&self, subject_id: &str, context: &Context) -> Vec<Prediction> {
        self.engine.predict(subject_id, context)
    }

    // == Prefetch ==
    pub async fn start_prefetch(
        &self,
        subject_id: &str,
        context: &Context,
        opts: PrefetchOptions,
    ) -> Vec<String> {
        self.scheduler.start_prefetch(subject_id, context, opts).await
    }

    pub fn pause_prefetch(&self) {
        self.scheduler.pause();
    }

    pub fn resume_prefetch(&self) {
        self.scheduler.resume();
    }

    // == Stats ==
    pub async fn get_stats(&self) -> CacheStats {
        self.store.stats().await
    }

    /// Empties every tier and resets counters and learned patterns.
    ///
    /// Counters and patterns are reset even when a tier backend fails to
    /// clear; that failure is returned afterwards. Loads already in flight
    /// are not cancelled; their results land in the emptied store when they
    /// settle.
    pub async fn clear_all(&self) -> Result<()> {
        self.scheduler.clear_queue();
        let cleared = self.store.clear().await;
        self.store.metrics().reset();
        self.recorder.clear();
        match &cleared {
            Ok(()) => info!("Cache cleared"),
            Err(e) => warn!("Cache cleared with a backend failure: {}", e),
        }
        cleared
    }

    // == Accessors ==
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &LoadCoordinator {
        &self.coordinator
    }

    pub fn recorder(&self) -> &Arc<AccessPatternRecorder> {
        &self.recorder
    }

    pub fn scheduler(&self) -> &PrefetchScheduler {
        &self.scheduler
    }

    /// Event source UI bindings push focus and visibility signals into.
    pub fn events(&self) -> &Arc<InteractionHub> {
        &self.events
    }
}
