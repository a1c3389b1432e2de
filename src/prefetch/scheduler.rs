//! Prefetch Scheduler
//!
//! Turns predictions into background loads. Prefetching is best-effort:
//! failures are counted and logged, never returned to a caller.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::events::InteractionListener;
use crate::cache::{MetricsCollector, PrefetchOutcome, PutOptions};
use crate::coordinator::{LoadCoordinator, LoadSource, Loader};
use crate::error::CacheError;
use crate::prediction::{Context, PredictionEngine};

/// Scheduler-wide defaults.
#[derive(Debug, Clone, Copy)]
pub struct PrefetchSettings {
    /// Predictions below this confidence are ignored
    pub threshold: f64,
    /// Upper bound on simultaneous background loads
    pub max_concurrent: usize,
    /// TTL given to prefetched entries
    pub ttl: Duration,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            max_concurrent: 3,
            ttl: Duration::from_secs(600),
        }
    }
}

/// Per-call overrides for `start_prefetch`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefetchOptions {
    pub threshold: Option<f64>,
    /// Further limits this batch; the scheduler-wide bound still applies
    pub max_concurrent: Option<usize>,
}

struct Inner {
    engine: Arc<PredictionEngine>,
    coordinator: LoadCoordinator,
    loader: Arc<dyn Loader>,
    metrics: Arc<MetricsCollector>,
    settings: PrefetchSettings,
    permits: Arc<Semaphore>,
    paused: AtomicBool,
    queued: Mutex<HashSet<String>>,
    active: AtomicUsize,
    tasks: Mutex<JoinSet<()>>,
}

/// Decrements the active counter when a prefetch task ends.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// == Prefetch Scheduler ==
#[derive(Clone)]
pub struct PrefetchScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("settings", &self.inner.settings)
            .field("paused", &self.is_paused())
            .field("queued", &self.queued_count())
            .field("active", &self.active_count())
            .finish()
    }
}

impl PrefetchScheduler {
    /// `loader` is the origin used for every speculative load.
    pub fn new(
        engine: Arc<PredictionEngine>,
        coordinator: LoadCoordinator,
        loader: Arc<dyn Loader>,
        settings: PrefetchSettings,
    ) -> Self {
        let metrics = coordinator.store().metrics().clone();
        Self {
            inner: Arc::new(Inner {
                engine,
                coordinator,
                loader,
                metrics,
                settings,
                permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
                paused: AtomicBool::new(false),
                queued: Mutex::new(HashSet::new()),
                active: AtomicUsize::new(0),
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn settings(&self) -> PrefetchSettings {
        self.inner.settings
    }

    // == Start Prefetch ==
    /// Predicts for `subject_id` and schedules loads for the worthwhile keys.
    ///
    /// Returns the keys accepted for prefetching. Nothing is accepted while
    /// paused. Keys already cached, in flight or queued are skipped.
    pub async fn start_prefetch(
        &self,
        subject_id: &str,
        context: &Context,
        opts: PrefetchOptions,
    ) -> Vec<String> {
        if self.is_paused() {
            debug!("Prefetch paused, ignoring request for '{}'", subject_id);
            return Vec::new();
        }

        let threshold = opts.threshold.unwrap_or(self.inner.settings.threshold);
        let mut accepted = Vec::new();
        for prediction in self.inner.engine.predict(subject_id, context) {
            if prediction.confidence < threshold {
                continue;
            }
            let key = prediction.key;
            if self.inner.coordinator.is_in_flight(&key)
                || self.inner.coordinator.store().contains(&key).await
            {
                continue;
            }
            if self.lock_queued().insert(key.clone()) {
                accepted.push(key);
            }
        }

        if accepted.is_empty() {
            return accepted;
        }
        info!(
            "Prefetching {} keys for subject '{}'",
            accepted.len(),
            subject_id
        );

        let batch = opts
            .max_concurrent
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let mut tasks = self.lock_tasks();
        // Reap finished prefetches so the set only holds live work
        while tasks.try_join_next().is_some() {}
        for key in &accepted {
            tasks.spawn(self.clone().run(key.clone(), batch.clone()));
        }
        accepted
    }

    async fn run(self, key: String, batch: Option<Arc<Semaphore>>) {
        let _batch_permit = match batch {
            Some(batch) => batch.acquire_owned().await.ok(),
            None => None,
        };
        let Ok(_permit) = self.inner.permits.clone().acquire_owned().await else {
            return;
        };

        // Dropped from the queue by clear() or refused while paused
        if !self.lock_queued().remove(&key) || self.is_paused() {
            debug!("Skipping queued prefetch for '{}'", key);
            return;
        }

        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard(&self.inner.active);

        let opts = PutOptions::with_ttl(self.inner.settings.ttl);
        let outcome = match self
            .inner
            .coordinator
            .prefetch(&key, self.inner.loader.clone(), opts)
            .await
        {
            Ok(LoadSource::Cache) => PrefetchOutcome::AlreadyCached,
            Ok(_) => PrefetchOutcome::Loaded,
            Err(CacheError::LoadTimeout { timeout_ms, .. }) => {
                warn!("Prefetch of '{}' timed out after {}ms", key, timeout_ms);
                PrefetchOutcome::TimedOut
            }
            Err(e) => {
                warn!("Prefetch of '{}' failed: {}", key, e);
                PrefetchOutcome::Failed
            }
        };
        debug!("Prefetch of '{}' finished: {:?}", key, outcome);
        self.inner.metrics.record_prefetch(outcome);
    }

    // == Pause / Resume ==
    /// Stops accepting predictions; running prefetches finish normally.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("Prefetching paused");
        }
    }

    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("Prefetching resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Accepted prefetches still waiting for a slot.
    pub fn queued_count(&self) -> usize {
        self.lock_queued().len()
    }

    /// Prefetches currently running their load.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Forgets every queued prefetch. Running loads are left to settle.
    pub fn clear_queue(&self) {
        self.lock_queued().clear();
    }

    /// Waits for every scheduled prefetch task to end.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.lock_tasks());
            if tasks.is_empty() {
                return;
            }
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Aborts scheduled prefetch tasks. Loads already handed to the
    /// coordinator still settle and release their slot.
    pub fn shutdown(&self) {
        self.clear_queue();
        self.lock_tasks().abort_all();
    }

    fn lock_queued(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl InteractionListener for PrefetchScheduler {
    fn on_focus_hint(&self, subject_id: &str, context: &Context) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Focus hint for '{}' outside a runtime, ignored", subject_id);
            return;
        };
        let scheduler = self.clone();
        let subject_id = subject_id.to_string();
        let context = context.clone();
        runtime.spawn(async move {
            scheduler
                .start_prefetch(&subject_id, &context, PrefetchOptions::default())
                .await;
        });
    }

    fn on_visibility_change(&self, visible: bool) {
        if visible {
            self.resume();
        } else {
            self.pause();
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, Payload, TierLimits};
    use crate::clock::ManualClock;
    use crate::coordinator::loader_fn;
    use crate::prediction::{AccessPatternRecorder, PredictionLimits, RecorderLimits};
    use crate::prefetch::{InteractionEventSource, InteractionHub};

    struct Fixture {
        scheduler: PrefetchScheduler,
        recorder: Arc<AccessPatternRecorder>,
        coordinator: LoadCoordinator,
        calls: Arc<AtomicUsize>,
        metrics: Arc<MetricsCollector>,
    }

    fn fixture(max_concurrent: usize, delay: Duration) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let metrics = Arc::new(MetricsCollector::new());
        let store = Arc::new(CacheStore::in_memory(
            TierLimits::default(),
            Duration::from_secs(300),
            metrics.clone(),
            clock.clone(),
        ));
        let coordinator = LoadCoordinator::new(store, Duration::from_secs(10));
        let recorder = Arc::new(AccessPatternRecorder::new(
            clock.clone(),
            RecorderLimits::default(),
        ));
        let engine = Arc::new(PredictionEngine::new(
            recorder.clone(),
            clock,
            PredictionLimits::default(),
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader = loader_fn(move |key: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                if key.starts_with("broken") {
                    anyhow::bail!("origin refused {}", key);
                }
                anyhow::Ok(Payload::from(format!("prefetched {}", key)))
            }
        });
        let settings = PrefetchSettings {
            max_concurrent,
            ..PrefetchSettings::default()
        };
        let scheduler = PrefetchScheduler::new(engine, coordinator.clone(), loader, settings);
        Fixture {
            scheduler,
            recorder,
            coordinator,
            calls,
            metrics,
        }
    }

    fn access(recorder: &AccessPatternRecorder, key: &str, times: usize) {
        for _ in 0..times {
            recorder.record("alice", key, Context::new());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_loads_confident_predictions() {
        let f = fixture(3, Duration::from_millis(50));
        access(&f.recorder, "lesson_1", 6);
        access(&f.recorder, "lesson_2", 2); // 0.2 < threshold

        let accepted = f
            .scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await;
        assert_eq!(accepted, vec!["lesson_1".to_string()]);

        f.scheduler.drain().await;
        assert!(f.coordinator.store().contains("lesson_1").await);
        assert!(!f.coordinator.store().contains("lesson_2").await);
        assert_eq!(f.metrics.prefetches(), 1);
        assert_eq!(f.metrics.hits() + f.metrics.misses(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetched_entries_use_prefetch_ttl() {
        let f = fixture(3, Duration::from_millis(1));
        access(&f.recorder, "lesson_1", 6);

        f.scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await;
        f.scheduler.drain().await;

        let entry = f.coordinator.store().peek("lesson_1").await.unwrap().unwrap();
        assert_eq!(entry.expires_at - entry.created_at, 600_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_and_queued_keys_are_skipped() {
        let f = fixture(3, Duration::from_millis(50));
        access(&f.recorder, "lesson_1", 6);
        access(&f.recorder, "lesson_3", 9);
        f.coordinator
            .store()
            .put("lesson_3", Payload::from("resident"), PutOptions::default())
            .await
            .unwrap();

        let first = f
            .scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await;
        let second = f
            .scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await;

        assert_eq!(first, vec!["lesson_1".to_string()]);
        assert!(second.is_empty());
        f.scheduler.drain().await;
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let f = fixture(2, Duration::from_millis(100));
        for key in ["a", "b", "c", "d", "e"] {
            access(&f.recorder, key, 8);
        }

        let accepted = f
            .scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await;
        assert_eq!(accepted.len(), 5);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.scheduler.active_count(), 2);
        assert_eq!(f.scheduler.queued_count(), 3);
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);

        f.scheduler.drain().await;
        assert_eq!(f.calls.load(Ordering::SeqCst), 5);
        assert_eq!(f.scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_not_raised() {
        let f = fixture(3, Duration::from_millis(10));
        access(&f.recorder, "broken_1", 7);

        f.scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await;
        f.scheduler.drain().await;

        let stats = f.coordinator.store().stats().await;
        assert_eq!(stats.prefetch_failures, 1);
        assert_eq!(stats.prefetches, 0);
        assert!(!f.coordinator.is_in_flight("broken_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_refuses_new_work_and_skips_queued() {
        let f = fixture(1, Duration::from_millis(100));
        access(&f.recorder, "a", 9);
        access(&f.recorder, "b", 8);

        let accepted = f
            .scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await;
        assert_eq!(accepted.len(), 2);
        tokio::time::sleep(Duration::from_millis(10)).await;

        f.scheduler.pause();
        assert!(f
            .scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await
            .is_empty());

        f.scheduler.drain().await;
        // The running load finished, the queued one never started
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert!(f.coordinator.store().contains("a").await);
        assert_eq!(f.scheduler.queued_count(), 0);

        f.scheduler.resume();
        let accepted = f
            .scheduler
            .start_prefetch("alice", &Context::new(), PrefetchOptions::default())
            .await;
        assert_eq!(accepted, vec!["b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_tasks_are_not_retained() {
        let f = fixture(3, Duration::from_millis(1));

        for round in 0..60 {
            let subject = format!("learner_{}", round);
            for _ in 0..6 {
                f.recorder.record(&subject, &format!("lesson_{}", round), Context::new());
            }
            let accepted = f
                .scheduler
                .start_prefetch(&subject, &Context::new(), PrefetchOptions::default())
                .await;
            assert_eq!(accepted.len(), 1);
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(f.scheduler.lock_tasks().len() <= 1);
        }

        assert_eq!(f.calls.load(Ordering::SeqCst), 60);
        assert_eq!(f.metrics.prefetches(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_override() {
        let f = fixture(3, Duration::from_millis(1));
        access(&f.recorder, "lesson_2", 2);

        let opts = PrefetchOptions {
            threshold: Some(0.1),
            ..PrefetchOptions::default()
        };
        let accepted = f.scheduler.start_prefetch("alice", &Context::new(), opts).await;
        assert_eq!(accepted, vec!["lesson_2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_signals_drive_scheduler() {
        let f = fixture(3, Duration::from_millis(1));
        access(&f.recorder, "lesson_1", 6);
        let hub = InteractionHub::new();
        hub.subscribe(Arc::new(f.scheduler.clone()));

        hub.visibility_change(false);
        assert!(f.scheduler.is_paused());
        hub.visibility_change(true);
        assert!(!f.scheduler.is_paused());

        hub.focus_hint("alice", &Context::new());
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.scheduler.drain().await;
        assert!(f.coordinator.store().contains("lesson_1").await);
    }
}
