//! Integration Tests for the Cache Service
//!
//! Drives the public `CacheService` API end to end with a manual clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tiered_cache::cache::{CacheEntry, TierBackends, TierLimits};
use tiered_cache::prediction::GROUP_ID;
use tiered_cache::storage::{MemoryStore, PersistentStore};
use tiered_cache::{
    loader_fn, CacheError, CacheService, Config, Context, Loader, ManualClock, Payload,
    PredictionReason, PutOptions, ServiceParts, Tier,
};

// == Helper Functions ==

const KB: usize = 1024;

fn echo_loader() -> Arc<dyn Loader> {
    loader_fn(|key: String| async move { anyhow::Ok(Payload::from(format!("origin:{}", key))) })
}

fn service_with(config: Config, loader: Arc<dyn Loader>) -> (Arc<ManualClock>, CacheService) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let parts = ServiceParts {
        clock: clock.clone(),
        ..ServiceParts::in_memory(loader)
    };
    (clock, CacheService::new(config, parts).unwrap())
}

fn service() -> (Arc<ManualClock>, CacheService) {
    service_with(Config::default(), echo_loader())
}

fn sized(size: usize) -> PutOptions {
    PutOptions {
        size_bytes: Some(size),
        ..PutOptions::default()
    }
}

// == Expiry ==

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let (clock, service) = service();

    service
        .put("course_42", "payload", PutOptions::with_ttl(Duration::from_millis(5000)))
        .await
        .unwrap();
    assert_eq!(
        service.get("course_42").await.unwrap(),
        Some(Payload::from("payload"))
    );

    clock.advance(6000);
    assert_eq!(service.get("course_42").await.unwrap(), None);
    assert_eq!(service.get("course_42").await.unwrap(), None);

    let stats = service.get_stats().await;
    assert_eq!(stats.evictions, 0);
    assert_eq!(stats.total_entries(), 0);
}

// == Load Deduplication ==

#[tokio::test(start_paused = true)]
async fn test_concurrent_loads_invoke_loader_once() {
    let (_clock, service) = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let slow = loader_fn(move |key: String| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            anyhow::Ok(Payload::from(format!("content of {}", key)))
        }
    });

    let (a, b) = tokio::join!(
        service.get_or_load("course_42", slow.clone(), PutOptions::default()),
        service.get_or_load("course_42", slow.clone(), PutOptions::default()),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    assert!(service.store().contains("course_42").await);
}

#[tokio::test(start_paused = true)]
async fn test_slow_loader_times_out() {
    let config = Config {
        load_timeout: Duration::from_secs(1),
        ..Config::default()
    };
    let (_clock, service) = service_with(config, echo_loader());
    let stuck = loader_fn(|_key: String| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        anyhow::Ok(Payload::from("late"))
    });

    let err = service
        .get_or_load("slow", stuck, PutOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::LoadTimeout { .. }));
    assert_eq!(service.coordinator().in_flight_count(), 0);
}

// == Eviction ==

#[tokio::test]
async fn test_lru_eviction_keeps_recently_read_entry() {
    let config = Config {
        fast_max: 2 * KB,
        fast_item_size: 2 * KB,
        mid_item_size: 4 * KB,
        ..Config::default()
    };
    let (_clock, service) = service_with(config, echo_loader());

    service.put("A", "a", sized(KB)).await.unwrap();
    service.put("B", "b", sized(KB)).await.unwrap();
    assert!(service.get("A").await.unwrap().is_some());
    service.put("C", "c", sized(KB)).await.unwrap();

    assert_eq!(service.store().tier_of("A").await, Some(Tier::Fast));
    assert_eq!(service.store().tier_of("C").await, Some(Tier::Fast));
    assert_eq!(service.store().tier_of("B").await, None);

    let stats = service.get_stats().await;
    assert_eq!(stats.evictions, 1);
    assert!(stats.tier_sizes.fast.bytes <= 2 * KB);
}

#[tokio::test]
async fn test_mid_tier_hit_is_promoted() {
    let (_clock, service) = service();

    let tier = service.put("doc", "body", sized(10 * KB)).await.unwrap();
    assert_eq!(tier, Tier::Mid);

    assert!(service.get("doc").await.unwrap().is_some());
    assert_eq!(service.store().tier_of("doc").await, Some(Tier::Fast));
}

// == Prediction ==

#[tokio::test]
async fn test_frequent_key_predicted_first() {
    let (_clock, service) = service();
    for _ in 0..5 {
        service.record_access("alice", "key1", Context::new());
    }
    service.record_access("alice", "key2", Context::new());

    let predictions = service.predict("alice", &Context::new());
    assert_eq!(predictions[0].key, "key1");
    assert_eq!(predictions[0].reason, PredictionReason::FrequentAccess);

    let key2 = predictions.iter().find(|p| p.key == "key2").unwrap();
    assert!(predictions[0].confidence >= key2.confidence);
}

#[tokio::test]
async fn test_get_or_load_for_records_access() {
    let (_clock, service) = service();
    let mut context = Context::new();
    context.insert(GROUP_ID.to_string(), "course_7".to_string());

    for key in ["lesson_1", "lesson_2"] {
        service
            .get_or_load_for("bob", key, context.clone(), echo_loader(), PutOptions::default())
            .await
            .unwrap();
    }

    assert_eq!(service.recorder().history("bob").len(), 2);
    let predictions = service.predict("carol", &context);
    assert!(predictions
        .iter()
        .any(|p| p.key == "lesson_2" && p.reason == PredictionReason::GroupRelated));
}

// == Prefetch ==

#[tokio::test(start_paused = true)]
async fn test_focus_hint_prefetches_with_longer_ttl() {
    let (_clock, service) = service();
    for _ in 0..7 {
        service.record_access("alice", "lesson_3", Context::new());
    }

    service.events().focus_hint("alice", &Context::new());
    tokio::time::sleep(Duration::from_millis(10)).await;
    service.scheduler().drain().await;

    let entry = service.store().peek("lesson_3").await.unwrap().unwrap();
    assert_eq!(entry.value, Payload::from("origin:lesson_3"));
    assert_eq!(
        entry.expires_at - entry.created_at,
        service.config().prefetch_ttl.as_millis() as u64
    );

    let stats = service.get_stats().await;
    assert_eq!(stats.prefetches, 1);
    assert_eq!(stats.hits + stats.misses, 0);
}

#[tokio::test]
async fn test_hidden_surface_pauses_prefetch() {
    let (_clock, service) = service();
    for _ in 0..7 {
        service.record_access("alice", "lesson_3", Context::new());
    }

    service.events().visibility_change(false);
    let accepted = service
        .start_prefetch("alice", &Context::new(), Default::default())
        .await;
    assert!(accepted.is_empty());

    service.events().visibility_change(true);
    let accepted = service
        .start_prefetch("alice", &Context::new(), Default::default())
        .await;
    assert_eq!(accepted, vec!["lesson_3".to_string()]);
}

// == Stats ==

#[tokio::test]
async fn test_hit_rate_after_scripted_sequence() {
    let (_clock, service) = service();
    for key in ["a", "b", "c"] {
        service.put(key, "v", PutOptions::default()).await.unwrap();
    }

    for key in ["a", "b", "c", "a", "b", "c"] {
        assert!(service.get(key).await.unwrap().is_some());
    }
    for key in ["w", "x", "y", "z"] {
        assert!(service.get(key).await.unwrap().is_none());
    }

    let stats = service.get_stats().await;
    assert_eq!(stats.hits, 6);
    assert_eq!(stats.misses, 4);
    assert!((stats.hit_rate - 0.6).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_clear_all_empties_tiers_and_stats() {
    let (_clock, service) = service();
    service.put("small", "v", PutOptions::default()).await.unwrap();
    service.put("large", "v", sized(100 * KB)).await.unwrap();
    service.get("small").await.unwrap();
    service.get("missing").await.unwrap();
    service.record_access("alice", "small", Context::new());

    service.clear_all().await.unwrap();

    let stats = service.get_stats().await;
    assert_eq!(stats.total_entries(), 0);
    for tier in Tier::ALL {
        assert_eq!(stats.tier_sizes.get(tier).bytes, 0);
    }
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.evictions, 0);
    assert_eq!(stats.hit_rate, 0.0);
    assert_eq!(service.recorder().subject_count(), 0);
}

/// Memory backend whose `clear` always fails.
#[derive(Debug, Default)]
struct StuckOnClear(MemoryStore);

#[async_trait]
impl PersistentStore for StuckOnClear {
    async fn get(&self, key: &str) -> tiered_cache::Result<Option<CacheEntry>> {
        self.0.get(key).await
    }
    async fn set(&self, key: &str, entry: &CacheEntry) -> tiered_cache::Result<()> {
        self.0.set(key, entry).await
    }
    async fn delete(&self, key: &str) -> tiered_cache::Result<bool> {
        self.0.delete(key).await
    }
    async fn clear(&self) -> tiered_cache::Result<()> {
        Err(CacheError::Backend("disk offline".into()))
    }
    async fn iterate_expiring_before(&self, time_ms: u64) -> tiered_cache::Result<Vec<CacheEntry>> {
        self.0.iterate_expiring_before(time_ms).await
    }
}

#[tokio::test]
async fn test_clear_all_resets_stats_even_when_a_tier_fails() {
    let parts = ServiceParts {
        backends: TierBackends {
            mid: Arc::new(StuckOnClear::default()),
            ..TierBackends::in_memory()
        },
        ..ServiceParts::in_memory(echo_loader())
    };
    let service = CacheService::new(Config::default(), parts).unwrap();
    service.put("small", "v", PutOptions::default()).await.unwrap();
    service.put("large", "v", sized(100 * KB)).await.unwrap();
    service.get("small").await.unwrap();
    service.record_access("alice", "small", Context::new());

    let err = service.clear_all().await.unwrap_err();
    assert!(matches!(err, CacheError::Backend(_)));

    let stats = service.get_stats().await;
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.tier_sizes.get(Tier::Fast).entries, 0);
    assert_eq!(stats.tier_sizes.get(Tier::Cold).entries, 0);
    assert_eq!(service.recorder().subject_count(), 0);
}

// == Lifecycle ==

#[tokio::test]
async fn test_persisted_tiers_and_patterns_survive_restart() {
    let data = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: Some(data.path().to_path_buf()),
        ..Config::default()
    };

    {
        let parts = ServiceParts::from_config(&config, echo_loader()).await.unwrap();
        let service = CacheService::new(config.clone(), parts).unwrap();
        service.start().await.unwrap();
        assert_eq!(service.put("report", "pdf bytes", sized(10 * KB)).await.unwrap(), Tier::Mid);
        for _ in 0..4 {
            service.record_access("alice", "report", Context::new());
        }
        service.stop().await.unwrap();
    }

    let parts = ServiceParts::from_config(&config, echo_loader()).await.unwrap();
    let service = CacheService::new(config, parts).unwrap();
    service.start().await.unwrap();

    assert_eq!(service.store().tier_of("report").await, Some(Tier::Mid));
    assert_eq!(
        service.get("report").await.unwrap(),
        Some(Payload::from("pdf bytes"))
    );
    let predictions = service.predict("alice", &Context::new());
    assert_eq!(predictions[0].key, "report");
    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_halts_maintenance() {
    let (_clock, service) = service();

    service.start().await.unwrap();
    service.start().await.unwrap();
    assert!(service.is_started());

    service.stop().await.unwrap();
    assert!(!service.is_started());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = Config {
        prefetch_threshold: -0.1,
        ..Config::default()
    };
    let parts = ServiceParts::in_memory(echo_loader());
    assert!(matches!(
        CacheService::new(config, parts),
        Err(CacheError::InvalidConfig(_))
    ));

    let limits = Config::default().tier_limits();
    assert_eq!(limits, TierLimits::default());
}
