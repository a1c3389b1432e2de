//! Cache Store Module
//!
//! Tiered cache engine: size-based tier selection, per-tier LRU eviction,
//! lazy and swept TTL expiry, and promotion of slow-tier hits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::sizing::{SerializedSize, SizeEstimator};
use crate::cache::stats::{CacheStats, MetricsCollector, TierSizes, TierUsage};
use crate::cache::{CacheEntry, LruTracker, Metadata, Payload, Tier, MAX_KEY_LENGTH};
use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::storage::{MemoryStore, PersistentStore};

// == Tier Limits ==
/// Capacities and size-class boundaries, all in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub fast_max: usize,
    pub mid_max: usize,
    pub cold_max: usize,
    /// Items smaller than this go to the fast tier
    pub fast_item_size: usize,
    /// Items smaller than this (and not fast) go to the mid tier
    pub mid_item_size: usize,
}

impl TierLimits {
    pub fn capacity(&self, tier: Tier) -> usize {
        match tier {
            Tier::Fast => self.fast_max,
            Tier::Mid => self.mid_max,
            Tier::Cold => self.cold_max,
        }
    }

    /// Tier an item of `size_bytes` is first offered to.
    pub fn tier_for_size(&self, size_bytes: usize) -> Tier {
        if size_bytes < self.fast_item_size {
            Tier::Fast
        } else if size_bytes < self.mid_item_size {
            Tier::Mid
        } else {
            Tier::Cold
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            fast_max: 8 * 1024 * 1024,
            mid_max: 64 * 1024 * 1024,
            cold_max: 512 * 1024 * 1024,
            fast_item_size: 1024,
            mid_item_size: 50 * 1024,
        }
    }
}

/// Backends for the three tiers.
#[derive(Debug, Clone)]
pub struct TierBackends {
    pub fast: Arc<dyn PersistentStore>,
    pub mid: Arc<dyn PersistentStore>,
    pub cold: Arc<dyn PersistentStore>,
}

impl TierBackends {
    /// Every tier held in process memory.
    pub fn in_memory() -> Self {
        Self {
            fast: Arc::new(MemoryStore::new()),
            mid: Arc::new(MemoryStore::new()),
            cold: Arc::new(MemoryStore::new()),
        }
    }
}

// == Put Options ==
/// Per-call settings for `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Lifetime of the entry; the store default applies when `None`
    pub ttl: Option<Duration>,
    pub metadata: Metadata,
    /// Exact accounted size; wins over the size estimator
    pub size_bytes: Option<usize>,
}

impl PutOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed across all tiers
    pub removed: usize,
    /// Tiers whose backend failed during the sweep
    pub failed_tiers: Vec<Tier>,
}

#[derive(Debug, Clone, Copy)]
struct IndexSlot {
    size_bytes: usize,
    expires_at: u64,
}

/// In-memory accounting for one tier; values live in the backend.
#[derive(Debug)]
struct TierSlot {
    tier: Tier,
    capacity: usize,
    used: usize,
    index: HashMap<String, IndexSlot>,
    lru: LruTracker,
    backend: Arc<dyn PersistentStore>,
}

impl TierSlot {
    fn new(tier: Tier, capacity: usize, backend: Arc<dyn PersistentStore>) -> Self {
        Self {
            tier,
            capacity,
            used: 0,
            index: HashMap::new(),
            lru: LruTracker::new(),
            backend,
        }
    }

    fn account(&mut self, entry: &CacheEntry) {
        let slot = IndexSlot {
            size_bytes: entry.size_bytes,
            expires_at: entry.expires_at,
        };
        if let Some(old) = self.index.insert(entry.key.clone(), slot) {
            self.used -= old.size_bytes;
        }
        self.used += entry.size_bytes;
        self.lru.touch(&entry.key);
    }

    fn forget(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        match self.index.remove(key) {
            Some(slot) => {
                self.used -= slot.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Drops `key` from accounting and backend. Backend failures are logged;
    /// the key is gone from the index either way.
    async fn remove(&mut self, key: &str) -> bool {
        let known = self.forget(key);
        if let Err(e) = self.backend.delete(key).await {
            warn!("Failed to delete '{}' from {} tier: {}", key, self.tier, e);
        }
        known
    }

    /// Evicts least recently used entries until `incoming` more bytes fit.
    async fn make_room(&mut self, incoming: usize, metrics: &MetricsCollector) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.used + incoming > self.capacity {
            let Some(victim) = self.lru.peek_oldest().cloned() else {
                break;
            };
            self.remove(&victim).await;
            metrics.record_eviction();
            debug!("Evicted '{}' from {} tier", victim, self.tier);
            evicted.push(victim);
        }
        evicted
    }

    fn usage(&self) -> TierUsage {
        TierUsage {
            bytes: self.used,
            entries: self.index.len(),
            capacity: self.capacity,
        }
    }

    fn clear_index(&mut self) {
        self.used = 0;
        self.index.clear();
        self.lru.clear();
    }
}

// == Cache Store ==
/// Tiered key/value storage with LRU eviction and TTL support.
///
/// All tier bookkeeping sits behind one async mutex, so every operation sees
/// and leaves a consistent state. Loaders never run under it.
#[derive(Debug)]
pub struct CacheStore {
    tiers: Mutex<[TierSlot; 3]>,
    limits: TierLimits,
    default_ttl: Duration,
    metrics: Arc<MetricsCollector>,
    clock: Arc<dyn Clock>,
    sizer: Arc<dyn SizeEstimator>,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a store over the given tier backends.
    pub fn new(
        limits: TierLimits,
        default_ttl: Duration,
        backends: TierBackends,
        metrics: Arc<MetricsCollector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tiers: Mutex::new([
                TierSlot::new(Tier::Fast, limits.fast_max, backends.fast),
                TierSlot::new(Tier::Mid, limits.mid_max, backends.mid),
                TierSlot::new(Tier::Cold, limits.cold_max, backends.cold),
            ]),
            limits,
            default_ttl,
            metrics,
            clock,
            sizer: Arc::new(SerializedSize),
        }
    }

    /// Creates a store whose tiers all live in memory.
    pub fn in_memory(
        limits: TierLimits,
        default_ttl: Duration,
        metrics: Arc<MetricsCollector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(limits, default_ttl, TierBackends::in_memory(), metrics, clock)
    }

    /// Replaces the payload size estimator.
    pub fn with_sizer(mut self, sizer: Arc<dyn SizeEstimator>) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn limits(&self) -> TierLimits {
        self.limits
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidRequest(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }
        Ok(())
    }

    // == Put ==
    /// Stores a value, returning the tier it landed in.
    ///
    /// The value is offered to the tier matching its size class and then to
    /// each slower tier. A tier too small for the item, or whose backend
    /// rejects the write, is skipped. Fitting into a tier may evict that
    /// tier's least recently used entries. `StorageFull` is returned only
    /// when no tier accepts the item.
    pub async fn put(&self, key: &str, value: Payload, opts: PutOptions) -> Result<Tier> {
        Self::validate_key(key)?;
        let size_bytes = match opts.size_bytes {
            Some(size) => size,
            None => self.sizer.size_of(&value)?,
        };

        let start = self.limits.tier_for_size(size_bytes);
        let candidates: Vec<Tier> = Tier::ALL
            .into_iter()
            .filter(|t| *t >= start && size_bytes <= self.limits.capacity(*t))
            .collect();
        if candidates.is_empty() {
            return Err(CacheError::StorageFull {
                key: key.to_string(),
                size_bytes,
            });
        }

        let ttl_ms = opts.ttl.unwrap_or(self.default_ttl).as_millis() as u64;
        let mut entry = CacheEntry::new(
            key.to_string(),
            value,
            size_bytes,
            self.clock.now_ms(),
            ttl_ms,
            opts.metadata,
        );

        let mut tiers = self.tiers.lock().await;

        // Overwrite: the key may live in any tier
        for slot in tiers.iter_mut() {
            if slot.index.contains_key(key) {
                slot.remove(key).await;
            }
        }

        for tier in candidates {
            let slot = &mut tiers[tier.index()];
            slot.make_room(size_bytes, &self.metrics).await;
            entry.tier = tier;
            match slot.backend.set(key, &entry).await {
                Ok(()) => {
                    slot.account(&entry);
                    debug!("Stored '{}' ({} bytes) in {} tier", key, size_bytes, tier);
                    return Ok(tier);
                }
                Err(e) => warn!("{} tier rejected '{}': {}; trying slower tier", tier, key, e),
            }
        }

        Err(CacheError::StorageFull {
            key: key.to_string(),
            size_bytes,
        })
    }

    // == Get ==
    /// Retrieves a value by key, `None` on miss.
    pub async fn get(&self, key: &str) -> Result<Option<Payload>> {
        Ok(self.get_entry(key).await?.map(|entry| entry.value))
    }

    /// Retrieves the full entry as it stands after this read.
    ///
    /// Tiers are checked fast to cold. An expired entry is removed and counts
    /// as a miss. A hit in the mid or cold tier is promoted: the copy is
    /// written to the fast tier first and only then deleted from its source,
    /// so the key is never absent from both.
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = self.clock.now_ms();
        let mut tiers = self.tiers.lock().await;

        let Some(source) = Tier::ALL
            .into_iter()
            .find(|t| tiers[t.index()].index.contains_key(key))
        else {
            self.metrics.record_miss();
            return Ok(None);
        };

        let slot = &mut tiers[source.index()];
        let mut entry = match slot.backend.get(key).await? {
            Some(entry) => entry,
            None => {
                warn!("'{}' indexed in {} tier but missing from backend", key, source);
                slot.forget(key);
                self.metrics.record_miss();
                return Ok(None);
            }
        };

        if entry.is_expired_at(now) {
            slot.remove(key).await;
            self.metrics.record_miss();
            debug!("'{}' expired in {} tier", key, source);
            return Ok(None);
        }

        entry.touch(now);
        self.metrics.record_hit();

        if source != Tier::Fast && entry.size_bytes <= self.limits.fast_max {
            let mut promoted = entry.clone();
            promoted.tier = Tier::Fast;

            let fast = &mut tiers[Tier::Fast.index()];
            fast.make_room(promoted.size_bytes, &self.metrics).await;
            match fast.backend.set(key, &promoted).await {
                Ok(()) => {
                    fast.account(&promoted);
                    tiers[source.index()].remove(key).await;
                    debug!("Promoted '{}' from {} tier", key, source);
                    return Ok(Some(promoted));
                }
                Err(e) => warn!("Promotion of '{}' failed: {}", key, e),
            }
        }

        let slot = &mut tiers[source.index()];
        if let Err(e) = slot.backend.set(key, &entry).await {
            warn!("Failed to record access for '{}': {}", key, e);
        }
        slot.lru.touch(key);
        Ok(Some(entry))
    }

    // == Peek ==
    /// Reads an entry without touching stats, LRU order or tiers.
    pub async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = self.clock.now_ms();
        let tiers = self.tiers.lock().await;
        for slot in tiers.iter() {
            if slot.index.contains_key(key) {
                let entry = slot.backend.get(key).await?;
                return Ok(entry.filter(|e| !e.is_expired_at(now)));
            }
        }
        Ok(None)
    }

    /// True when `key` is resident and not yet expired.
    pub async fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let tiers = self.tiers.lock().await;
        tiers.iter().any(|slot| {
            slot.index
                .get(key)
                .is_some_and(|ix| ix.expires_at > now)
        })
    }

    /// Tier currently holding `key`, expired or not.
    pub async fn tier_of(&self, key: &str) -> Option<Tier> {
        let tiers = self.tiers.lock().await;
        tiers
            .iter()
            .find(|slot| slot.index.contains_key(key))
            .map(|slot| slot.tier)
    }

    // == Delete ==
    /// Removes an entry by key; returns whether it was present.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut tiers = self.tiers.lock().await;
        for slot in tiers.iter_mut() {
            if slot.forget(key) {
                slot.backend.delete(key).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    // == Sweep Expired ==
    /// Removes every entry whose `expires_at <= now` from all tiers.
    ///
    /// A backend that fails to list its expiring entries is reported and
    /// skipped; the remaining tiers are still swept.
    pub async fn sweep_expired(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let mut report = SweepReport::default();
        let mut tiers = self.tiers.lock().await;

        for slot in tiers.iter_mut() {
            match slot.backend.iterate_expiring_before(now).await {
                Ok(expired) => {
                    for entry in expired {
                        slot.remove(&entry.key).await;
                        report.removed += 1;
                    }
                }
                Err(e) => {
                    warn!("Expiry sweep of {} tier failed: {}", slot.tier, e);
                    report.failed_tiers.push(slot.tier);
                }
            }
        }
        report
    }

    // == Reindex ==
    /// Rebuilds tier accounting from what the backends already hold.
    ///
    /// Expired, misplaced and duplicate entries are dropped. Entries are
    /// replayed in last-access order so LRU order survives a restart, and a
    /// tier over its (possibly reduced) capacity is evicted back under it.
    pub async fn reindex(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut tiers = self.tiers.lock().await;
        let mut seen: HashMap<String, Tier> = HashMap::new();
        let mut restored = 0;

        for slot in tiers.iter_mut() {
            slot.clear_index();
            let mut entries = slot.backend.iterate_expiring_before(u64::MAX).await?;
            entries.sort_by_key(|e| (e.last_access_at, e.created_at));

            for entry in entries {
                let stale = entry.is_expired_at(now)
                    || entry.tier != slot.tier
                    || seen.contains_key(&entry.key);
                if stale {
                    if let Err(e) = slot.backend.delete(&entry.key).await {
                        warn!("Failed to drop stale '{}': {}", entry.key, e);
                    }
                    continue;
                }
                seen.insert(entry.key.clone(), slot.tier);
                slot.account(&entry);
                restored += 1;
            }
            let evicted = slot.make_room(0, &self.metrics).await;
            restored -= evicted.len();
        }

        info!("Reindexed {} persisted cache entries", restored);
        Ok(restored)
    }

    // == Clear ==
    /// Empties every tier.
    ///
    /// Every tier is attempted; the first backend failure is returned after
    /// the rest have been cleared.
    pub async fn clear(&self) -> Result<()> {
        let mut tiers = self.tiers.lock().await;
        let mut first_err = None;
        for slot in tiers.iter_mut() {
            if let Err(e) = slot.backend.clear().await {
                warn!("Failed to clear {} tier: {}", slot.tier, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            slot.clear_index();
        }
        first_err.map_or(Ok(()), Err)
    }

    // == Stats ==
    /// Resident bytes and entries per tier.
    pub async fn tier_sizes(&self) -> TierSizes {
        let tiers = self.tiers.lock().await;
        let mut sizes = TierSizes::default();
        for slot in tiers.iter() {
            sizes.set(slot.tier, slot.usage());
        }
        sizes
    }

    /// Returns current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.tier_sizes().await)
    }

    /// Returns the number of entries across all tiers.
    pub async fn len(&self) -> usize {
        self.tiers.lock().await.iter().map(|s| s.index.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
