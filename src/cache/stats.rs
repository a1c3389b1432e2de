//! Cache Statistics Module
//!
//! Tracks cache performance metrics: hits, misses, prefetches, evictions and
//! a running mean of load latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use super::entry::Tier;

// == Prefetch Outcome ==
/// How a single speculative load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchOutcome {
    /// Key was already resident when the prefetch ran
    AlreadyCached,
    /// Loader ran (or an in-flight load was joined) and the value is now cached
    Loaded,
    /// Loader returned an error
    Failed,
    /// Loader exceeded the load timeout
    TimedOut,
}

// == Tier Usage ==
/// Resident size of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    /// Bytes currently accounted to the tier
    pub bytes: usize,
    /// Number of entries in the tier
    pub entries: usize,
    /// Configured capacity in bytes
    pub capacity: usize,
}

/// Resident sizes for all tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierSizes {
    pub fast: TierUsage,
    pub mid: TierUsage,
    pub cold: TierUsage,
}

impl TierSizes {
    /// Usage for a single tier.
    pub fn get(&self, tier: Tier) -> TierUsage {
        match tier {
            Tier::Fast => self.fast,
            Tier::Mid => self.mid,
            Tier::Cold => self.cold,
        }
    }

    pub(crate) fn set(&mut self, tier: Tier, usage: TierUsage) {
        match tier {
            Tier::Fast => self.fast = usage,
            Tier::Mid => self.mid = usage,
            Tier::Cold => self.cold = usage,
        }
    }

    /// Total entries across all tiers.
    pub fn total_entries(&self) -> usize {
        self.fast.entries + self.mid.entries + self.cold.entries
    }
}

// == Cache Stats ==
/// Point-in-time snapshot of cache performance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (absent or expired)
    pub misses: u64,
    /// Number of speculative loads that stored a value
    pub prefetches: u64,
    /// Number of entries evicted due to capacity pressure
    pub evictions: u64,
    /// Prefetches that found the key already cached
    pub prefetch_hits: u64,
    /// Prefetches whose loader failed
    pub prefetch_failures: u64,
    /// Prefetches whose loader timed out
    pub prefetch_timeouts: u64,
    /// Running mean of successful load durations
    pub average_load_time_ms: f64,
    /// hits / (hits + misses), 0 when no lookups happened yet
    pub hit_rate: f64,
    /// Per-tier resident size
    pub tier_sizes: TierSizes,
}

impl CacheStats {
    /// Total entries across all tiers.
    pub fn total_entries(&self) -> usize {
        self.tier_sizes.total_entries()
    }
}

// == Hit Rate ==
/// Returns hits / (hits + misses), or 0.0 if no requests have been made.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Incremental mean, updated one sample at a time.
#[derive(Debug, Default, Clone, Copy)]
struct RunningMean {
    count: u64,
    mean: f64,
}

impl RunningMean {
    fn push(&mut self, sample: f64) {
        self.count += 1;
        self.mean += (sample - self.mean) / self.count as f64;
    }
}

// == Metrics Collector ==
/// Process-wide counters shared by the store, coordinator and scheduler.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    prefetches: AtomicU64,
    evictions: AtomicU64,
    prefetch_hits: AtomicU64,
    prefetch_failures: AtomicU64,
    prefetch_timeouts: AtomicU64,
    load_time: Mutex<RunningMean>,
}

impl MetricsCollector {
    // == Constructor ==
    /// Creates a collector with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds one load duration into the running mean.
    pub fn record_load_time(&self, millis: f64) {
        self.load_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(millis);
    }

    /// Counts a finished prefetch by outcome.
    pub fn record_prefetch(&self, outcome: PrefetchOutcome) {
        let counter = match outcome {
            PrefetchOutcome::AlreadyCached => &self.prefetch_hits,
            PrefetchOutcome::Loaded => &self.prefetches,
            PrefetchOutcome::Failed => &self.prefetch_failures,
            PrefetchOutcome::TimedOut => &self.prefetch_timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn prefetches(&self) -> u64 {
        self.prefetches.load(Ordering::Relaxed)
    }

    pub fn average_load_time_ms(&self) -> f64 {
        self.load_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mean
    }

    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits(), self.misses())
    }

    /// Builds a stats snapshot; tier sizes are filled in by the store.
    pub fn snapshot(&self, tier_sizes: TierSizes) -> CacheStats {
        let hits = self.hits();
        let misses = self.misses();
        CacheStats {
            hits,
            misses,
            prefetches: self.prefetches(),
            evictions: self.evictions(),
            prefetch_hits: self.prefetch_hits.load(Ordering::Relaxed),
            prefetch_failures: self.prefetch_failures.load(Ordering::Relaxed),
            prefetch_timeouts: self.prefetch_timeouts.load(Ordering::Relaxed),
            average_load_time_ms: self.average_load_time_ms(),
            hit_rate: hit_rate(hits, misses),
            tier_sizes,
        }
    }

    /// Zeroes every counter and the running mean.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.prefetches,
            &self.evictions,
            &self.prefetch_hits,
            &self.prefetch_failures,
            &self.prefetch_timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.load_time.lock().unwrap_or_else(PoisonError::into_inner) = RunningMean::default();
    }
}
