//! Cache Module
//!
//! Provides tiered storage with TTL expiration, per-tier LRU eviction and
//! slow-tier promotion.

mod entry;
mod lru;
mod sizing;
mod stats;
mod store;


// Re-export public types
pub use entry::{CacheEntry, Metadata, Payload, Tier};
pub use lru::LruTracker;
pub use sizing::{SerializedSize, SizeEstimator};
pub use stats::{hit_rate, CacheStats, MetricsCollector, PrefetchOutcome, TierSizes, TierUsage};
pub use store::{CacheStore, PutOptions, SweepReport, TierBackends, TierLimits};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
