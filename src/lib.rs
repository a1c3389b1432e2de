//! Tiered Cache - a predictive multi-tier content cache
//!
//! Fast/Mid/Cold tiers with TTL expiration, per-tier LRU eviction and
//! promotion, deduplicated loading, and prefetching driven by learned
//! access patterns.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod prediction;
pub mod prefetch;
pub mod service;
pub mod storage;
pub mod tasks;

pub use api::{create_router, AppState, ContentDirLoader};
pub use cache::{CacheStats, CacheStore, Payload, PutOptions, Tier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordinator::{loader_fn, LoadCoordinator, LoadSource, Loader};
pub use error::{CacheError, Result};
pub use prediction::{Context, Prediction, PredictionReason};
pub use prefetch::{InteractionEventSource, InteractionHub, PrefetchOptions};
pub use service::{CacheService, ServiceParts};
