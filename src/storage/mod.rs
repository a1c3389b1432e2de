//! Storage Module
//!
//! Pluggable backends behind the cache tiers and the access-pattern model.
//!
//! # Backends
//! - `MemoryStore`: in-process map, used for the fast tier and in tests
//! - `FileStore`: one JSON document per entry in a directory
//! - `MemoryModelStore` / `FileModelStore`: access-pattern snapshot persistence

mod file;
mod memory;
mod model;

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::error::Result;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use model::{FileModelStore, MemoryModelStore, ModelStore};

// == Persistent Store ==
/// Key/value backend holding the entries of one tier.
///
/// Implementations only store what they are given; capacity, expiry and
/// eviction decisions belong to `CacheStore`.
#[async_trait]
pub trait PersistentStore: Send + Sync + std::fmt::Debug {
    /// Fetches the entry stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Stores `entry` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()>;

    /// Removes `key`; returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;

    /// Entries whose `expires_at <= time_ms`, soonest first.
    ///
    /// `u64::MAX` lists the whole store.
    async fn iterate_expiring_before(&self, time_ms: u64) -> Result<Vec<CacheEntry>>;
}
