//! In-memory tier backend.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::PersistentStore;
use crate::cache::CacheEntry;
use crate::error::Result;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// (expires_at, key) for ordered expiry scans
    expiry: BTreeSet<(u64, String)>,
}

/// HashMap-backed store with an expiry index.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.inner.read().await.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(old) = inner.entries.insert(key.to_string(), entry.clone()) {
            inner.expiry.remove(&(old.expires_at, key.to_string()));
        }
        inner.expiry.insert((entry.expires_at, key.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.entries.remove(key) {
            Some(old) => {
                inner.expiry.remove(&(old.expires_at, key.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.expiry.clear();
        Ok(())
    }

    async fn iterate_expiring_before(&self, time_ms: u64) -> Result<Vec<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .expiry
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= time_ms)
            .filter_map(|(_, key)| inner.entries.get(key).cloned())
            .collect())
    }
}
