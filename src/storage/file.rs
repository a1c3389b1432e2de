//! Directory-backed tier backend.
//!
//! Each entry is a JSON document named after the SHA-256 digest of its key,
//! so file names stay fixed-length whatever the key.
//! The expiry index lives in memory and is rebuilt from disk on open.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::PersistentStore;
use crate::cache::CacheEntry;
use crate::error::Result;

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Default)]
struct Index {
    expires: HashMap<String, u64>,
    expiry: BTreeSet<(u64, String)>,
}

impl Index {
    fn insert(&mut self, key: &str, expires_at: u64) {
        if let Some(old) = self.expires.insert(key.to_string(), expires_at) {
            self.expiry.remove(&(old, key.to_string()));
        }
        self.expiry.insert((expires_at, key.to_string()));
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.expires.remove(key) {
            Some(old) => {
                self.expiry.remove(&(old, key.to_string()));
                true
            }
            None => false,
        }
    }
}

/// Stores entries as files under a single directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    index: Mutex<Index>,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir` and indexes the
    /// entries already on disk. Unreadable files are skipped.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let mut index = Index::default();
        let mut listing = fs::read_dir(&dir).await?;
        while let Some(item) = listing.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match read_entry(&path).await {
                Ok(entry) => index.insert(&entry.key, entry.expires_at),
                Err(e) => warn!("Skipping unreadable cache file {}: {}", path.display(), e),
            }
        }
        debug!("Opened file store at {} with {} entries", dir.display(), index.expires.len());

        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", digest_key(key), ENTRY_EXTENSION))
    }
}

fn digest_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn read_entry(path: &Path) -> Result<CacheEntry> {
    let raw = fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        if !self.index.lock().await.expires.contains_key(key) {
            return Ok(None);
        }
        match read_entry(&self.path_for(key)).await {
            Ok(entry) if entry.key == key => Ok(Some(entry)),
            Ok(entry) => {
                warn!("Cache file for '{}' holds '{}', treating as a miss", key, entry.key);
                Ok(None)
            }
            Err(e) => {
                warn!("Dropping unreadable cache file for '{}': {}", key, e);
                self.index.lock().await.remove(key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let encoded = serde_json::to_vec(entry)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, encoded).await?;
        fs::rename(&tmp, &path).await?;
        self.index.lock().await.insert(key, entry.expires_at);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.index.lock().await.remove(key);
        if existed {
            match fs::remove_file(self.path_for(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }

    async fn clear(&self) -> Result<()> {
        let mut index = self.index.lock().await;
        let keys: Vec<String> = index.expires.keys().cloned().collect();
        for key in keys {
            match fs::remove_file(self.path_for(&key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            index.remove(&key);
        }
        Ok(())
    }

    async fn iterate_expiring_before(&self, time_ms: u64) -> Result<Vec<CacheEntry>> {
        let keys: Vec<String> = {
            let index = self.index.lock().await;
            index
                .expiry
                .iter()
                .take_while(|(expires_at, _)| *expires_at <= time_ms)
                .map(|(_, key)| key.clone())
                .collect()
        };

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            entries.push(read_entry(&self.path_for(&key)).await?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Metadata, Payload, Tier, MAX_KEY_LENGTH};

    fn entry(key: &str, expires_in: u64) -> CacheEntry {
        let mut e = CacheEntry::new(
            key.to_string(),
            Payload::Bytes(vec![1, 2, 3]),
            3,
            0,
            expires_in,
            Metadata::new(),
        );
        e.tier = Tier::Mid;
        e
    }

    #[tokio::test]
    async fn test_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.set("course/42", &entry("course/42", 100)).await.unwrap();
        let back = store.get("course/42").await.unwrap().unwrap();
        assert_eq!(back, entry("course/42", 100));
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.set("a", &entry("a", 100)).await.unwrap();
            store.set("b", &entry("b", 200)).await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        let expiring = store.iterate_expiring_before(150).await.unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].key, "a");
        assert_eq!(store.iterate_expiring_before(u64::MAX).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.set("a", &entry("a", 100)).await.unwrap();
        store.set("b", &entry("b", 100)).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());

        store.clear().await.unwrap();
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.iterate_expiring_before(u64::MAX).await.unwrap().is_empty());
    }

    #[test]
    fn test_digest_key_is_fixed_length_and_path_safe() {
        let short = digest_key("a/b");
        let long = digest_key(&"k".repeat(MAX_KEY_LENGTH));
        assert_eq!(short.len(), 64);
        assert_eq!(long.len(), 64);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_longest_valid_key_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let key = "k".repeat(MAX_KEY_LENGTH);

        store.set(&key, &entry(&key, 100)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(entry(&key, 100)));

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(&key).await.unwrap(), Some(entry(&key, 100)));
    }

    #[tokio::test]
    async fn test_mismatched_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.set("a", &entry("a", 100)).await.unwrap();

        let raw = serde_json::to_vec(&entry("b", 100)).unwrap();
        std::fs::write(store.path_for("a"), raw).unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }
}
