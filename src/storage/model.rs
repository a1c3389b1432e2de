//! Persistence for the access-pattern model.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::prediction::PatternSnapshot;

/// Backend holding the latest serialized pattern model.
#[async_trait]
pub trait ModelStore: Send + Sync + std::fmt::Debug {
    /// Returns the last saved snapshot, if any.
    async fn load(&self) -> Result<Option<PatternSnapshot>>;

    /// Replaces the saved snapshot.
    async fn save(&self, snapshot: &PatternSnapshot) -> Result<()>;
}

// == Memory Model Store ==
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    snapshot: RwLock<Option<PatternSnapshot>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for MemoryModelStore {
    async fn load(&self) -> Result<Option<PatternSnapshot>> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &PatternSnapshot) -> Result<()> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }
}

// == File Model Store ==
/// Keeps the model as a single JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn load(&self) -> Result<Option<PatternSnapshot>> {
        match fs::read(&self.path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, snapshot: &PatternSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let encoded = serde_json::to_vec(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
