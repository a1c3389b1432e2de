//! Content-directory origin used by the server's load endpoint.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::cache::Payload;
use crate::coordinator::Loader;

/// Loads `key` from the file `<root>/<key>`.
///
/// `.json` files become JSON payloads, other UTF-8 files text, anything
/// else raw bytes.
#[derive(Debug, Clone)]
pub struct ContentDirLoader {
    root: PathBuf,
}

impl ContentDirLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            bail!("key '{}' does not name a file under the content root", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Loader for ContentDirLoader {
    async fn load(&self, key: &str) -> anyhow::Result<Payload> {
        let path = self.resolve(key)?;
        debug!("Loading '{}' from {}", key, path.display());
        let raw = fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            let doc = serde_json::from_slice(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            return Ok(Payload::Json(doc));
        }
        Ok(match String::from_utf8(raw) {
            Ok(text) => Payload::Text(text),
            Err(e) => Payload::Bytes(e.into_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loads_by_file_kind() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("doc.json"), r#"{"pages": 2}"#).unwrap();
        std::fs::write(dir.path().join("thumb.bin"), [0xff, 0xfe, 0x00]).unwrap();
        let loader = ContentDirLoader::new(dir.path());

        assert_eq!(loader.load("notes.txt").await.unwrap(), Payload::from("hello"));
        assert_eq!(
            loader.load("doc.json").await.unwrap(),
            Payload::Json(serde_json::json!({"pages": 2}))
        );
        assert_eq!(
            loader.load("thumb.bin").await.unwrap(),
            Payload::Bytes(vec![0xff, 0xfe, 0x00])
        );
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ContentDirLoader::new(dir.path());

        assert!(loader.load("../secret").await.is_err());
        assert!(loader.load("/etc/passwd").await.is_err());
        assert!(loader.load("missing.txt").await.is_err());
    }
}
