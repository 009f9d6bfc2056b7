//! Width caches.
//!
//! [`JsonFileCache`] keeps a flat `{"code": width_mm}` object on disk so
//! lookups survive restarts:
//!
//! ```json
//! {
//!   "6972842743596": 30,
//!   "6975746631397": 12
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::WidthCache;
use crate::error::WidthError;

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    widths: RwLock<HashMap<String, u32>>,
}

#[async_trait]
impl WidthCache for MemoryCache {
    async fn get(&self, code: &str) -> Option<u32> {
        self.widths.read().await.get(code).copied()
    }

    async fn put(&self, code: &str, width_mm: u32) -> Result<(), WidthError> {
        self.widths.write().await.insert(code.to_string(), width_mm);
        Ok(())
    }
}

/// # JSON File Cache
///
/// Loaded once on open; every `put` rewrites the file through a temporary
/// sibling and a rename, so a crash never leaves a half-written cache.
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    widths: RwLock<HashMap<String, u32>>,
}

impl JsonFileCache {
    /// Open the cache at `path`. A missing file is an empty cache.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WidthError> {
        let path = path.as_ref().to_path_buf();
        let widths = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                WidthError::Cache(format!("invalid cache file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(WidthError::Cache(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        debug!(path = %path.display(), entries = widths.len(), "opened width cache");

        Ok(Self {
            path,
            widths: RwLock::new(widths),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, widths: &HashMap<String, u32>) -> Result<(), WidthError> {
        let json = serde_json::to_vec_pretty(widths)
            .map_err(|e| WidthError::Cache(format!("failed to serialize cache: {}", e)))?;

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| WidthError::Cache(format!("{}: {}", dir.display(), e)))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| WidthError::Cache(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| WidthError::Cache(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl WidthCache for JsonFileCache {
    async fn get(&self, code: &str) -> Option<u32> {
        self.widths.read().await.get(code).copied()
    }

    async fn put(&self, code: &str, width_mm: u32) -> Result<(), WidthError> {
        let mut widths = self.widths.write().await;
        widths.insert(code.to_string(), width_mm);
        self.persist(&widths).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
