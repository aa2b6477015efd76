//! Local cache of store update metadata (`runtime/plugin/store.cache`).

use crate::error::StoreResult;
use crate::store::credentials::write_atomic;
use crate::store::types::{PluginDescriptor, UpdateSummary};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

pub type UpdateMap = BTreeMap<String, UpdateSummary>;

#[derive(Debug, Clone)]
pub struct UpdateCache {
    path: PathBuf,
    ttl: Duration,
}

impl UpdateCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True while the file was last written less than `ttl` ago.
    pub async fn is_fresh(&self) -> bool {
        let modified = match fs::metadata(&self.path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        // mtime in the future counts as just written
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        age < self.ttl
    }

    /// Current contents. A missing or unreadable file is an empty cache.
    pub async fn load(&self) -> UpdateMap {
        let data = match fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(_) => return UpdateMap::new(),
        };
        if data.trim().is_empty() {
            return UpdateMap::new();
        }
        match serde_json::from_str(&data) {
            Ok(map) => map,
            Err(e) => {
                log::warn!("Ignoring corrupt update cache {:?}: {}", self.path, e);
                UpdateMap::new()
            }
        }
    }

    /// Overlay `plugins` on the cached entries. Entries for plugins the store no
    /// longer lists are kept.
    pub fn merge(mut cache: UpdateMap, plugins: &[PluginDescriptor]) -> UpdateMap {
        for plugin in plugins {
            cache.insert(plugin.plugin_key.clone(), UpdateSummary::from(plugin));
        }
        cache
    }

    pub async fn save(&self, cache: &UpdateMap) -> StoreResult<()> {
        let json = serde_json::to_vec(cache)?;
        write_atomic(&self.path, json).await?;
        log::debug!("Wrote {} update entries to {:?}", cache.len(), self.path);
        Ok(())
    }

    /// Delete the cache file so the next refresh hits the store.
    pub async fn clear(&self) -> StoreResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
