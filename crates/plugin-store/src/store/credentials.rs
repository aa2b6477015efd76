//! Store credentials persisted in `config/store.json`.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCredentials {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_key: String,
    /// Index of the store route to use
    #[serde(default)]
    pub server: u32,
}

impl StoreCredentials {
    pub fn is_authenticated(&self) -> bool {
        !self.app_id.trim().is_empty() && !self.app_key.trim().is_empty()
    }

    pub fn require_authenticated(&self) -> StoreResult<&Self> {
        if self.is_authenticated() {
            Ok(self)
        } else {
            Err(StoreError::NotAuthenticated)
        }
    }
}

/// Reads and rewrites the credentials file. Writes replace the file atomically and
/// hand back what is now on disk.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means "not logged in".
    pub async fn load(&self) -> StoreResult<StoreCredentials> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreCredentials::default())
            }
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(StoreCredentials::default());
        }
        Ok(serde_json::from_str(&data)?)
    }

    pub async fn save(&self, credentials: &StoreCredentials) -> StoreResult<StoreCredentials> {
        let json = serde_json::to_string_pretty(credentials)?;
        write_atomic(&self.path, json.into_bytes()).await?;
        log::debug!("Saved store credentials to {:?}", self.path);
        self.load().await
    }
}

/// Write to a temp file next to `path` and rename it into place.
pub(crate) async fn write_atomic(path: &Path, contents: Vec<u8>) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &contents))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

fn write_atomic_blocking(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
