//! Store settings and the constants they default to.
//! Settings are built once by the caller and handed to the client; nothing here is global.

use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Upper bound for every remote call, downloads included.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Update metadata is not refetched while the cache file is younger than this.
pub const UPDATE_CACHE_TTL_SECS: u64 = 120;

/// Page size used when refreshing the update cache.
pub const UPDATE_FETCH_LIMIT: u32 = 1000;

pub const CREDENTIALS_FILE: &str = "config/store.json";
pub const UPDATE_CACHE_FILE: &str = "runtime/plugin/store.cache";
pub const STAGING_DIR: &str = "runtime/plugin/staging";

/// Placeholder replaced by the table prefix in plugin SQL files.
pub const TABLE_PREFIX_PLACEHOLDER: &str = "__PREFIX__";

/// Database the SQL migrations of plugins are applied to.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Diesel SQLite connection URL
    pub url: String,

    /// Substituted for `__PREFIX__` in `install.sql` / `update.sql`
    pub table_prefix: String,

    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn new(url: impl Into<String>, table_prefix: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            table_prefix: table_prefix.into(),
            max_connections: 4,
        }
    }
}

/// Runtime configuration of the store client and installer
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Site root; plugin trees, config and runtime files live below it
    pub root_dir: PathBuf,

    /// Store routes; the credentials' `server` index picks one
    pub servers: Vec<Url>,

    pub request_timeout: Duration,

    pub update_cache_ttl: Duration,

    pub update_fetch_limit: u32,

    pub database: Option<DatabaseSettings>,
}

impl StoreSettings {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            servers: Vec::new(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            update_cache_ttl: Duration::from_secs(UPDATE_CACHE_TTL_SECS),
            update_fetch_limit: UPDATE_FETCH_LIMIT,
            database: None,
        }
    }

    pub fn with_servers(mut self, servers: Vec<Url>) -> Self {
        self.servers = servers;
        self
    }

    pub fn with_database(mut self, database: DatabaseSettings) -> Self {
        self.database = Some(database);
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.root_dir.join(CREDENTIALS_FILE)
    }

    pub fn update_cache_path(&self) -> PathBuf {
        self.root_dir.join(UPDATE_CACHE_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root_dir.join(STAGING_DIR)
    }

    /// Base URL for the given route index; out-of-range indexes fall back to the first route.
    pub fn server_url(&self, index: u32) -> Option<&Url> {
        match self.servers.get(index as usize) {
            Some(url) => Some(url),
            None => {
                if index != 0 {
                    log::warn!("Store route {} is not configured, using the first route", index);
                }
                self.servers.first()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_resolved_under_root() {
        let settings = StoreSettings::new("/srv/site");
        assert_eq!(
            settings.credentials_path(),
            PathBuf::from("/srv/site/config/store.json")
        );
        assert_eq!(
            settings.update_cache_path(),
            PathBuf::from("/srv/site/runtime/plugin/store.cache")
        );
        assert_eq!(
            settings.staging_dir(),
            PathBuf::from("/srv/site/runtime/plugin/staging")
        );
    }

    #[test]
    fn unknown_route_falls_back_to_first() {
        let first = Url::parse("http://one.test/").unwrap();
        let second = Url::parse("http://two.test/").unwrap();
        let settings =
            StoreSettings::new("/tmp").with_servers(vec![first.clone(), second.clone()]);
        assert_eq!(settings.server_url(1), Some(&second));
        assert_eq!(settings.server_url(7), Some(&first));
    }
}
