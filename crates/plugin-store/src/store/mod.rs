//! Client of the remote plugin store.
//!
//! [`StoreClient`] is the one entry point callers use: it owns the transport,
//! the persisted credentials, the update cache and the archive installer.

pub mod credentials;
pub mod signature;
pub mod transport;
pub mod types;
pub mod update_cache;

use crate::config::StoreSettings;
use crate::error::{StoreError, StoreResult};
use crate::installer::hooks::{HookEvent, HookRegistry};
use crate::installer::migration::SqlImporter;
use crate::installer::types::{PluginType, ProgressReporter};
use crate::installer::ArchiveInstaller;
use crate::registry::{InstallStatus, PluginRegistry};
use credentials::{CredentialStore, StoreCredentials};
use serde_json::Value;
use signature::Payload;
use std::path::Path;
use std::sync::{Arc, RwLock};
use transport::{SharedCredentials, StoreTransport};
use types::{
    value_to_string, CatalogPage, Captcha, PluginDraft, PluginFilter, RemotePluginPage,
    SessionToken,
};
use update_cache::{UpdateCache, UpdateMap};

pub struct StoreClient {
    settings: Arc<StoreSettings>,
    credential_store: CredentialStore,
    credentials: SharedCredentials,
    transport: Arc<StoreTransport>,
    installer: ArchiveInstaller,
    registry: PluginRegistry,
    updates: UpdateCache,
}

impl StoreClient {
    pub async fn new(
        settings: StoreSettings,
        hooks: Arc<HookRegistry>,
        importer: Option<Arc<dyn SqlImporter>>,
    ) -> StoreResult<Self> {
        let settings = Arc::new(settings);
        let credential_store = CredentialStore::new(settings.credentials_path());
        let loaded = credential_store.load().await.unwrap_or_else(|e| {
            log::warn!(
                "Ignoring unreadable credentials {:?}: {}",
                credential_store.path(),
                e
            );
            StoreCredentials::default()
        });
        let credentials: SharedCredentials = Arc::new(RwLock::new(loaded));

        let transport = Arc::new(StoreTransport::new(settings.clone(), credentials.clone())?);
        let mut installer = ArchiveInstaller::new(&settings, transport.clone(), hooks);
        if let Some(importer) = importer {
            installer = installer.with_sql_importer(importer);
        }

        Ok(Self {
            registry: PluginRegistry::new(settings.root_dir.clone()),
            updates: UpdateCache::new(settings.update_cache_path(), settings.update_cache_ttl),
            settings,
            credential_store,
            credentials,
            transport,
            installer,
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn installer(&self) -> &ArchiveInstaller {
        &self.installer
    }

    /// Snapshot of the credentials currently in use.
    pub fn credentials(&self) -> StoreCredentials {
        self.transport.credentials()
    }

    pub fn ensure_authenticated(&self) -> StoreResult<()> {
        self.credentials().require_authenticated().map(|_| ())
    }

    // ---------------------------------------------------------------------
    // Auth
    // ---------------------------------------------------------------------

    /// Fetch a captcha for `kind` (e.g. "register"). The returned session must be
    /// passed to [`StoreClient::register`].
    pub async fn captcha(&self, kind: &str) -> StoreResult<Captcha> {
        let (image, session) = self
            .transport
            .call_unsigned("/auth/captcha", Payload::new().with("type", kind), None)
            .await?;
        Ok(Captcha {
            image,
            session: session.unwrap_or_else(|| SessionToken(String::new())),
        })
    }

    /// Create an account. Returns the saved credentials and the session to use
    /// for the next captcha-bound call; the store may rotate it here.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        captcha: &str,
        session: &SessionToken,
    ) -> StoreResult<(StoreCredentials, SessionToken)> {
        let payload = Payload::new()
            .with("username", username)
            .with("password", password)
            .with("captcha", captcha);
        let (data, refreshed) = self
            .transport
            .call_unsigned("/auth/register", payload, Some(session))
            .await?;
        let (app_id, app_key) = app_credentials(&data)?;
        log::info!("Registered store account {}", username);
        let creds = self
            .persist(|creds| {
                creds.app_id = app_id;
                creds.app_key = app_key;
            })
            .await?;
        Ok((creds, refreshed.unwrap_or_else(|| session.clone())))
    }

    pub async fn login(&self, username: &str, password: &str) -> StoreResult<StoreCredentials> {
        let payload = Payload::new()
            .with("username", username)
            .with("password", password);
        let (data, _) = self
            .transport
            .call_unsigned("/auth/login", payload, None)
            .await?;
        let (app_id, app_key) = app_credentials(&data)?;
        log::info!("Logged in to the plugin store as {}", username);
        self.persist(|creds| {
            creds.app_id = app_id;
            creds.app_key = app_key;
        })
        .await
    }

    /// Switch the store route used by every later call.
    pub async fn set_server(&self, server: u32) -> StoreResult<StoreCredentials> {
        if server as usize >= self.settings.servers.len() {
            log::warn!(
                "Store route {} is out of range ({} configured)",
                server,
                self.settings.servers.len()
            );
        }
        self.persist(|creds| creds.server = server).await
    }

    /// Apply `update` to the credentials on disk, write them back and adopt the
    /// fresh snapshot.
    async fn persist(
        &self,
        update: impl FnOnce(&mut StoreCredentials),
    ) -> StoreResult<StoreCredentials> {
        let mut next = self.credential_store.load().await.unwrap_or_else(|e| {
            log::warn!("Rewriting unreadable credentials file: {}", e);
            self.credentials()
        });
        update(&mut next);
        let fresh = self.credential_store.save(&next).await?;

        let mut guard = match self.credentials.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = fresh.clone();
        Ok(fresh)
    }

    // ---------------------------------------------------------------------
    // Catalog & licensing
    // ---------------------------------------------------------------------

    /// Catalog page with the local install status of every row.
    pub async fn plugins(&self, filter: &PluginFilter) -> StoreResult<CatalogPage> {
        let page = self.fetch_page(filter).await?;
        Ok(CatalogPage::decorate(page, &self.registry))
    }

    async fn fetch_page(&self, filter: &PluginFilter) -> StoreResult<RemotePluginPage> {
        let mut payload = Payload::new()
            .with("type", filter.wire_type())
            .with("page", filter.page)
            .with("limit", filter.limit)
            .with("group", filter.group);
        if let Some(keywords) = filter.keywords.as_deref().filter(|k| !k.is_empty()) {
            payload.insert("keywords", keywords);
        }

        let data = self.transport.call_signed("/store/plugins", payload).await?;
        serde_json::from_value(data)
            .map_err(|e| StoreError::InvalidResponse(format!("plugin list: {}", e)))
    }

    pub async fn purchase(
        &self,
        plugin_type: PluginType,
        plugin_id: i64,
        pay_type: i64,
    ) -> StoreResult<Value> {
        let payload = Payload::new()
            .with("type", plugin_type.as_i64())
            .with("plugin_id", plugin_id)
            .with("payType", pay_type);
        self.transport.call_signed("/store/purchase", payload).await
    }

    pub async fn purchase_records(&self, plugin_id: i64) -> StoreResult<Value> {
        self.transport
            .call_signed("/store/records", Payload::new().with("plugin_id", plugin_id))
            .await
    }

    pub async fn unbind(&self, auth_id: i64) -> StoreResult<Value> {
        self.transport
            .call_signed("/store/unbind", Payload::new().with("auth_id", auth_id))
            .await
    }

    pub async fn bind_level(&self, auth_id: i64) -> StoreResult<Value> {
        self.transport
            .call_signed("/store/bindLevel", Payload::new().with("auth_id", auth_id))
            .await
    }

    pub async fn levels(&self) -> StoreResult<Value> {
        self.transport.call_signed("/store/levels", Payload::new()).await
    }

    // ---------------------------------------------------------------------
    // Developer
    // ---------------------------------------------------------------------

    pub async fn create_plugin(&self, draft: &PluginDraft) -> StoreResult<Value> {
        self.transport
            .call_signed("/developer/create", draft_payload(draft))
            .await
    }

    pub async fn update_plugin(&self, plugin_id: i64, draft: &PluginDraft) -> StoreResult<Value> {
        let payload = draft_payload(draft).with("plugin_id", plugin_id);
        self.transport.call_signed("/developer/update", payload).await
    }

    pub async fn delete_plugin(&self, plugin_id: i64) -> StoreResult<Value> {
        self.transport
            .call_signed("/developer/delete", Payload::new().with("plugin_id", plugin_id))
            .await
    }

    pub async fn set_price(&self, plugin_id: i64, price: &str) -> StoreResult<Value> {
        let payload = Payload::new()
            .with("plugin_id", plugin_id)
            .with("price", price);
        self.transport.call_signed("/developer/price", payload).await
    }

    /// Upload a packaged plugin archive.
    pub async fn upload(&self, file: &Path) -> StoreResult<Value> {
        self.transport.upload("/open/project/upload", file).await
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub fn install_status(&self, key: &str, plugin_type: PluginType) -> InstallStatus {
        self.registry.is_installed(key, plugin_type)
    }

    pub async fn install(
        &self,
        key: &str,
        plugin_type: PluginType,
        plugin_id: i64,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<()> {
        self.ensure_authenticated()?;
        self.installer
            .install(key, plugin_type, plugin_id, reporter)
            .await
    }

    pub async fn update(
        &self,
        key: &str,
        plugin_type: PluginType,
        plugin_id: i64,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<()> {
        self.ensure_authenticated()?;
        self.installer
            .update(key, plugin_type, plugin_id, reporter)
            .await
    }

    /// Remove a plugin. Generic plugins get their UNINSTALL hook while their files
    /// are still present. Returns false when nothing was installed.
    pub async fn uninstall(&self, key: &str, plugin_type: PluginType) -> StoreResult<bool> {
        let installer = &self.installer;
        installer
            .uninstall_with(key, plugin_type, |target| {
                if plugin_type.has_hooks() {
                    installer.fire_hook(HookEvent::Uninstall, target)?;
                }
                Ok(())
            })
            .await
    }

    // ---------------------------------------------------------------------
    // Update cache
    // ---------------------------------------------------------------------

    /// Refresh the update cache from the store unless it was written within the
    /// TTL, in which case `CacheFresh` is returned and nothing is fetched.
    pub async fn get_updates(&self) -> StoreResult<UpdateMap> {
        if self.updates.is_fresh().await {
            log::debug!("Update cache is fresh, skipping store query");
            return Err(StoreError::CacheFresh);
        }

        let filter = PluginFilter {
            plugin_type: None,
            keywords: None,
            page: 1,
            limit: self.settings.update_fetch_limit,
            group: 0,
        };
        let page = self.fetch_page(&filter).await?;
        let merged = UpdateCache::merge(self.updates.load().await, &page.rows);
        self.updates.save(&merged).await?;
        log::info!("Update cache refreshed with {} plugins", page.rows.len());
        Ok(merged)
    }

    pub async fn clear_updates(&self) -> StoreResult<()> {
        self.updates.clear().await
    }

    pub async fn cached_updates(&self) -> UpdateMap {
        self.updates.load().await
    }
}

/// `{id, key}` of a register/login answer.
fn app_credentials(data: &Value) -> StoreResult<(String, String)> {
    let field = |name: &str| {
        data.get(name).and_then(value_to_string).ok_or_else(|| {
            StoreError::InvalidResponse(format!("auth response without `{}`", name))
        })
    };
    Ok((field("id")?, field("key")?))
}

fn draft_payload(draft: &PluginDraft) -> Payload {
    let mut payload = Payload::new()
        .with("plugin_key", &draft.plugin_key)
        .with("plugin_name", &draft.name)
        .with("version", &draft.version)
        .with("description", &draft.description)
        .with("update_content", &draft.update_content);
    if let Some(plugin_type) = draft.plugin_type {
        payload.insert("type", plugin_type.as_i64());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_answer_accepts_numeric_ids() {
        let (id, key) = app_credentials(&json!({"id": 42, "key": "secret"})).unwrap();
        assert_eq!(id, "42");
        assert_eq!(key, "secret");
    }

    #[test]
    fn auth_answer_without_key_is_invalid() {
        assert!(matches!(
            app_credentials(&json!({"id": 42})),
            Err(StoreError::InvalidResponse(_))
        ));
    }

    #[test]
    fn draft_payload_skips_missing_type() {
        let draft = PluginDraft {
            plugin_key: "Demo".to_string(),
            name: "Demo".to_string(),
            ..Default::default()
        };
        let payload = draft_payload(&draft);
        assert_eq!(payload.get("plugin_key"), Some("Demo"));
        assert_eq!(payload.get("type"), None);

        let typed = draft_payload(&PluginDraft {
            plugin_type: Some(PluginType::Theme),
            ..draft
        });
        assert_eq!(typed.get("type"), Some("2"));
    }
}
