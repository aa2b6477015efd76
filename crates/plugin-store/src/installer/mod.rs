pub mod extract;
pub mod hooks;
pub mod locks;
pub mod migration;
pub mod traits;
pub mod types;


use crate::config::StoreSettings;
use crate::error::{StoreError, StoreResult};
use extract::{extract_zip_file, has_entries};
use hooks::{HookContext, HookEvent, HookRegistry};
use locks::InstallLocks;
use migration::{SqlImporter, INSTALL_SQL, UPDATE_SQL};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use traits::{ArchiveChannel, ArchiveSource};
use types::{InstallTarget, PluginType, ProgressReporter};

/// Materializes store archives into the local plugin tree.
///
/// Steps commit one after another (download, extract, migrate, hook); a failure
/// part way leaves the earlier steps in place. Calls on the same plugin key are
/// serialized, a second concurrent call fails with `InstallInProgress`.
pub struct ArchiveInstaller {
    root: PathBuf,
    staging_dir: PathBuf,
    source: Arc<dyn ArchiveSource>,
    hooks: Arc<HookRegistry>,
    importer: Option<Arc<dyn SqlImporter>>,
    locks: InstallLocks,
    staged_counter: AtomicU64,
}

impl ArchiveInstaller {
    pub fn new(
        settings: &StoreSettings,
        source: Arc<dyn ArchiveSource>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self {
            root: settings.root_dir.clone(),
            staging_dir: settings.staging_dir(),
            source,
            hooks,
            importer: None,
            locks: InstallLocks::new(),
            staged_counter: AtomicU64::new(0),
        }
    }

    pub fn with_sql_importer(mut self, importer: Arc<dyn SqlImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Download and unpack a plugin that is not installed yet.
    pub async fn install(
        &self,
        key: &str,
        plugin_type: PluginType,
        plugin_id: i64,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<()> {
        let target = InstallTarget::resolve(&self.root, key, plugin_type)?;
        let _lock = self.locks.try_acquire(key)?;
        log::info!(
            "Starting installation: plugin={}, type={}, id={}",
            key,
            plugin_type.as_str(),
            plugin_id
        );

        let result = self.install_locked(&target, plugin_id, reporter).await;
        finish(reporter, &result, "Installation complete", "Installation failed");
        result
    }

    async fn install_locked(
        &self,
        target: &InstallTarget,
        plugin_id: i64,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<()> {
        if target.manifest_path.exists() {
            return Err(StoreError::AlreadyInstalled {
                key: target.key.clone(),
            });
        }

        tokio::fs::create_dir_all(&target.plugin_dir).await?;
        self.deploy(target, ArchiveChannel::Install, plugin_id, reporter)
            .await?;

        reporter.start_step("Running install.sql", None);
        self.run_migration(target, INSTALL_SQL).await?;

        if target.plugin_type.has_hooks() {
            self.fire_hook(HookEvent::Install, target)?;
        }
        Ok(())
    }

    /// Unpack a newer archive over an installed plugin.
    pub async fn update(
        &self,
        key: &str,
        plugin_type: PluginType,
        plugin_id: i64,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<()> {
        let target = InstallTarget::resolve(&self.root, key, plugin_type)?;
        let _lock = self.locks.try_acquire(key)?;
        log::info!(
            "Starting update: plugin={}, type={}, id={}",
            key,
            plugin_type.as_str(),
            plugin_id
        );

        let result = self.update_locked(&target, plugin_id, reporter).await;
        finish(reporter, &result, "Update complete", "Update failed");
        result
    }

    async fn update_locked(
        &self,
        target: &InstallTarget,
        plugin_id: i64,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<()> {
        if !target.plugin_dir.is_dir() {
            return Err(StoreError::NotInstalled {
                key: target.key.clone(),
            });
        }

        self.deploy(target, ArchiveChannel::Update, plugin_id, reporter)
            .await?;

        reporter.start_step("Running update.sql", None);
        self.run_migration(target, UPDATE_SQL).await?;

        if target.plugin_type.has_hooks() {
            self.fire_hook(HookEvent::Upgrade, target)?;
        }
        Ok(())
    }

    /// Remove the plugin directory. Returns false when there was nothing to remove.
    pub async fn uninstall(&self, key: &str, plugin_type: PluginType) -> StoreResult<bool> {
        self.uninstall_with(key, plugin_type, |_| Ok(())).await
    }

    /// Remove the plugin directory, running `before_delete` first while the plugin
    /// files are still readable. Both happen under the plugin lock.
    pub async fn uninstall_with<F>(
        &self,
        key: &str,
        plugin_type: PluginType,
        before_delete: F,
    ) -> StoreResult<bool>
    where
        F: FnOnce(&InstallTarget) -> StoreResult<()> + Send,
    {
        let target = InstallTarget::resolve(&self.root, key, plugin_type)?;
        let _lock = self.locks.try_acquire(key)?;

        if !target.plugin_dir.is_dir() {
            log::info!("Plugin {} is not present, nothing to uninstall", key);
            return Ok(false);
        }

        before_delete(&target)?;
        tokio::fs::remove_dir_all(&target.plugin_dir).await?;
        log::info!("Uninstalled plugin {} from {:?}", key, target.plugin_dir);
        Ok(true)
    }

    /// Run the lifecycle hook registered for the target's plugin key.
    pub fn fire_hook(&self, event: HookEvent, target: &InstallTarget) -> StoreResult<bool> {
        let ctx = HookContext::new(target.key.as_str(), &target.plugin_dir);
        self.hooks
            .run(event, &ctx)
            .map_err(|e| StoreError::Hook {
                key: target.key.clone(),
                reason: format!("{:#}", e),
            })
    }

    /// Download into the staging area and extract over the plugin directory.
    /// The staged archive is removed whatever the outcome.
    async fn deploy(
        &self,
        target: &InstallTarget,
        channel: ArchiveChannel,
        plugin_id: i64,
        reporter: &dyn ProgressReporter,
    ) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let staged = self.staging_path(&target.key);

        reporter.start_step("Downloading plugin", None);
        if let Err(e) = self
            .source
            .fetch_archive(channel, plugin_id, &staged, reporter)
            .await
        {
            remove_staged(&staged).await;
            return Err(e);
        }

        reporter.start_step("Extracting plugin", None);
        let archive = staged.clone();
        let dest = target.plugin_dir.clone();
        let extracted =
            tokio::task::spawn_blocking(move || extract_zip_file(&archive, &dest)).await;
        remove_staged(&staged).await;

        let reason = match extracted {
            Ok(Ok(count)) => {
                reporter.set_message(&format!("Extracted {} files", count));
                log::info!(
                    "Extracted {} files into {:?}",
                    count,
                    target.plugin_dir
                );
                return Ok(());
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(e) => e.to_string(),
        };

        // No rollback, partial trees stay in place
        let partial = has_entries(&target.plugin_dir);
        log::warn!(
            "Extraction of plugin {} failed, partial tree left in {:?}: {} ({})",
            target.key,
            target.plugin_dir,
            partial,
            reason
        );
        Err(StoreError::ExtractFailed {
            key: target.key.clone(),
            partial,
            reason,
        })
    }

    async fn run_migration(&self, target: &InstallTarget, file_name: &str) -> StoreResult<bool> {
        let path = target.sql_file(file_name);
        if !path.is_file() {
            return Ok(false);
        }

        let importer = self.importer.clone().ok_or_else(|| {
            StoreError::Migration(format!(
                "plugin {} ships {} but no database is configured",
                target.key, file_name
            ))
        })?;

        let sql = tokio::fs::read_to_string(&path).await?;
        log::info!("Importing {} of plugin {}", file_name, target.key);
        tokio::task::spawn_blocking(move || importer.import(&sql))
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?
            .map_err(|e| StoreError::Migration(format!("{:#}", e)))?;
        Ok(true)
    }

    /// `{staging}/{sha1}.zip`, unique per call.
    fn staging_path(&self, key: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = self.staged_counter.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha1::new();
        hasher.update(format!("{}-{}-{}", nanos, seq, key).as_bytes());
        self.staging_dir
            .join(format!("{:x}.zip", hasher.finalize()))
    }
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed staged archive {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove staged archive {:?}: {}", path, e),
    }
}

fn finish(
    reporter: &dyn ProgressReporter,
    result: &StoreResult<()>,
    success: &str,
    failure: &str,
) {
    match result {
        Ok(()) => reporter.done(true, Some(success)),
        Err(e) => {
            log::error!("{}: {}", failure, e);
            reporter.done(false, Some(failure));
        }
    }
}
