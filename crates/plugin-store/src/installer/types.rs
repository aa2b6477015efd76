use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Progress reporter trait for installer operations
/// Implementations forward updates to a UI, a log, or nowhere
pub trait ProgressReporter: Send + Sync {
    /// Start a new step with optional total steps
    fn start_step(&self, name: &str, total_steps: Option<u32>);

    /// Update bytes transferred for download progress
    fn update_bytes(&self, transferred: u64, total: Option<u64>);

    /// Set a short status message
    fn set_message(&self, message: &str);

    /// Mark operation as complete
    fn done(&self, success: bool, message: Option<&str>);
}

/// A progress reporter that does nothing (silent).
/// Useful for background refreshes or tests.
pub struct SilentProgressReporter;

impl ProgressReporter for SilentProgressReporter {
    fn start_step(&self, _name: &str, _total_steps: Option<u32>) {}
    fn update_bytes(&self, _transferred: u64, _total: Option<u64>) {}
    fn set_message(&self, _message: &str) {}
    fn done(&self, _success: bool, _message: Option<&str>) {}
}

/// Reporter that writes step changes to the log.
pub struct LogProgressReporter;

impl ProgressReporter for LogProgressReporter {
    fn start_step(&self, name: &str, total_steps: Option<u32>) {
        match total_steps {
            Some(total) => log::info!("{} (of {} steps)", name, total),
            None => log::info!("{}", name),
        }
    }

    fn update_bytes(&self, transferred: u64, total: Option<u64>) {
        log::trace!("transferred {} of {:?} bytes", transferred, total);
    }

    fn set_message(&self, message: &str) {
        log::debug!("{}", message);
    }

    fn done(&self, success: bool, message: Option<&str>) {
        if success {
            log::info!("{}", message.unwrap_or("done"));
        } else {
            log::warn!("{}", message.unwrap_or("failed"));
        }
    }
}

/// Kind of plugin, as numbered by the store API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PluginType {
    Generic,
    Payment,
    Theme,
}

/// Where a manifest keeps the plugin version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionAccessor {
    /// Top-level key of the returned config array
    ArrayKey(&'static str),
    /// Key inside an array constant of the config class
    ConstantKey {
        constant: &'static str,
        key: &'static str,
    },
}

/// Static on-disk layout of one plugin type
#[derive(Debug)]
pub struct PluginLayout {
    /// Parent directory of all plugins of the type, relative to the site root
    pub base_dir: &'static str,
    /// Manifest file, relative to the plugin directory
    pub manifest: &'static str,
    pub version: VersionAccessor,
}

static GENERIC_LAYOUT: PluginLayout = PluginLayout {
    base_dir: "app/Plugin",
    manifest: "Config/Info.php",
    version: VersionAccessor::ArrayKey("VERSION"),
};

static PAYMENT_LAYOUT: PluginLayout = PluginLayout {
    base_dir: "app/Pay",
    manifest: "Config/Info.php",
    version: VersionAccessor::ArrayKey("version"),
};

static THEME_LAYOUT: PluginLayout = PluginLayout {
    base_dir: "app/View/User/Theme",
    manifest: "Config.php",
    version: VersionAccessor::ConstantKey {
        constant: "INFO",
        key: "VERSION",
    },
};

impl PluginType {
    pub const ALL: [PluginType; 3] = [PluginType::Generic, PluginType::Payment, PluginType::Theme];

    pub fn as_i64(self) -> i64 {
        match self {
            PluginType::Generic => 0,
            PluginType::Payment => 1,
            PluginType::Theme => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(PluginType::Generic),
            1 => Some(PluginType::Payment),
            2 => Some(PluginType::Theme),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Generic => "generic",
            PluginType::Payment => "payment",
            PluginType::Theme => "theme",
        }
    }

    pub fn layout(self) -> &'static PluginLayout {
        match self {
            PluginType::Generic => &GENERIC_LAYOUT,
            PluginType::Payment => &PAYMENT_LAYOUT,
            PluginType::Theme => &THEME_LAYOUT,
        }
    }

    /// Only generic plugins carry lifecycle hooks.
    pub fn has_hooks(self) -> bool {
        self == PluginType::Generic
    }

    pub fn plugin_dir(self, root: &Path, key: &str) -> PathBuf {
        root.join(self.layout().base_dir).join(key)
    }

    pub fn manifest_path(self, root: &Path, key: &str) -> PathBuf {
        self.plugin_dir(root, key).join(self.layout().manifest)
    }
}

impl TryFrom<i64> for PluginType {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        PluginType::from_i64(value).ok_or_else(|| format!("unknown plugin type {}", value))
    }
}

impl From<PluginType> for i64 {
    fn from(value: PluginType) -> Self {
        value.as_i64()
    }
}

/// Reject keys that could escape the plugin base directory.
pub fn validate_plugin_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::ValidationFailed(format!(
            "invalid plugin key {:?}",
            key
        )))
    }
}

/// Resolved filesystem target of one lifecycle call
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub key: String,
    pub plugin_type: PluginType,
    pub plugin_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl InstallTarget {
    pub fn resolve(root: &Path, key: &str, plugin_type: PluginType) -> StoreResult<Self> {
        validate_plugin_key(key)?;
        Ok(Self {
            key: key.to_string(),
            plugin_type,
            plugin_dir: plugin_type.plugin_dir(root, key),
            manifest_path: plugin_type.manifest_path(root, key),
        })
    }

    /// Migration file shipped inside the plugin for the given phase.
    pub fn sql_file(&self, name: &str) -> PathBuf {
        self.plugin_dir.join(name)
    }
}
