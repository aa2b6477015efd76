//! Local plugin registry.
//!
//! Nothing is recorded at install time: status is derived on demand from the
//! plugin directory and its manifest, so a directory left behind by an
//! interrupted extraction never counts as installed.

use crate::installer::types::{validate_plugin_key, PluginType, VersionAccessor};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;

/// Install status of one plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallStatus {
    pub installed: bool,
    pub local_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PluginRegistry {
    root: PathBuf,
}

impl PluginRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Probe the plugin tree. Missing or unreadable files mean "not installed" or
    /// "no version", never an error.
    pub fn is_installed(&self, key: &str, plugin_type: PluginType) -> InstallStatus {
        if validate_plugin_key(key).is_err() {
            return InstallStatus::default();
        }

        let dir = plugin_type.plugin_dir(&self.root, key);
        let manifest = plugin_type.manifest_path(&self.root, key);
        if !dir.is_dir() || !manifest.is_file() {
            return InstallStatus::default();
        }

        let local_version = match std::fs::read_to_string(&manifest) {
            Ok(text) => read_manifest_version(&text, plugin_type.layout().version),
            Err(e) => {
                log::warn!("Failed to read plugin manifest {:?}: {}", manifest, e);
                None
            }
        };

        InstallStatus {
            installed: true,
            local_version,
        }
    }

    /// Status for a raw wire type; unknown types have no local status.
    pub fn status_for(&self, key: &str, raw_type: i64) -> Option<InstallStatus> {
        PluginType::from_i64(raw_type).map(|ty| self.is_installed(key, ty))
    }
}

/// Pull the version string out of a PHP manifest.
pub fn read_manifest_version(text: &str, accessor: VersionAccessor) -> Option<String> {
    match accessor {
        VersionAccessor::ArrayKey(key) => find_array_value(text, key),
        VersionAccessor::ConstantKey { constant, key } => {
            let start = Regex::new(&format!(r"const\s+{}\s*=", regex::escape(constant))).ok()?;
            let found = start.find(text)?;
            find_array_value(&text[found.end()..], key)
        }
    }
}

fn find_array_value(text: &str, key: &str) -> Option<String> {
    let key = regex::escape(key);
    let pattern = format!(
        r#"(?:["']{key}["']|::{key})\s*=>\s*["']([^"']*)["']"#,
        key = key
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    const GENERIC_INFO: &str = r#"<?php
return [
    \App\Consts\Plugin::NAME => "Demo",
    \App\Consts\Plugin::VERSION => "1.2.0",
];"#;

    const PAYMENT_INFO: &str = r#"<?php
return [
    'name' => 'Alipay',
    'version' => '2.0.1',
];"#;

    const THEME_CONFIG: &str = r#"<?php
namespace App\View\User\Theme\Cartoon;
class Config
{
    const INFO = [
        "NAME" => "Cartoon",
        "VERSION" => "3.1",
    ];
}"#;

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn reads_versions_per_type() {
        assert_eq!(
            read_manifest_version(GENERIC_INFO, PluginType::Generic.layout().version),
            Some("1.2.0".to_string())
        );
        assert_eq!(
            read_manifest_version(PAYMENT_INFO, PluginType::Payment.layout().version),
            Some("2.0.1".to_string())
        );
        assert_eq!(
            read_manifest_version(THEME_CONFIG, PluginType::Theme.layout().version),
            Some("3.1".to_string())
        );
        assert_eq!(
            read_manifest_version("<?php return [];", PluginType::Payment.layout().version),
            None
        );
    }

    #[test]
    fn installed_requires_directory_and_manifest() {
        let tmp = tempdir().unwrap();
        let registry = PluginRegistry::new(tmp.path());

        for ty in PluginType::ALL {
            // nothing on disk
            assert!(!registry.is_installed("Demo", ty).installed);

            // directory only, e.g. mid-extraction
            std::fs::create_dir_all(ty.plugin_dir(tmp.path(), "Demo")).unwrap();
            assert!(!registry.is_installed("Demo", ty).installed);

            write(&ty.manifest_path(tmp.path(), "Demo"), "<?php return [];");
            let status = registry.is_installed("Demo", ty);
            assert!(status.installed);
            assert_eq!(status.local_version, None);
        }
    }

    #[test]
    fn installed_theme_reports_local_version() {
        let tmp = tempdir().unwrap();
        let registry = PluginRegistry::new(tmp.path());
        write(
            &PluginType::Theme.manifest_path(tmp.path(), "Cartoon"),
            THEME_CONFIG,
        );

        let status = registry.is_installed("Cartoon", PluginType::Theme);
        assert_eq!(
            status,
            InstallStatus {
                installed: true,
                local_version: Some("3.1".to_string()),
            }
        );
    }

    #[test]
    fn unknown_type_and_bad_key_are_not_errors() {
        let tmp = tempdir().unwrap();
        let registry = PluginRegistry::new(tmp.path());
        assert_eq!(registry.status_for("Demo", 7), None);
        assert!(!registry.is_installed("../../etc", PluginType::Generic).installed);
    }
}
