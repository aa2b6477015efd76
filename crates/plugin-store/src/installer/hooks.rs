//! Lifecycle hooks of generic plugins.
//!
//! Plugins that need to react to being installed, upgraded or removed register a
//! [`PluginHook`] under their key. Unregistered plugins simply have no hook.

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    Install,
    Upgrade,
    Uninstall,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Install => "install",
            HookEvent::Upgrade => "upgrade",
            HookEvent::Uninstall => "uninstall",
        }
    }
}

/// What a hook gets to see
#[derive(Debug, Clone)]
pub struct HookContext {
    pub plugin_key: String,
    pub plugin_dir: PathBuf,
}

impl HookContext {
    pub fn new(plugin_key: impl Into<String>, plugin_dir: &Path) -> Self {
        Self {
            plugin_key: plugin_key.into(),
            plugin_dir: plugin_dir.to_path_buf(),
        }
    }
}

pub trait PluginHook: Send + Sync {
    fn on_event(&self, event: HookEvent, ctx: &HookContext) -> Result<()>;
}

impl<F> PluginHook for F
where
    F: Fn(HookEvent, &HookContext) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: HookEvent, ctx: &HookContext) -> Result<()> {
        self(event, ctx)
    }
}

/// Hooks by plugin key
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, Arc<dyn PluginHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the hook of `plugin_key`.
    pub fn register(&self, plugin_key: impl Into<String>, hook: Arc<dyn PluginHook>) {
        let mut hooks = match self.hooks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.insert(plugin_key.into(), hook);
    }

    pub fn unregister(&self, plugin_key: &str) -> bool {
        let mut hooks = match self.hooks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.remove(plugin_key).is_some()
    }

    pub fn get(&self, plugin_key: &str) -> Option<Arc<dyn PluginHook>> {
        let hooks = match self.hooks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.get(plugin_key).cloned()
    }

    /// Fire `event` for the plugin. Returns whether a hook ran.
    pub fn run(&self, event: HookEvent, ctx: &HookContext) -> Result<bool> {
        match self.get(&ctx.plugin_key) {
            Some(hook) => {
                log::info!(
                    "Running {} hook of plugin {}",
                    event.as_str(),
                    ctx.plugin_key
                );
                hook.on_event(event, ctx)?;
                Ok(true)
            }
            None => {
                log::debug!(
                    "Plugin {} has no {} hook",
                    ctx.plugin_key,
                    event.as_str()
                );
                Ok(false)
            }
        }
    }
}
