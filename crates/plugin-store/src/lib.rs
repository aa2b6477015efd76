pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod installer;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use config::{DatabaseSettings, StoreSettings};
pub use controller::{dispatch, ApiResponse, FormInput};
pub use error::{StoreError, StoreResult};
pub use installer::hooks::{HookContext, HookEvent, HookRegistry, PluginHook};
pub use installer::types::{PluginType, ProgressReporter};
pub use registry::{InstallStatus, PluginRegistry};
pub use store::credentials::StoreCredentials;
pub use store::types::{PluginFilter, SessionToken};
pub use store::StoreClient;
