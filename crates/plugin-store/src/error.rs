//! Error type shared by the store client, the installer and the controller.

/// Everything that can go wrong between a request and the plugin tree.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not logged in to the plugin store")]
    NotAuthenticated,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Plugin {key} is already installed")]
    AlreadyInstalled { key: String },

    #[error("Plugin {key} is not installed")]
    NotInstalled { key: String },

    #[error("Another operation on plugin {key} is in progress")]
    InstallInProgress { key: String },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Extracting plugin {key} failed (partial tree left: {partial}): {reason}")]
    ExtractFailed {
        key: String,
        partial: bool,
        reason: String,
    },

    #[error("{msg}")]
    RemoteRejected { code: i64, msg: String },

    #[error("Plugin store unreachable: {0}")]
    StoreUnreachable(String),

    #[error("Invalid response from plugin store: {0}")]
    InvalidResponse(String),

    #[error("CACHE HIT")]
    CacheFresh,

    #[error("SQL migration failed: {0}")]
    Migration(String),

    #[error("Lifecycle hook of plugin {key} failed: {reason}")]
    Hook { key: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Stable snake-case name used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotAuthenticated => "not_authenticated",
            StoreError::ValidationFailed(_) => "validation_failed",
            StoreError::AlreadyInstalled { .. } => "already_installed",
            StoreError::NotInstalled { .. } => "not_installed",
            StoreError::InstallInProgress { .. } => "install_in_progress",
            StoreError::DownloadFailed(_) => "download_failed",
            StoreError::ExtractFailed { .. } => "extract_failed",
            StoreError::RemoteRejected { .. } => "remote_rejected",
            StoreError::StoreUnreachable(_) => "store_unreachable",
            StoreError::InvalidResponse(_) => "invalid_response",
            StoreError::CacheFresh => "cache_fresh",
            StoreError::Migration(_) => "migration_failed",
            StoreError::Hook { .. } => "hook_failed",
            StoreError::Io(_) => "io",
            StoreError::Json(_) => "json",
        }
    }

    /// Response code reported to callers of the controller.
    pub fn code(&self) -> i64 {
        match self {
            StoreError::NotAuthenticated => 401,
            StoreError::ValidationFailed(_) => 400,
            StoreError::AlreadyInstalled { .. } | StoreError::InstallInProgress { .. } => 409,
            StoreError::NotInstalled { .. } => 404,
            StoreError::RemoteRejected { code, .. } => *code,
            StoreError::StoreUnreachable(_) | StoreError::DownloadFailed(_) => 502,
            StoreError::InvalidResponse(_) => 502,
            StoreError::CacheFresh => 200,
            _ => 500,
        }
    }
}
