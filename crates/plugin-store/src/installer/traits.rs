use crate::error::StoreResult;
use crate::installer::types::ProgressReporter;
use futures::future::BoxFuture;
use std::path::Path;

/// Which store endpoint an archive is fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveChannel {
    Install,
    Update,
}

impl ArchiveChannel {
    pub fn endpoint(self) -> &'static str {
        match self {
            ArchiveChannel::Install => "/store/install",
            ArchiveChannel::Update => "/store/update",
        }
    }
}

/// Trait for anything that can deliver a plugin archive.
/// The store transport is the production implementation.
pub trait ArchiveSource: Send + Sync {
    /// Stream the archive of `plugin_id` into `dest`, returning the number of bytes written.
    fn fetch_archive<'a>(
        &'a self,
        channel: ArchiveChannel,
        plugin_id: i64,
        dest: &'a Path,
        reporter: &'a dyn ProgressReporter,
    ) -> BoxFuture<'a, StoreResult<u64>>;
}
