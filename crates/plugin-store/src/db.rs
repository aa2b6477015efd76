// Database connection management using Diesel with r2d2 connection pooling

use crate::config::DatabaseSettings;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::SqliteConnection;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Build the pool plugin migrations run against.
/// The pool is owned by whoever builds it and passed down explicitly.
pub fn init_pool(settings: &DatabaseSettings) -> Result<DbPool, anyhow::Error> {
    let manager = ConnectionManager::<SqliteConnection>::new(settings.url.as_str());
    let pool = Pool::builder()
        .max_size(settings.max_connections.max(1))
        .build(manager)
        .map_err(|e| anyhow::anyhow!("Failed to open database {}: {}", settings.url, e))?;

    log::info!(
        "Database pool ready: {} (prefix {:?})",
        settings.url,
        settings.table_prefix
    );
    Ok(pool)
}
