//! SQL files shipped inside plugin archives.

use crate::config::{StoreSettings, TABLE_PREFIX_PLACEHOLDER};
use crate::db::{init_pool, DbPool};
use anyhow::{Context, Result};
use diesel::connection::SimpleConnection;
use std::sync::Arc;

pub const INSTALL_SQL: &str = "install.sql";
pub const UPDATE_SQL: &str = "update.sql";

/// Applies a plugin's SQL script to the site database.
pub trait SqlImporter: Send + Sync {
    /// Run every statement of `sql` after substituting the table prefix.
    fn import(&self, sql: &str) -> Result<()>;
}

/// Replace the `__PREFIX__` placeholder with the configured table prefix.
pub fn apply_prefix(sql: &str, prefix: &str) -> String {
    sql.replace(TABLE_PREFIX_PLACEHOLDER, prefix)
}

/// [`SqlImporter`] backed by the diesel connection pool
pub struct DieselSqlImporter {
    pool: DbPool,
    table_prefix: String,
}

impl DieselSqlImporter {
    pub fn new(pool: DbPool, table_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            table_prefix: table_prefix.into(),
        }
    }
}

/// Importer for the database configured in `settings`, if there is one.
pub fn importer_from_settings(settings: &StoreSettings) -> Result<Option<Arc<dyn SqlImporter>>> {
    let database = match &settings.database {
        Some(database) => database,
        None => return Ok(None),
    };
    let pool = init_pool(database)?;
    Ok(Some(Arc::new(DieselSqlImporter::new(
        pool,
        database.table_prefix.clone(),
    ))))
}

impl SqlImporter for DieselSqlImporter {
    fn import(&self, sql: &str) -> Result<()> {
        let statements = apply_prefix(sql, &self.table_prefix);
        let mut conn = self
            .pool
            .get()
            .context("Failed to get database connection")?;
        conn.batch_execute(&statements)
            .context("Failed to execute plugin SQL")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseSettings;
    use tempfile::tempdir;

    #[test]
    fn prefix_placeholder_is_replaced_everywhere() {
        let sql = "CREATE TABLE __PREFIX__a (id INT); INSERT INTO __PREFIX__a VALUES (1);";
        assert_eq!(
            apply_prefix(sql, "acg_"),
            "CREATE TABLE acg_a (id INT); INSERT INTO acg_a VALUES (1);"
        );
    }

    #[test]
    fn diesel_importer_creates_prefixed_tables() {
        let tmp = tempdir().unwrap();
        let url = tmp.path().join("site.db").display().to_string();
        let pool = init_pool(&DatabaseSettings::new(url, "acg_")).unwrap();
        let importer = DieselSqlImporter::new(pool.clone(), "acg_");

        importer
            .import("CREATE TABLE __PREFIX__demo (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();

        let mut conn = pool.get().unwrap();
        conn.batch_execute("INSERT INTO acg_demo (id, name) VALUES (1, 'x');")
            .unwrap();
    }

    #[test]
    fn configured_database_gets_an_importer() {
        let tmp = tempdir().unwrap();
        let plain = StoreSettings::new(tmp.path());
        assert!(importer_from_settings(&plain).unwrap().is_none());

        let db = tmp.path().join("site.db");
        let settings = StoreSettings::new(tmp.path())
            .with_database(DatabaseSettings::new(db.display().to_string(), "acg_"));
        let importer = importer_from_settings(&settings).unwrap().unwrap();
        importer
            .import("CREATE TABLE __PREFIX__demo (id INTEGER PRIMARY KEY);")
            .unwrap();

        let pool = init_pool(settings.database.as_ref().unwrap()).unwrap();
        let mut conn = pool.get().unwrap();
        conn.batch_execute("INSERT INTO acg_demo (id) VALUES (1);")
            .unwrap();
    }

    #[test]
    fn broken_sql_propagates() {
        let tmp = tempdir().unwrap();
        let url = tmp.path().join("site.db").display().to_string();
        let pool = init_pool(&DatabaseSettings::new(url, "")).unwrap();
        let importer = DieselSqlImporter::new(pool, "");
        assert!(importer.import("THIS IS NOT SQL;").is_err());
    }
}
