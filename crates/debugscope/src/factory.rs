//! Storage adapter factory
//!
//! Builds the configured `StorageAdapter`. Construction fails immediately on a
//! missing connection string; no connection is opened until `initialize`.

use std::sync::Arc;

use crate::config::{StorageConfig, StorageDriver};
use debugscope_core::{Error, Result, StorageAdapter};
use debugscope_storage_memory::MemoryStorage;

/// Default SQLite database file when no path is configured
pub const DEFAULT_SQLITE_PATH: &str = "~/.debugscope/debugscope.db";

/// Create a storage adapter based on configuration
///
/// # Errors
/// - `Error::Config` if a relational driver has no connection string, the memory
///   capacity is zero, or the driver was not compiled in
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    match config.driver {
        StorageDriver::Memory => {
            tracing::info!("Initializing in-memory storage (max {} entries)", config.max_entries);
            Ok(Arc::new(MemoryStorage::new(config.max_entries)?))
        }
        StorageDriver::Sqlite => create_sqlite(config),
        StorageDriver::Postgres => create_postgres(config),
        StorageDriver::Mysql => create_mysql(config),
    }
}

fn required_connection(config: &StorageConfig) -> Result<&str> {
    config
        .connection
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "The {} storage driver requires a connection string",
                config.driver
            ))
        })
}

#[cfg(feature = "sqlite")]
fn create_sqlite(config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    let path = config
        .connection
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_SQLITE_PATH);

    tracing::info!("Initializing SQLite storage (db={})", path);
    Ok(Arc::new(debugscope_storage_sqlite::SqliteStorage::new(path)?))
}

#[cfg(not(feature = "sqlite"))]
fn create_sqlite(_config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    Err(not_compiled(StorageDriver::Sqlite))
}

#[cfg(feature = "postgres")]
fn create_postgres(config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    let url = required_connection(config)?;
    tracing::info!("Initializing PostgreSQL storage");

    let pg_config = debugscope_storage_postgres::PostgresStorageConfig::default()
        .with_max_connections(config.max_connections);
    Ok(Arc::new(debugscope_storage_postgres::PostgresStorage::with_config(
        url, pg_config,
    )?))
}

#[cfg(not(feature = "postgres"))]
fn create_postgres(config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    required_connection(config)?;
    Err(not_compiled(StorageDriver::Postgres))
}

#[cfg(feature = "mysql")]
fn create_mysql(config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    let url = required_connection(config)?;
    tracing::info!("Initializing MySQL storage");

    let mysql_config = debugscope_storage_mysql::MysqlStorageConfig::default()
        .with_max_connections(config.max_connections);
    Ok(Arc::new(debugscope_storage_mysql::MysqlStorage::with_config(
        url,
        mysql_config,
    )?))
}

#[cfg(not(feature = "mysql"))]
fn create_mysql(config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    required_connection(config)?;
    Err(not_compiled(StorageDriver::Mysql))
}

#[allow(dead_code)]
fn not_compiled(driver: StorageDriver) -> Error {
    Error::Config(format!(
        "The {} storage driver is not enabled; rebuild with the `{}` feature",
        driver, driver
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(driver: StorageDriver, connection: Option<&str>) -> StorageConfig {
        StorageConfig {
            driver,
            connection: connection.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_memory_driver() {
        let storage = create_storage(&config(StorageDriver::Memory, None)).unwrap();
        assert_eq!(storage.name(), "memory");
    }

    #[test]
    fn test_memory_zero_capacity_fails() {
        let mut cfg = config(StorageDriver::Memory, None);
        cfg.max_entries = 0;
        assert!(matches!(create_storage(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn test_relational_drivers_require_connection() {
        for driver in [StorageDriver::Postgres, StorageDriver::Mysql] {
            match create_storage(&config(driver, None)) {
                Err(Error::Config(message)) => assert!(message.contains(driver.as_str())),
                Err(other) => panic!("unexpected error: {}", other),
                Ok(_) => panic!("{} accepted a missing connection string", driver),
            }
            assert!(create_storage(&config(driver, Some("   "))).is_err());
        }
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sqlite_driver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scope.db");
        let storage =
            create_storage(&config(StorageDriver::Sqlite, path.to_str())).unwrap();

        assert_eq!(storage.name(), "sqlite");
        storage.initialize().await.unwrap();
        assert!(path.exists());
    }
}
