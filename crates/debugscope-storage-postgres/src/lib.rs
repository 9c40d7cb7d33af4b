//! PostgreSQL-backed entry storage
//!
//! Tags are stored as `TEXT[]` and filtered natively with the overlap operator;
//! search lowercases the serialized content under the `C` collation so only
//! ASCII letters fold. The pool connects lazily and `initialize` applies
//! versioned schema migrations.
//!
//! # Example
//! ```no_run
//! # use debugscope_storage_postgres::PostgresStorage;
//! # use debugscope_core::StorageAdapter;
//! # async fn example() -> debugscope_core::Result<()> {
//! let store = PostgresStorage::new("postgres://localhost/debugscope")?;
//! store.initialize().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod migrations;
mod postgres_storage;

pub use config::PostgresStorageConfig;
pub use migrations::{MIGRATIONS, Migration, get_current_version};
pub use postgres_storage::PostgresStorage;
