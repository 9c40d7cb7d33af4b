//! Storage adapter trait
//!
//! The `StorageAdapter` trait is the single persistence contract. Every backend
//! (in-process, SQLite, PostgreSQL, MySQL) must produce the same *logical* results
//! for the same inputs, even where the mechanics differ.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Result,
    entry::Entry,
    query::{ListOptions, PaginatedResult, StorageStats},
};

/// Storage adapter trait
///
/// Implementations:
/// - `MemoryStorage`: bounded in-process map
/// - `SqliteStorage`: embedded single-file database
/// - `PostgresStorage`: client/server relational database
/// - `MysqlStorage`: client/server relational database
///
/// # Example
/// ```no_run
/// # use debugscope_core::{Entry, EntryType, ListOptions, StorageAdapter};
/// # async fn example(store: &dyn StorageAdapter) -> debugscope_core::Result<()> {
/// store.initialize().await?;
///
/// let entry = Entry::new(EntryType::Log, "batch-1", serde_json::json!({"message": "hi"}));
/// store.save(&entry).await?;
///
/// let page = store.list(&ListOptions::default().with_type(EntryType::Log)).await?;
/// assert_eq!(page.total, 1);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Idempotent setup (schema creation, connection establishment)
    ///
    /// Must be called once before any other operation.
    async fn initialize(&self) -> Result<()>;

    /// Upsert by id
    ///
    /// A second save with the same id overwrites `content`, `tags`, `duration` and
    /// `memory_usage`; `batch_id`, `entry_type` and `created_at` keep their first values.
    async fn save(&self, entry: &Entry) -> Result<()>;

    /// Save a group of entries
    ///
    /// Transactional backends apply the batch atomically; others apply entries in order.
    async fn save_batch(&self, entries: &[Entry]) -> Result<()> {
        for entry in entries {
            self.save(entry).await?;
        }
        Ok(())
    }

    /// Look up a single entry; `Ok(None)` when absent
    async fn find(&self, id: &str) -> Result<Option<Entry>>;

    /// Filtered, paginated listing, newest first
    ///
    /// # Errors
    /// - `Error::Database` / `Error::Storage` for backend failures
    async fn list(&self, options: &ListOptions) -> Result<PaginatedResult<Entry>>;

    /// All entries of a batch in chronological order
    async fn find_by_batch(&self, batch_id: &str) -> Result<Vec<Entry>>;

    /// Delete entries created strictly before `before`; returns the count removed
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Delete everything
    async fn clear(&self) -> Result<()>;

    /// Aggregate counts and time bounds
    async fn stats(&self) -> Result<StorageStats>;

    /// Release backend resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;
}
