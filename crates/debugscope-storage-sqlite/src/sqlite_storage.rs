//! SqliteStorage - StorageAdapter implementation over a single SQLite file
//!
//! Timestamps are stored as epoch milliseconds and tags as a JSON array that is
//! filtered natively through `json_each`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use std::path::{Path, PathBuf};

use debugscope_core::{
    Entry, EntryType, Error, ListOptions, PaginatedResult, Result, StorageAdapter, StorageStats,
};

const SELECT_COLUMNS: &str =
    "id, batch_id, entry_type, content, tags, created_at, duration, memory_usage";

const UPSERT_SQL: &str = r#"
    INSERT INTO debugscope_entries
        (id, batch_id, entry_type, content, tags, created_at, duration, memory_usage)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        content = excluded.content,
        tags = excluded.tags,
        duration = excluded.duration,
        memory_usage = excluded.memory_usage
"#;

/// Bind value for dynamically built filters
enum Param {
    Text(String),
    Int(i64),
}

/// SQLite storage backend
///
/// The pool connects lazily; `initialize` creates the parent directory and schema.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteStorage {
    /// Create a store for the database file at `path` (`~` is expanded)
    ///
    /// # Errors
    /// - `Error::Config` if the path is empty
    /// - `Error::Internal` if `~` cannot be resolved
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::Config("SQLite storage requires a database path".to_string()));
        }
        let path = expand_tilde(path)?;

        let pool = SqlitePoolOptions::new().max_connections(5).connect_lazy_with(
            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
        );

        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the underlying pool (for custom queries)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS debugscope_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                batch_id TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                duration REAL,
                memory_usage INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_debugscope_entries_batch ON debugscope_entries(batch_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_debugscope_entries_type ON debugscope_entries(entry_type, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_debugscope_entries_created ON debugscope_entries(created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// WHERE clause (possibly empty) and its bind values, in order
    fn build_filter(options: &ListOptions) -> (String, Vec<Param>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params = Vec::new();

        if let Some(entry_type) = options.entry_type {
            conditions.push("entry_type = ?".to_string());
            params.push(Param::Text(entry_type.as_str().to_string()));
        }

        if let Some(batch_id) = &options.batch_id {
            conditions.push("batch_id = ?".to_string());
            params.push(Param::Text(batch_id.clone()));
        }

        if !options.tags.is_empty() {
            let placeholders = vec!["?"; options.tags.len()].join(", ");
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM json_each(debugscope_entries.tags) WHERE json_each.value IN ({}))",
                placeholders
            ));
            params.extend(options.tags.iter().cloned().map(Param::Text));
        }

        if let Some(pattern) = options.like_pattern() {
            conditions.push("LOWER(content) LIKE ? ESCAPE '\\'".to_string());
            params.push(Param::Text(pattern));
        }

        if let Some(before) = options.before {
            conditions.push("created_at < ?".to_string());
            params.push(Param::Int(before.timestamp_millis()));
        }

        if let Some(after) = options.after {
            conditions.push("created_at > ?".to_string());
            params.push(Param::Int(after.timestamp_millis()));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        (clause, params)
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [Param],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Param::Text(value) => query.bind(value.as_str()),
            Param::Int(value) => query.bind(*value),
        };
    }
    query
}

fn row_to_entry(row: &SqliteRow) -> Result<Entry> {
    let map_err = |e: sqlx::Error| Error::Database(e.to_string());

    let entry_type: String = row.try_get("entry_type").map_err(map_err)?;
    let content: String = row.try_get("content").map_err(map_err)?;
    let tags: String = row.try_get("tags").map_err(map_err)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_err)?;

    Ok(Entry {
        id: row.try_get("id").map_err(map_err)?,
        batch_id: row.try_get("batch_id").map_err(map_err)?,
        entry_type: entry_type.parse()?,
        content: serde_json::from_str(&content)?,
        tags: serde_json::from_str(&tags)?,
        created_at: millis_to_datetime(created_at)?,
        duration: row.try_get("duration").map_err(map_err)?,
        memory_usage: row.try_get("memory_usage").map_err(map_err)?,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Database(format!("Invalid stored timestamp: {}", ms)))
}

fn upsert_query(
    entry: &Entry,
) -> Result<sqlx::query::Query<'static, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'static>>> {
    let tags = serde_json::to_string(&entry.tags)?;
    Ok(sqlx::query(UPSERT_SQL)
        .bind(entry.id.clone())
        .bind(entry.batch_id.clone())
        .bind(entry.entry_type.as_str())
        .bind(entry.content_json())
        .bind(tags)
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.duration)
        .bind(entry.memory_usage))
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.initialize_schema().await?;
        tracing::info!(path = %self.path.display(), "SQLite storage initialized");
        Ok(())
    }

    async fn save(&self, entry: &Entry) -> Result<()> {
        upsert_query(entry)?
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn save_batch(&self, entries: &[Entry]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        for entry in entries {
            // Dropping the transaction on error rolls it back
            upsert_query(entry)?
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Entry>> {
        let sql = format!("SELECT {} FROM debugscope_entries WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn list(&self, options: &ListOptions) -> Result<PaginatedResult<Entry>> {
        let (clause, params) = Self::build_filter(options);

        let count_sql = format!("SELECT COUNT(*) AS total FROM debugscope_entries{}", clause);
        let total: i64 = bind_params(sqlx::query(&count_sql), &params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .try_get("total")
            .map_err(|e| Error::Database(e.to_string()))?;

        let select_sql = format!(
            "SELECT {} FROM debugscope_entries{} ORDER BY created_at DESC, seq DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, clause
        );
        let rows = bind_params(sqlx::query(&select_sql), &params)
            .bind(options.sql_limit())
            .bind(options.sql_offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let data = rows.iter().map(row_to_entry).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResult::new(data, total as u64, options.limit, options.offset))
    }

    async fn find_by_batch(&self, batch_id: &str) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {} FROM debugscope_entries WHERE batch_id = ? ORDER BY created_at ASC, seq ASC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM debugscope_entries WHERE created_at < ?")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM debugscope_entries")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let rows = sqlx::query(
            r#"
            SELECT entry_type, COUNT(*) AS total, MIN(created_at) AS oldest, MAX(created_at) AS newest
            FROM debugscope_entries
            GROUP BY entry_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut stats = StorageStats::empty();
        for row in &rows {
            let map_err = |e: sqlx::Error| Error::Database(e.to_string());
            let entry_type: String = row.try_get("entry_type").map_err(map_err)?;
            let total: i64 = row.try_get("total").map_err(map_err)?;
            let oldest: i64 = row.try_get("oldest").map_err(map_err)?;
            let newest: i64 = row.try_get("newest").map_err(map_err)?;

            stats.add(entry_type.parse::<EntryType>()?, total as u64);
            stats.observe(millis_to_datetime(oldest)?);
            stats.observe(millis_to_datetime(newest)?);
        }
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

/// Expand `~` to the home directory
fn expand_tilde(path: PathBuf) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Internal("Could not determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path),
    }
}
