//! MysqlStorage - StorageAdapter implementation for MySQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, Row};
use std::time::Duration;

use debugscope_core::{
    Entry, EntryType, Error, ListOptions, PaginatedResult, Result, StorageAdapter, StorageStats,
};

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

const SELECT_COLUMNS: &str =
    "id, batch_id, entry_type, content, tags, created_at, duration, memory_usage";

const UPSERT_SQL: &str = r#"
    INSERT INTO debugscope_entries
        (id, batch_id, entry_type, content, search_text, tags, created_at, duration, memory_usage)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE
        content = VALUES(content),
        search_text = VALUES(search_text),
        tags = VALUES(tags),
        duration = VALUES(duration),
        memory_usage = VALUES(memory_usage)
"#;

/// Connection pool settings for the MySQL backend
#[derive(Debug, Clone)]
pub struct MysqlStorageConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for MysqlStorageConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl MysqlStorageConfig {
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

enum Param {
    Text(String),
    Int(i64),
}

/// MySQL storage backend
#[derive(Clone)]
pub struct MysqlStorage {
    pool: MySqlPool,
}

impl MysqlStorage {
    /// Create a store with the default pool configuration
    ///
    /// # Errors
    /// - `Error::Config` if the URL is empty or cannot be parsed
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_config(database_url, MysqlStorageConfig::default())
    }

    pub fn with_config(database_url: &str, config: MysqlStorageConfig) -> Result<Self> {
        if database_url.trim().is_empty() {
            return Err(Error::Config(
                "MySQL storage requires a connection string".to_string(),
            ));
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_lazy(database_url)
            .map_err(|e| Error::Config(format!("Invalid MySQL connection string: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS debugscope_entries (
                seq BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                id VARCHAR(191) NOT NULL,
                batch_id VARCHAR(191) NOT NULL,
                entry_type VARCHAR(32) NOT NULL,
                content LONGTEXT NOT NULL,
                search_text LONGTEXT CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL,
                tags TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                duration DOUBLE NULL,
                memory_usage BIGINT NULL,
                UNIQUE KEY uq_debugscope_entries_id (id),
                KEY idx_debugscope_entries_batch (batch_id, created_at),
                KEY idx_debugscope_entries_type (entry_type, created_at),
                KEY idx_debugscope_entries_created (created_at)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Every filter except tags, which MySQL leaves to application code
    fn build_filter(options: &ListOptions) -> (String, Vec<Param>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(entry_type) = options.entry_type {
            conditions.push("entry_type = ?");
            params.push(Param::Text(entry_type.as_str().to_string()));
        }

        if let Some(batch_id) = &options.batch_id {
            conditions.push("batch_id = ?");
            params.push(Param::Text(batch_id.clone()));
        }

        // search_text holds ASCII-lowercased content under a binary collation,
        // so only ASCII letters fold. Backslash is the default LIKE escape.
        if let Some(pattern) = options.like_pattern() {
            conditions.push("search_text LIKE ?");
            params.push(Param::Text(pattern));
        }

        if let Some(before) = options.before {
            conditions.push("created_at < ?");
            params.push(Param::Int(before.timestamp_millis()));
        }

        if let Some(after) = options.after {
            conditions.push("created_at > ?");
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

fn bind_params<'q>(mut query: MySqlQuery<'q>, params: &'q [Param]) -> MySqlQuery<'q> {
    for param in params {
        query = match param {
            Param::Text(value) => query.bind(value.as_str()),
            Param::Int(value) => query.bind(*value),
        };
    }
    query
}

fn row_to_entry(row: &MySqlRow) -> Result<Entry> {
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

fn upsert_query(entry: &Entry) -> Result<MySqlQuery<'static>> {
    let tags = serde_json::to_string(&entry.tags)?;
    let content = entry.content_json();
    let search_text = content.to_ascii_lowercase();
    Ok(sqlx::query(UPSERT_SQL)
        .bind(entry.id.clone())
        .bind(entry.batch_id.clone())
        .bind(entry.entry_type.as_str())
        .bind(content)
        .bind(search_text)
        .bind(tags)
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.duration)
        .bind(entry.memory_usage))
}

#[async_trait]
impl StorageAdapter for MysqlStorage {
    async fn initialize(&self) -> Result<()> {
        self.initialize_schema().await?;
        tracing::info!("MySQL storage initialized");
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

        if !options.tags.is_empty() {
            // Tag membership is checked here, so paging happens after filtering
            let sql = format!(
                "SELECT {} FROM debugscope_entries{} ORDER BY created_at DESC, seq DESC",
                SELECT_COLUMNS, clause
            );
            let rows = bind_params(sqlx::query(&sql), &params)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

            let mut filtered = Vec::new();
            for row in &rows {
                let entry = row_to_entry(row)?;
                if options.matches_tags(&entry) {
                    filtered.push(entry);
                }
            }
            return Ok(options.paginate(filtered));
        }

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
        "mysql"
    }
}
