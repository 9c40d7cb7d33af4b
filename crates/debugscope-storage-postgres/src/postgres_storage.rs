//! PostgresStorage - StorageAdapter implementation for PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};

use crate::{config::PostgresStorageConfig, migrations};
use debugscope_core::{
    Entry, EntryType, Error, ListOptions, PaginatedResult, Result, StorageAdapter, StorageStats,
};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

const SELECT_COLUMNS: &str =
    "id, batch_id, entry_type, content, tags, created_at, duration, memory_usage";

const UPSERT_SQL: &str = r#"
    INSERT INTO debugscope_entries
        (id, batch_id, entry_type, content, tags, created_at, duration, memory_usage)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (id) DO UPDATE SET
        content = EXCLUDED.content,
        tags = EXCLUDED.tags,
        duration = EXCLUDED.duration,
        memory_usage = EXCLUDED.memory_usage
"#;

enum Param {
    Text(String),
    TextArray(Vec<String>),
    Time(DateTime<Utc>),
}

/// PostgreSQL storage backend
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Create a store with the default pool configuration
    ///
    /// # Errors
    /// - `Error::Config` if the URL is empty or cannot be parsed
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_config(database_url, PostgresStorageConfig::default())
    }

    /// Create a store with a custom pool configuration
    ///
    /// No connection is opened until the first query.
    pub fn with_config(database_url: &str, config: PostgresStorageConfig) -> Result<Self> {
        if database_url.trim().is_empty() {
            return Err(Error::Config(
                "PostgreSQL storage requires a connection string".to_string(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect_lazy(database_url)
            .map_err(|e| Error::Config(format!("Invalid PostgreSQL connection string: {}", e)))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool (useful for testing)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn build_filter(options: &ListOptions) -> (String, Vec<Param>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(entry_type) = options.entry_type {
            params.push(Param::Text(entry_type.as_str().to_string()));
            conditions.push(format!("entry_type = ${}", params.len()));
        }

        if let Some(batch_id) = &options.batch_id {
            params.push(Param::Text(batch_id.clone()));
            conditions.push(format!("batch_id = ${}", params.len()));
        }

        if !options.tags.is_empty() {
            params.push(Param::TextArray(options.tags.clone()));
            conditions.push(format!("tags && ${}::text[]", params.len()));
        }

        // lower() under the C collation folds ASCII letters only
        if let Some(pattern) = options.like_pattern() {
            params.push(Param::Text(pattern));
            conditions.push(format!(
                "lower(content COLLATE \"C\") LIKE ${} ESCAPE '\\'",
                params.len()
            ));
        }

        if let Some(before) = options.before {
            params.push(Param::Time(before));
            conditions.push(format!("created_at < ${}", params.len()));
        }

        if let Some(after) = options.after {
            params.push(Param::Time(after));
            conditions.push(format!("created_at > ${}", params.len()));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        (clause, params)
    }
}

fn bind_params<'q>(mut query: PgQuery<'q>, params: &'q [Param]) -> PgQuery<'q> {
    for param in params {
        query = match param {
            Param::Text(value) => query.bind(value.as_str()),
            Param::TextArray(values) => query.bind(values.as_slice()),
            Param::Time(value) => query.bind(*value),
        };
    }
    query
}

fn row_to_entry(row: &PgRow) -> Result<Entry> {
    let map_err = |e: sqlx::Error| Error::Database(e.to_string());

    let entry_type: String = row.try_get("entry_type").map_err(map_err)?;
    let content: String = row.try_get("content").map_err(map_err)?;

    Ok(Entry {
        id: row.try_get("id").map_err(map_err)?,
        batch_id: row.try_get("batch_id").map_err(map_err)?,
        entry_type: entry_type.parse()?,
        content: serde_json::from_str(&content)?,
        tags: row.try_get("tags").map_err(map_err)?,
        created_at: row.try_get("created_at").map_err(map_err)?,
        duration: row.try_get("duration").map_err(map_err)?,
        memory_usage: row.try_get("memory_usage").map_err(map_err)?,
    })
}

fn upsert_query(entry: &Entry) -> PgQuery<'static> {
    sqlx::query(UPSERT_SQL)
        .bind(entry.id.clone())
        .bind(entry.batch_id.clone())
        .bind(entry.entry_type.as_str())
        .bind(entry.content_json())
        .bind(entry.tags.clone())
        .bind(entry.created_at)
        .bind(entry.duration)
        .bind(entry.memory_usage)
}

#[async_trait]
impl StorageAdapter for PostgresStorage {
    async fn initialize(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await?;
        tracing::info!("PostgreSQL storage initialized");
        Ok(())
    }

    async fn save(&self, entry: &Entry) -> Result<()> {
        upsert_query(entry)
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
            upsert_query(entry)
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
        let sql = format!("SELECT {} FROM debugscope_entries WHERE id = $1", SELECT_COLUMNS);
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
            "SELECT {} FROM debugscope_entries{} ORDER BY created_at DESC, seq DESC LIMIT ${} OFFSET ${}",
            SELECT_COLUMNS,
            clause,
            params.len() + 1,
            params.len() + 2
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
            "SELECT {} FROM debugscope_entries WHERE batch_id = $1 ORDER BY created_at ASC, seq ASC",
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
        let result = sqlx::query("DELETE FROM debugscope_entries WHERE created_at < $1")
            .bind(before)
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
            let oldest: DateTime<Utc> = row.try_get("oldest").map_err(map_err)?;
            let newest: DateTime<Utc> = row.try_get("newest").map_err(map_err)?;

            stats.add(entry_type.parse::<EntryType>()?, total as u64);
            stats.observe(oldest);
            stats.observe(newest);
        }
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
