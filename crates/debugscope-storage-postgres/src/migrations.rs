//! Versioned schema migrations
//!
//! Applied versions are tracked in `debugscope_schema_migrations` so each runs once.

use debugscope_core::{Error, Result};
use sqlx::PgPool;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Migration {
    /// Sequential version number
    pub version: i32,
    pub description: &'static str,
    /// A single SQL statement
    pub up_sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create entries table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS debugscope_entries (
                seq BIGSERIAL PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                batch_id TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL,
                duration DOUBLE PRECISION,
                memory_usage BIGINT
            )
        "#,
    },
    Migration {
        version: 2,
        description: "Index entries by batch",
        up_sql: "CREATE INDEX IF NOT EXISTS idx_debugscope_entries_batch ON debugscope_entries (batch_id, created_at)",
    },
    Migration {
        version: 3,
        description: "Index entries by type",
        up_sql: "CREATE INDEX IF NOT EXISTS idx_debugscope_entries_type ON debugscope_entries (entry_type, created_at DESC)",
    },
    Migration {
        version: 4,
        description: "Index entries by creation time",
        up_sql: "CREATE INDEX IF NOT EXISTS idx_debugscope_entries_created ON debugscope_entries (created_at DESC, seq DESC)",
    },
    Migration {
        version: 5,
        description: "GIN index on tags",
        up_sql: "CREATE INDEX IF NOT EXISTS idx_debugscope_entries_tags ON debugscope_entries USING GIN (tags)",
    },
];

/// Apply every migration not yet recorded
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS debugscope_schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to create migrations table: {}", e)))?;

    let applied: Vec<i32> = sqlx::query_scalar("SELECT version FROM debugscope_schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to fetch applied migrations: {}", e)))?;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            debug!(version = migration.version, "Migration already applied");
            continue;
        }

        info!(
            "Applying migration {}: {}",
            migration.version, migration.description
        );

        sqlx::query(migration.up_sql)
            .execute(pool)
            .await
            .map_err(|e| {
                Error::Database(format!(
                    "Failed to apply migration {}: {}",
                    migration.version, e
                ))
            })?;

        sqlx::query(
            "INSERT INTO debugscope_schema_migrations (version, description) VALUES ($1, $2)
                ON CONFLICT (version) DO NOTHING",
        )
        .bind(migration.version)
        .bind(migration.description)
        .execute(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to record migration: {}", e)))?;
    }

    Ok(())
}

/// Highest applied migration version, or `None` on a fresh database
pub async fn get_current_version(pool: &PgPool) -> Result<Option<i32>> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'debugscope_schema_migrations')",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to check migrations table: {}", e)))?;

    if !exists {
        return Ok(None);
    }

    sqlx::query_scalar("SELECT MAX(version) FROM debugscope_schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to read schema version: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, i as i32 + 1);
        }
    }

    #[test]
    fn test_migrations_are_single_statements() {
        for migration in MIGRATIONS {
            assert!(!migration.description.is_empty());
            assert!(!migration.up_sql.trim().trim_end_matches(';').contains(';'));
        }
    }
}
