//! Connection pool settings for the PostgreSQL backend

use std::time::Duration;

/// Configuration for the PostgreSQL connection pool
///
/// # Example
/// ```
/// use debugscope_storage_postgres::PostgresStorageConfig;
///
/// let config = PostgresStorageConfig::default()
///     .with_max_connections(10)
///     .with_min_connections(0);
/// ```
#[derive(Debug, Clone)]
pub struct PostgresStorageConfig {
    pub max_connections: u32,

    /// Connections kept open while idle
    pub min_connections: u32,

    pub acquire_timeout: Duration,

    pub idle_timeout: Duration,

    /// Connections are recycled after this long
    pub max_lifetime: Duration,
}

impl Default for PostgresStorageConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PostgresStorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }
}
