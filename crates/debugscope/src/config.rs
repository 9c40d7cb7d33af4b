//! Recorder configuration
//!
//! Loaded from YAML or TOML (chosen by file extension) and overridden by
//! `DEBUGSCOPE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use debugscope_core::{Error, Result};
use debugscope_realtime::RealtimeConfig;
use debugscope_watchers::WatchersConfig;

/// Longest accepted retention horizon (about a century)
pub const MAX_RETENTION_HOURS: f64 = 1_000_000.0;

/// Longest accepted sweep interval (one year)
pub const MAX_INTERVAL_MINUTES: u64 = 525_600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeConfig {
    /// Master switch; a disabled scope records nothing
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub realtime: RealtimeSettings,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub watchers: WatchersConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    #[default]
    Memory,
    Sqlite,
    Postgres,
    Mysql,
}

impl StorageDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }
}

impl fmt::Display for StorageDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            other => Err(Error::Config(format!("Unknown storage driver: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub driver: StorageDriver,

    /// Database URL for postgres/mysql, file path for sqlite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Capacity of the memory backend
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Connection pool ceiling for the relational backends
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entries older than this are pruned
    #[serde(default = "default_retention_hours")]
    pub hours: f64,

    #[serde(default = "default_prune_interval_minutes")]
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default = "default_api_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Let sqlx statement logging through
    #[serde(default)]
    pub log_sql: bool,

    /// Record the host application's tracing events as log entries
    #[serde(default = "default_true")]
    pub capture_tracing: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageConfig::default(),
            retention: RetentionConfig::default(),
            realtime: RealtimeSettings::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
            watchers: WatchersConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::default(),
            connection: None,
            max_entries: default_max_entries(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hours: default_retention_hours(),
            interval_minutes: default_prune_interval_minutes(),
        }
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_seconds: default_heartbeat_seconds(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: default_api_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql: false,
            capture_tracing: true,
        }
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

impl RealtimeSettings {
    pub fn to_realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_seconds),
            buffer_size: self.buffer_size,
        }
    }
}

impl ScopeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            // Default to YAML
            _ => Self::from_yaml(&contents),
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("Invalid YAML config: {}", e)))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Some(enabled) = env_parse::<bool>("DEBUGSCOPE_ENABLED") {
            self.enabled = enabled;
        }

        // Storage
        if let Ok(val) = std::env::var("DEBUGSCOPE_STORAGE_DRIVER") {
            match val.parse::<StorageDriver>() {
                Ok(driver) => self.storage.driver = driver,
                Err(_) => warn!("Invalid DEBUGSCOPE_STORAGE_DRIVER '{}', keeping {}", val, self.storage.driver),
            }
        }
        if let Ok(val) = std::env::var("DEBUGSCOPE_STORAGE_CONNECTION") {
            self.storage.connection = Some(val);
        }
        if let Some(max) = env_parse::<usize>("DEBUGSCOPE_MAX_ENTRIES") {
            self.storage.max_entries = max;
        }

        // Retention
        if let Some(enabled) = env_parse::<bool>("DEBUGSCOPE_RETENTION_ENABLED") {
            self.retention.enabled = enabled;
        }
        if let Some(hours) = env_parse::<f64>("DEBUGSCOPE_RETENTION_HOURS") {
            self.retention.hours = hours;
        }
        if let Some(minutes) = env_parse::<u64>("DEBUGSCOPE_PRUNE_INTERVAL_MINUTES") {
            self.retention.interval_minutes = minutes;
        }

        // Realtime
        if let Some(seconds) = env_parse::<u64>("DEBUGSCOPE_HEARTBEAT_SECONDS") {
            self.realtime.heartbeat_seconds = seconds;
        }

        if let Ok(val) = std::env::var("DEBUGSCOPE_API_PREFIX") {
            self.api.prefix = val;
        }

        // Logging
        if let Ok(val) = std::env::var("DEBUGSCOPE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(log_sql) = env_parse::<bool>("DEBUGSCOPE_LOG_SQL") {
            self.logging.log_sql = log_sql;
        }
    }

    /// Reject settings that would make the recorder unusable
    ///
    /// # Errors
    /// - `Error::Config` describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.storage.driver == StorageDriver::Memory && self.storage.max_entries == 0 {
            return Err(Error::Config("storage.maxEntries must be greater than 0".to_string()));
        }
        if matches!(self.storage.driver, StorageDriver::Postgres | StorageDriver::Mysql)
            && self.storage.connection.as_deref().is_none_or(|c| c.trim().is_empty())
        {
            return Err(Error::Config(format!(
                "storage.connection is required for the {} driver",
                self.storage.driver
            )));
        }
        if self.storage.max_connections == 0 {
            return Err(Error::Config("storage.maxConnections must be greater than 0".to_string()));
        }
        if !self.retention.hours.is_finite()
            || self.retention.hours < 0.0
            || self.retention.hours > MAX_RETENTION_HOURS
        {
            return Err(Error::Config(format!(
                "retention.hours must be between 0 and {}",
                MAX_RETENTION_HOURS
            )));
        }
        if self.retention.interval_minutes == 0 || self.retention.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(Error::Config(format!(
                "retention.intervalMinutes must be between 1 and {}",
                MAX_INTERVAL_MINUTES
            )));
        }
        if self.realtime.heartbeat_seconds == 0 {
            return Err(Error::Config("realtime.heartbeatSeconds must be greater than 0".to_string()));
        }
        if self.realtime.buffer_size == 0 {
            return Err(Error::Config("realtime.bufferSize must be greater than 0".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let val = std::env::var(name).ok()?;
    match val.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid {} '{}'", name, val);
            None
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    debugscope_storage_memory::DEFAULT_MAX_ENTRIES
}

fn default_max_connections() -> u32 {
    10
}

fn default_retention_hours() -> f64 {
    24.0
}

fn default_prune_interval_minutes() -> u64 {
    60
}

fn default_heartbeat_seconds() -> u64 {
    30
}

fn default_buffer_size() -> usize {
    64
}

fn default_api_prefix() -> String {
    debugscope_api::DEFAULT_PREFIX.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ScopeConfig::default();
        assert!(config.enabled);
        assert_eq!(config.storage.driver, StorageDriver::Memory);
        assert_eq!(config.storage.max_entries, 1000);
        assert_eq!(config.retention.hours, 24.0);
        assert_eq!(config.retention.interval(), Duration::from_secs(3600));
        assert_eq!(config.api.prefix, "/api");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_config() {
        let config = ScopeConfig::from_yaml(
            r#"
storage:
  driver: sqlite
  connection: /tmp/debugscope.db
retention:
  hours: 2
watchers:
  query:
    slowThresholdMs: 50
"#,
        )
        .unwrap();

        assert_eq!(config.storage.driver, StorageDriver::Sqlite);
        assert_eq!(config.storage.connection.as_deref(), Some("/tmp/debugscope.db"));
        assert_eq!(config.retention.hours, 2.0);
        assert_eq!(config.retention.interval_minutes, 60);
        assert_eq!(config.watchers.query.slow_threshold_ms, 50.0);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "enabled = false\n[storage]\ndriver = \"postgres\"\nconnection = \"postgres://localhost/db\""
        )
        .unwrap();

        let config = ScopeConfig::from_file(file.path()).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.storage.driver, StorageDriver::Postgres);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "storage: [not, a, map]").unwrap();
        assert!(matches!(ScopeConfig::from_file(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = ScopeConfig::default();
        config.storage.driver = StorageDriver::Mysql;
        assert!(config.validate().is_err());
        config.storage.connection = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = ScopeConfig::default();
        config.retention.interval_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = ScopeConfig::default();
        config.storage.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = ScopeConfig::default();
        config.retention.hours = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retention_bounds() {
        let mut config = ScopeConfig::default();
        config.retention.hours = 1e10;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        config.retention.hours = MAX_RETENTION_HOURS;
        assert!(config.validate().is_ok());

        config.retention.interval_minutes = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.retention.interval(), Duration::from_secs(u64::MAX));

        config.retention.interval_minutes = MAX_INTERVAL_MINUTES;
        assert!(config.validate().is_ok());
        assert_eq!(config.retention.interval(), Duration::from_secs(MAX_INTERVAL_MINUTES * 60));
    }

    #[test]
    fn test_driver_parsing() {
        assert_eq!("PostgreSQL".parse::<StorageDriver>().unwrap(), StorageDriver::Postgres);
        assert!("oracle".parse::<StorageDriver>().is_err());
    }

    #[test]
    #[serial]
    fn test_merge_env_overrides() {
        unsafe {
            std::env::set_var("DEBUGSCOPE_STORAGE_DRIVER", "sqlite");
            std::env::set_var("DEBUGSCOPE_RETENTION_HOURS", "6");
            std::env::set_var("DEBUGSCOPE_MAX_ENTRIES", "not-a-number");
            std::env::set_var("DEBUGSCOPE_LOG_SQL", "true");
        }

        let mut config = ScopeConfig::default();
        config.merge_env();

        unsafe {
            std::env::remove_var("DEBUGSCOPE_STORAGE_DRIVER");
            std::env::remove_var("DEBUGSCOPE_RETENTION_HOURS");
            std::env::remove_var("DEBUGSCOPE_MAX_ENTRIES");
            std::env::remove_var("DEBUGSCOPE_LOG_SQL");
        }

        assert_eq!(config.storage.driver, StorageDriver::Sqlite);
        assert_eq!(config.retention.hours, 6.0);
        assert_eq!(config.storage.max_entries, 1000);
        assert!(config.logging.log_sql);
    }

    #[test]
    #[serial]
    fn test_merge_env_invalid_driver_keeps_current() {
        unsafe {
            std::env::set_var("DEBUGSCOPE_STORAGE_DRIVER", "oracle");
        }
        let mut config = ScopeConfig::default();
        config.merge_env();
        unsafe {
            std::env::remove_var("DEBUGSCOPE_STORAGE_DRIVER");
        }
        assert_eq!(config.storage.driver, StorageDriver::Memory);
    }
}
