use serde::{Deserialize, Serialize};
use std::path::Path;

use debugscope::ScopeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body, in bytes
    #[serde(default = "default_body_limit", rename = "bodyLimit")]
    pub body_limit: usize,

    /// Ceiling for each top-level field of ingested content, in KB
    #[serde(default = "default_ingest_max_kb", rename = "ingestMaxContentKb")]
    pub ingest_max_content_kb: usize,

    #[serde(flatten)]
    pub scope: ScopeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit: default_body_limit(),
            ingest_max_content_kb: default_ingest_max_kb(),
            scope: ScopeConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        self.scope.merge_env();

        if let Ok(val) = std::env::var("DEBUGSCOPE_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid DEBUGSCOPE_PORT '{}'", val),
            }
        }

        if let Ok(val) = std::env::var("DEBUGSCOPE_HOST") {
            self.host = val;
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8085
}

fn default_body_limit() -> usize {
    2 * 1024 * 1024
}

fn default_ingest_max_kb() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use debugscope::StorageDriver;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_flattened_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "port: 9000\nstorage:\n  driver: sqlite\n  connection: /tmp/scope.db\nretention:\n  hours: 12"
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.scope.storage.driver, StorageDriver::Sqlite);
        assert_eq!(config.scope.retention.hours, 12.0);
        assert_eq!(config.ingest_max_content_kb, 64);
    }

    #[test]
    #[serial]
    fn test_merge_env() {
        unsafe {
            std::env::set_var("DEBUGSCOPE_PORT", "9911");
            std::env::set_var("DEBUGSCOPE_HOST", "0.0.0.0");
            std::env::set_var("DEBUGSCOPE_LOG_LEVEL", "debug");
        }

        let mut config = ServerConfig::default();
        config.merge_env();

        unsafe {
            std::env::remove_var("DEBUGSCOPE_PORT");
            std::env::remove_var("DEBUGSCOPE_HOST");
            std::env::remove_var("DEBUGSCOPE_LOG_LEVEL");
        }

        assert_eq!(config.port, 9911);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.scope.logging.level, "debug");
    }
}
