//! Cache operation watcher

use debugscope_core::{
    Entry, EntryType,
    content::{CacheContent, CacheOperation},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Watcher, batch_or_new, default_true, sanitize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_value_size_kb")]
    pub max_value_size_kb: usize,

    /// Key prefixes that are never recorded
    #[serde(default)]
    pub ignore_keys: Vec<String>,
}

fn default_max_value_size_kb() -> usize {
    1
}

impl Default for CacheWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_value_size_kb: default_max_value_size_kb(),
            ignore_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheData {
    pub batch_id: Option<String>,
    pub key: String,
    pub value: Option<Value>,
    pub operation: CacheOperation,
    pub driver: String,
    pub ttl: Option<u64>,
    pub tags: Option<Vec<String>>,
    /// Explicit hit/miss for reads; derived from `value` when absent
    pub hit: Option<bool>,
    pub duration: Option<f64>,
}

impl CacheData {
    pub fn new(operation: CacheOperation, key: impl Into<String>) -> Self {
        Self {
            batch_id: None,
            key: key.into(),
            value: None,
            operation,
            driver: "memory".to_string(),
            ttl: None,
            tags: None,
            hit: None,
            duration: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheWatcher {
    config: CacheWatcherConfig,
}

impl CacheWatcher {
    pub fn new(config: CacheWatcherConfig) -> Self {
        Self { config }
    }
}

impl Watcher for CacheWatcher {
    type Input = CacheData;

    fn entry_type(&self) -> EntryType {
        EntryType::Cache
    }

    fn record(&self, input: CacheData) -> Option<Entry> {
        if !self.config.enabled
            || self
                .config
                .ignore_keys
                .iter()
                .any(|p| !p.is_empty() && input.key.starts_with(p.as_str()))
        {
            return None;
        }

        let mut tags = vec![format!("operation:{}", input.operation.as_str())];
        if input.operation == CacheOperation::Get {
            let hit = input.hit.unwrap_or(input.value.is_some());
            tags.push(if hit { "hit" } else { "miss" }.to_string());
        }

        let max_kb = self.config.max_value_size_kb;
        let content = CacheContent {
            key: input.key,
            value: input.value.map(|v| sanitize::truncate_value(v, max_kb)),
            operation: input.operation,
            driver: input.driver,
            ttl: input.ttl,
            tags: input.tags,
        };

        Some(
            Entry::new(
                EntryType::Cache,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(tags)
            .with_duration(input.duration),
        )
    }
}
