//! Application log watcher

use debugscope_core::{
    Entry, EntryType,
    content::{LogContent, LogLevel},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Watcher, batch_or_new, default_true, sanitize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Messages below this severity are dropped
    #[serde(default)]
    pub min_level: LogLevel,

    #[serde(default = "default_max_context_size_kb")]
    pub max_context_size_kb: usize,
}

pub(crate) fn default_max_context_size_kb() -> usize {
    16
}

impl Default for LogWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_level: LogLevel::default(),
            max_context_size_kb: default_max_context_size_kb(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogData {
    pub batch_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub context: Option<Value>,
    pub channel: Option<String>,
}

impl LogData {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            batch_id: None,
            level,
            message: message.into(),
            context: None,
            channel: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogWatcher {
    config: LogWatcherConfig,
}

impl LogWatcher {
    pub fn new(config: LogWatcherConfig) -> Self {
        Self { config }
    }

    /// Whether a message at `level` would be recorded
    pub fn accepts(&self, level: LogLevel) -> bool {
        self.config.enabled && level >= self.config.min_level
    }
}

impl Watcher for LogWatcher {
    type Input = LogData;

    fn entry_type(&self) -> EntryType {
        EntryType::Log
    }

    fn record(&self, input: LogData) -> Option<Entry> {
        if !self.accepts(input.level) {
            return None;
        }

        let tags = vec![format!("level:{}", input.level)];
        let max_kb = self.config.max_context_size_kb;
        let content = LogContent {
            level: input.level,
            message: input.message,
            context: input.context.map(|c| sanitize::truncate_value(c, max_kb)),
            channel: input.channel,
        };

        Some(
            Entry::new(
                EntryType::Log,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(tags),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_min_level_suppresses_lower() {
        let watcher = LogWatcher::new(LogWatcherConfig {
            min_level: LogLevel::Warn,
            ..Default::default()
        });
        assert!(watcher.record(LogData::new(LogLevel::Info, "chatty")).is_none());
        assert!(watcher.record(LogData::new(LogLevel::Warn, "careful")).is_some());
        assert!(watcher.record(LogData::new(LogLevel::Error, "bad")).is_some());
    }

    #[test]
    fn test_log_content_and_tags() {
        let entry = LogWatcher::default()
            .record(LogData {
                context: Some(json!({"user": 7})),
                channel: Some("app".to_string()),
                ..LogData::new(LogLevel::Info, "Hello World")
            })
            .unwrap();
        assert_eq!(entry.tags, vec!["level:info"]);
        assert_eq!(entry.content["message"], "Hello World");
        assert_eq!(entry.content["level"], "info");
        assert_eq!(entry.content["context"]["user"], 7);
        assert_eq!(entry.content["channel"], "app");
    }
}
