//! Ad-hoc value dump watcher

use debugscope_core::{Entry, EntryType, content::DumpContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Watcher, batch_or_new, default_true, request::default_max_body_size_kb, sanitize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_body_size_kb")]
    pub max_dump_size_kb: usize,
}

impl Default for DumpWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_dump_size_kb: default_max_body_size_kb(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DumpData {
    pub batch_id: Option<String>,
    pub value: Value,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl DumpData {
    pub fn new(value: Value) -> Self {
        Self {
            batch_id: None,
            value,
            file: None,
            line: None,
        }
    }

    /// Dump any serializable value; failures become the unserializable sentinel
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::new(sanitize::to_value_safe(value))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DumpWatcher {
    config: DumpWatcherConfig,
}

impl DumpWatcher {
    pub fn new(config: DumpWatcherConfig) -> Self {
        Self { config }
    }
}

impl Watcher for DumpWatcher {
    type Input = DumpData;

    fn entry_type(&self) -> EntryType {
        EntryType::Dump
    }

    fn record(&self, input: DumpData) -> Option<Entry> {
        if !self.config.enabled {
            return None;
        }

        let content = DumpContent {
            dump: sanitize::truncate_value(input.value, self.config.max_dump_size_kb),
            file: input.file,
            line: input.line,
        };

        Some(
            Entry::new(
                EntryType::Dump,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(vec!["dump".to_string()]),
        )
    }
}
