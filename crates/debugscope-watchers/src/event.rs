//! Application event watcher

use debugscope_core::{Entry, EntryType, content::EventContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Watcher, batch_or_new, default_true, request::default_max_body_size_kb, sanitize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Events whose name contains any of these substrings are not recorded
    #[serde(default)]
    pub ignore_events: Vec<String>,

    #[serde(default = "default_max_body_size_kb")]
    pub max_payload_size_kb: usize,
}

impl Default for EventWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignore_events: Vec::new(),
            max_payload_size_kb: default_max_body_size_kb(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventData {
    pub batch_id: Option<String>,
    pub name: String,
    pub payload: Value,
    pub listeners: Vec<String>,
    pub broadcast: Option<bool>,
}

impl EventData {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            batch_id: None,
            name: name.into(),
            payload,
            listeners: Vec::new(),
            broadcast: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventWatcher {
    config: EventWatcherConfig,
}

impl EventWatcher {
    pub fn new(config: EventWatcherConfig) -> Self {
        Self { config }
    }
}

impl Watcher for EventWatcher {
    type Input = EventData;

    fn entry_type(&self) -> EntryType {
        EntryType::Event
    }

    fn record(&self, input: EventData) -> Option<Entry> {
        if !self.config.enabled
            || self
                .config
                .ignore_events
                .iter()
                .any(|p| !p.is_empty() && input.name.contains(p.as_str()))
        {
            return None;
        }

        let mut tags = vec![format!("event:{}", input.name)];
        if input.broadcast == Some(true) {
            tags.push("broadcast".to_string());
        }

        let content = EventContent {
            name: input.name,
            payload: sanitize::truncate_value(input.payload, self.config.max_payload_size_kb),
            listeners: input.listeners,
            broadcast: input.broadcast,
        };

        Some(
            Entry::new(
                EntryType::Event,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(tags),
        )
    }
}
