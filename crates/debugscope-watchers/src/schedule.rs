//! Scheduled task watcher

use chrono::{DateTime, Utc};
use debugscope_core::{
    Entry, EntryType,
    content::{ScheduleContent, ScheduleStatus},
};
use serde::{Deserialize, Serialize};

use crate::{Watcher, batch_or_new, default_true, request::default_max_body_size_kb, sanitize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_body_size_kb")]
    pub max_output_size_kb: usize,
}

impl Default for ScheduleWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_output_size_kb: default_max_body_size_kb(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleData {
    pub batch_id: Option<String>,
    pub name: String,
    pub expression: String,
    pub status: ScheduleStatus,
    pub output: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
}

impl ScheduleData {
    pub fn new(name: impl Into<String>, expression: impl Into<String>, status: ScheduleStatus) -> Self {
        Self {
            batch_id: None,
            name: name.into(),
            expression: expression.into(),
            status,
            output: None,
            next_run_at: None,
            duration: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleWatcher {
    config: ScheduleWatcherConfig,
}

impl ScheduleWatcher {
    pub fn new(config: ScheduleWatcherConfig) -> Self {
        Self { config }
    }
}

impl Watcher for ScheduleWatcher {
    type Input = ScheduleData;

    fn entry_type(&self) -> EntryType {
        EntryType::Schedule
    }

    fn record(&self, input: ScheduleData) -> Option<Entry> {
        if !self.config.enabled {
            return None;
        }

        let tags = vec![
            format!("schedule:{}", input.name),
            format!("status:{}", input.status.as_str()),
        ];
        let max_kb = self.config.max_output_size_kb;
        let content = ScheduleContent {
            name: input.name,
            expression: input.expression,
            status: input.status,
            output: input.output.map(|o| sanitize::truncate_string(o, max_kb)),
            next_run_at: input.next_run_at,
        };

        Some(
            Entry::new(
                EntryType::Schedule,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(tags)
            .with_duration(input.duration),
        )
    }
}
