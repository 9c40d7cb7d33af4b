//! Background job watcher

use debugscope_core::{
    Entry, EntryType,
    content::{JobContent, JobStatus},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Watcher, batch_or_new, default_true, request::default_max_body_size_kb, sanitize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_body_size_kb")]
    pub max_data_size_kb: usize,
}

impl Default for JobWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_data_size_kb: default_max_body_size_kb(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobData {
    pub batch_id: Option<String>,
    pub name: String,
    pub queue: String,
    pub data: Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: Option<u32>,
    pub error: Option<String>,
    pub duration: Option<f64>,
}

impl JobData {
    pub fn new(name: impl Into<String>, status: JobStatus) -> Self {
        Self {
            batch_id: None,
            name: name.into(),
            queue: "default".to_string(),
            data: Value::Null,
            status,
            attempts: 1,
            max_attempts: None,
            error: None,
            duration: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobWatcher {
    config: JobWatcherConfig,
}

impl JobWatcher {
    pub fn new(config: JobWatcherConfig) -> Self {
        Self { config }
    }
}

impl Watcher for JobWatcher {
    type Input = JobData;

    fn entry_type(&self) -> EntryType {
        EntryType::Job
    }

    fn record(&self, input: JobData) -> Option<Entry> {
        if !self.config.enabled {
            return None;
        }

        let mut tags = vec![
            format!("job:{}", input.name),
            format!("queue:{}", input.queue),
            format!("status:{}", input.status.as_str()),
        ];
        if input.status == JobStatus::Failed {
            tags.push("failed".to_string());
        }

        let content = JobContent {
            name: input.name,
            queue: input.queue,
            data: sanitize::truncate_value(input.data, self.config.max_data_size_kb),
            status: input.status,
            attempts: input.attempts,
            max_attempts: input.max_attempts,
            error: input.error,
        };

        Some(
            Entry::new(
                EntryType::Job,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(tags)
            .with_duration(input.duration),
        )
    }
}
