//! The captured entry model

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Category of a captured event
///
/// The set is closed: every backend seeds its statistics with all of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Request,
    Query,
    Cache,
    Log,
    Exception,
    HttpClient,
    Event,
    Job,
    Schedule,
    Dump,
}

impl EntryType {
    /// Every entry type, in declaration order
    pub const ALL: [EntryType; 10] = [
        EntryType::Request,
        EntryType::Query,
        EntryType::Cache,
        EntryType::Log,
        EntryType::Exception,
        EntryType::HttpClient,
        EntryType::Event,
        EntryType::Job,
        EntryType::Schedule,
        EntryType::Dump,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Query => "query",
            Self::Cache => "cache",
            Self::Log => "log",
            Self::Exception => "exception",
            Self::HttpClient => "http_client",
            Self::Event => "event",
            Self::Job => "job",
            Self::Schedule => "schedule",
            Self::Dump => "dump",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntryType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown entry type: {}", s)))
    }
}

/// One captured runtime event
///
/// Entries are append-only: after creation the only mutation is the orchestrator
/// appending caller-supplied tags before the entry is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub batch_id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub content: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<i64>,
}

impl Entry {
    /// Create a new entry stamped with a fresh id and the current time
    pub fn new(entry_type: EntryType, batch_id: impl Into<String>, content: Value) -> Self {
        Self {
            id: generate_id(),
            batch_id: batch_id.into(),
            entry_type,
            content,
            tags: Vec::new(),
            created_at: now_millis(),
            duration: None,
            memory_usage: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_memory_usage(mut self, memory_usage: Option<i64>) -> Self {
        self.memory_usage = memory_usage;
        self
    }

    /// Override the creation timestamp (imports, fixtures)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.trunc_subsecs(3);
        self
    }

    /// Append tags that are not already present, preserving order
    pub fn append_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }

    /// Serialized form of the content, as stored and searched by every backend
    pub fn content_json(&self) -> String {
        serde_json::to_string(&self.content).unwrap_or_else(|_| "null".to_string())
    }
}

/// Generate a globally unique entry/batch identifier
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time at millisecond precision
///
/// All backends store milliseconds, so stamping at that precision keeps
/// `find(save(e)) == e` exact everywhere.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
