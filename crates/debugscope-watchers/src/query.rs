//! Database query watcher

use debugscope_core::{Entry, EntryType, content::QueryContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Watcher, batch_or_new, default_true, sanitize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Queries strictly slower than this are tagged `slow`
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: f64,

    /// Queries whose SQL contains any of these substrings are not recorded
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    #[serde(default = "default_max_binding_size_kb")]
    pub max_binding_size_kb: usize,
}

fn default_slow_threshold_ms() -> f64 {
    100.0
}

// Our own storage traffic would otherwise feed back into itself.
fn default_ignore_patterns() -> Vec<String> {
    vec!["debugscope_entries".to_string()]
}

fn default_max_binding_size_kb() -> usize {
    4
}

impl Default for QueryWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_threshold_ms: default_slow_threshold_ms(),
            ignore_patterns: default_ignore_patterns(),
            max_binding_size_kb: default_max_binding_size_kb(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryData {
    pub batch_id: Option<String>,
    pub sql: String,
    pub bindings: Vec<Value>,
    pub connection: String,
    pub database: Option<String>,
    pub row_count: Option<u64>,
    pub duration: Option<f64>,
}

impl QueryData {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            batch_id: None,
            sql: sql.into(),
            bindings: Vec::new(),
            connection: "default".to_string(),
            database: None,
            row_count: None,
            duration: None,
        }
    }
}

/// Lowercased leading keyword of a statement (`select`, `insert`, ...)
pub fn sql_verb(sql: &str) -> Option<String> {
    let verb: String = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if verb.is_empty() {
        None
    } else {
        Some(verb.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryWatcher {
    config: QueryWatcherConfig,
}

impl QueryWatcher {
    pub fn new(config: QueryWatcherConfig) -> Self {
        Self { config }
    }

    pub fn is_slow(&self, duration: Option<f64>) -> bool {
        duration.is_some_and(|d| d > self.config.slow_threshold_ms)
    }
}

impl Watcher for QueryWatcher {
    type Input = QueryData;

    fn entry_type(&self) -> EntryType {
        EntryType::Query
    }

    fn record(&self, input: QueryData) -> Option<Entry> {
        if !self.config.enabled
            || self
                .config
                .ignore_patterns
                .iter()
                .any(|p| !p.is_empty() && input.sql.contains(p.as_str()))
        {
            return None;
        }

        let slow = self.is_slow(input.duration);
        let mut tags = Vec::new();
        if let Some(verb) = sql_verb(&input.sql) {
            tags.push(format!("query:{}", verb));
        }
        if slow {
            tags.push("slow".to_string());
        }

        let max_kb = self.config.max_binding_size_kb;
        let content = QueryContent {
            sql: input.sql,
            bindings: input
                .bindings
                .into_iter()
                .map(|b| sanitize::truncate_value(b, max_kb))
                .collect(),
            connection: input.connection,
            database: input.database,
            slow,
            row_count: input.row_count,
        };

        Some(
            Entry::new(
                EntryType::Query,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(tags)
            .with_duration(input.duration),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timed(sql: &str, duration: f64) -> QueryData {
        QueryData {
            duration: Some(duration),
            ..QueryData::new(sql)
        }
    }

    #[test]
    fn test_slow_threshold_is_strict() {
        let watcher = QueryWatcher::new(QueryWatcherConfig {
            slow_threshold_ms: 100.0,
            ..Default::default()
        });

        let at = watcher.record(timed("SELECT 1", 100.0)).unwrap();
        assert_eq!(at.tags, vec!["query:select"]);
        assert_eq!(at.content["slow"], false);

        let over = watcher.record(timed("SELECT 1", 101.0)).unwrap();
        assert_eq!(over.tags, vec!["query:select", "slow"]);
        assert_eq!(over.content["slow"], true);
    }

    #[test]
    fn test_sql_verb() {
        assert_eq!(sql_verb("  insert into t values (1)").as_deref(), Some("insert"));
        assert_eq!(sql_verb("(SELECT 1) UNION (SELECT 2)").as_deref(), Some("select"));
        assert_eq!(sql_verb("WITH x AS (SELECT 1) SELECT * FROM x").as_deref(), Some("with"));
        assert_eq!(sql_verb("   "), None);
    }

    #[test]
    fn test_own_storage_queries_ignored() {
        let watcher = QueryWatcher::default();
        assert!(
            watcher
                .record(QueryData::new("INSERT INTO debugscope_entries (id) VALUES ($1)"))
                .is_none()
        );
    }

    #[test]
    fn test_bindings_truncated_individually() {
        let watcher = QueryWatcher::new(QueryWatcherConfig {
            max_binding_size_kb: 1,
            ..Default::default()
        });
        let entry = watcher
            .record(QueryData {
                bindings: vec![json!(7), json!("b".repeat(2000))],
                ..QueryData::new("UPDATE users SET bio = ? WHERE id = ?")
            })
            .unwrap();
        assert_eq!(entry.content["bindings"][0], 7);
        assert_eq!(entry.content["bindings"][1], "[TRUNCATED: 2002 bytes]");
        assert_eq!(entry.content["connection"], "default");
    }
}
