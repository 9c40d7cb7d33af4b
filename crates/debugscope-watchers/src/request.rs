//! Inbound HTTP request watcher

use debugscope_core::{
    Entry, EntryType,
    content::{Headers, RequestContent, ResponseContent},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    Watcher, batch_or_new, default_true,
    sanitize::{self, Redactor},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path prefixes that are never recorded
    #[serde(default = "default_ignore_paths")]
    pub ignore_paths: Vec<String>,

    /// Header names (and body keys) replaced with the redaction sentinel
    #[serde(default = "default_redact_headers")]
    pub redact_headers: Vec<String>,

    #[serde(default = "default_max_body_size_kb")]
    pub max_body_size_kb: usize,

    #[serde(default = "default_true")]
    pub capture_response_body: bool,
}

fn default_ignore_paths() -> Vec<String> {
    vec!["/debugscope".to_string()]
}

pub(crate) fn default_redact_headers() -> Vec<String> {
    ["authorization", "cookie", "set-cookie", "x-api-key", "x-csrf-token"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn default_max_body_size_kb() -> usize {
    64
}

impl Default for RequestWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignore_paths: default_ignore_paths(),
            redact_headers: default_redact_headers(),
            max_body_size_kb: default_max_body_size_kb(),
            capture_response_body: true,
        }
    }
}

/// One completed request/response pair
#[derive(Debug, Clone)]
pub struct RequestData {
    pub batch_id: Option<String>,
    pub method: String,
    pub url: String,
    pub path: String,
    pub query: Map<String, Value>,
    pub headers: Headers,
    pub body: Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub session: Value,
    pub status: u16,
    pub response_headers: Headers,
    pub response_body: Value,
    pub duration: Option<f64>,
    pub memory_usage: Option<i64>,
}

impl RequestData {
    /// A `200` request with the path derived from `url`
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let path = url.split(['?', '#']).next().unwrap_or_default().to_string();
        Self {
            batch_id: None,
            method: method.into(),
            url,
            path,
            query: Map::new(),
            headers: Headers::new(),
            body: Value::Null,
            ip: None,
            user_agent: None,
            session: Value::Null,
            status: 200,
            response_headers: Headers::new(),
            response_body: Value::Null,
            duration: None,
            memory_usage: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestWatcher {
    config: RequestWatcherConfig,
    redactor: Redactor,
}

impl Default for RequestWatcher {
    fn default() -> Self {
        Self::new(RequestWatcherConfig::default())
    }
}

impl RequestWatcher {
    pub fn new(config: RequestWatcherConfig) -> Self {
        let redactor = Redactor::new(&config.redact_headers);
        Self { config, redactor }
    }

    pub fn config(&self) -> &RequestWatcherConfig {
        &self.config
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.config
            .ignore_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }
}

/// `method:`, `status:`, `error` for 4xx/5xx and `server-error` for 5xx
pub fn request_tags(method: &str, status: u16) -> Vec<String> {
    let mut tags = vec![
        format!("method:{}", method.to_ascii_uppercase()),
        format!("status:{}", status),
    ];
    if status >= 400 {
        tags.push("error".to_string());
    }
    if status >= 500 {
        tags.push("server-error".to_string());
    }
    tags
}

impl Watcher for RequestWatcher {
    type Input = RequestData;

    fn entry_type(&self) -> EntryType {
        EntryType::Request
    }

    fn record(&self, input: RequestData) -> Option<Entry> {
        if !self.config.enabled || self.is_ignored(&input.path) {
            return None;
        }

        let max_kb = self.config.max_body_size_kb;
        let user_agent = input
            .user_agent
            .or_else(|| sanitize::header_value(&input.headers, "user-agent").map(String::from));

        let size = match &input.response_body {
            Value::Null => 0,
            body => sanitize::serialized_size(body) as u64,
        };
        let response_body = if self.config.capture_response_body {
            sanitize::truncate_value(self.redactor.value(input.response_body), max_kb)
        } else {
            Value::Null
        };

        let content = RequestContent {
            method: input.method.to_ascii_uppercase(),
            url: input.url,
            path: input.path,
            query: input.query,
            headers: self.redactor.headers(&input.headers),
            body: sanitize::truncate_value(self.redactor.value(input.body), max_kb),
            ip: input.ip,
            user_agent,
            session: sanitize::truncate_value(input.session, max_kb),
            response: ResponseContent {
                status: input.status,
                headers: self.redactor.headers(&input.response_headers),
                body: response_body,
                size: Some(size),
            },
        };

        let tags = request_tags(&content.method, input.status);
        Some(
            Entry::new(
                EntryType::Request,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(tags)
            .with_duration(input.duration)
            .with_memory_usage(input.memory_usage),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_error_is_not_server_error() {
        let entry = RequestWatcher::default()
            .record(RequestData {
                status: 404,
                ..RequestData::new("get", "/missing")
            })
            .unwrap();
        assert_eq!(entry.tags, vec!["method:GET", "status:404", "error"]);
    }

    #[test]
    fn test_server_error_tags() {
        let entry = RequestWatcher::default()
            .record(RequestData {
                status: 503,
                ..RequestData::new("POST", "/jobs")
            })
            .unwrap();
        assert!(entry.tags.contains(&"error".to_string()));
        assert!(entry.tags.contains(&"server-error".to_string()));
    }

    #[test]
    fn test_success_has_no_error_tag() {
        let entry = RequestWatcher::default()
            .record(RequestData::new("GET", "/ok"))
            .unwrap();
        assert_eq!(entry.tags, vec!["method:GET", "status:200"]);
    }

    #[test]
    fn test_headers_redacted() {
        let mut headers = Headers::new();
        headers.insert("Authorization".to_string(), "Bearer secret".to_string());
        headers.insert("User-Agent".to_string(), "curl/8".to_string());

        let entry = RequestWatcher::default()
            .record(RequestData {
                headers,
                ..RequestData::new("GET", "/users?page=2")
            })
            .unwrap();

        assert_eq!(entry.content["headers"]["Authorization"], sanitize::REDACTED);
        assert_eq!(entry.content["userAgent"], "curl/8");
        assert_eq!(entry.content["path"], "/users");
        assert_eq!(entry.content["url"], "/users?page=2");
        assert_eq!(entry.entry_type, EntryType::Request);
    }

    #[test]
    fn test_ignored_path_prefix() {
        let watcher = RequestWatcher::default();
        assert!(watcher.record(RequestData::new("GET", "/debugscope/api/entries")).is_none());
    }

    #[test]
    fn test_disabled_records_nothing() {
        let watcher = RequestWatcher::new(RequestWatcherConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(watcher.record(RequestData::new("GET", "/")).is_none());
    }

    #[test]
    fn test_large_body_truncated() {
        let watcher = RequestWatcher::new(RequestWatcherConfig {
            max_body_size_kb: 1,
            ..Default::default()
        });
        let entry = watcher
            .record(RequestData {
                body: json!({"blob": "z".repeat(4096)}),
                response_body: json!({"ok": true}),
                ..RequestData::new("POST", "/upload")
            })
            .unwrap();
        assert!(
            entry.content["body"]
                .as_str()
                .unwrap()
                .starts_with("[TRUNCATED: ")
        );
        assert_eq!(entry.content["response"]["body"]["ok"], true);
        assert_eq!(entry.content["response"]["size"], 11);
    }

    #[test]
    fn test_uses_given_batch() {
        let entry = RequestWatcher::default()
            .record(RequestData {
                batch_id: Some("b1".to_string()),
                duration: Some(12.0),
                ..RequestData::new("GET", "/")
            })
            .unwrap();
        assert_eq!(entry.batch_id, "b1");
        assert_eq!(entry.duration, Some(12.0));
    }
}
