//! Outbound HTTP call watcher

use debugscope_core::{
    Entry, EntryType,
    content::{Headers, HttpClientContent, ResponseContent},
};
use http::Uri;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Watcher, batch_or_new, default_true,
    request::{default_max_body_size_kb, default_redact_headers},
    sanitize::{self, Redactor},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpClientWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hosts that are never recorded (exact, case-insensitive)
    #[serde(default)]
    pub ignore_hosts: Vec<String>,

    #[serde(default = "default_redact_headers")]
    pub redact_headers: Vec<String>,

    #[serde(default = "default_max_body_size_kb")]
    pub max_body_size_kb: usize,
}

impl Default for HttpClientWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignore_hosts: Vec::new(),
            redact_headers: default_redact_headers(),
            max_body_size_kb: default_max_body_size_kb(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponseData {
    pub status: u16,
    pub headers: Headers,
    pub body: Value,
}

impl HttpResponseData {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientData {
    pub batch_id: Option<String>,
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Value>,
    /// `None` when the call failed before a response arrived
    pub response: Option<HttpResponseData>,
    pub duration: Option<f64>,
}

impl HttpClientData {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            batch_id: None,
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            body: None,
            response: None,
            duration: None,
        }
    }

    pub fn with_response(mut self, response: HttpResponseData) -> Self {
        self.response = Some(response);
        self
    }
}

/// Lowercased host of an absolute URL
pub fn url_host(url: &str) -> Option<String> {
    url.parse::<Uri>()
        .ok()?
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase())
}

#[derive(Debug, Clone)]
pub struct HttpClientWatcher {
    config: HttpClientWatcherConfig,
    redactor: Redactor,
}

impl Default for HttpClientWatcher {
    fn default() -> Self {
        Self::new(HttpClientWatcherConfig::default())
    }
}

impl HttpClientWatcher {
    pub fn new(config: HttpClientWatcherConfig) -> Self {
        let redactor = Redactor::new(&config.redact_headers);
        Self { config, redactor }
    }
}

impl Watcher for HttpClientWatcher {
    type Input = HttpClientData;

    fn entry_type(&self) -> EntryType {
        EntryType::HttpClient
    }

    fn record(&self, input: HttpClientData) -> Option<Entry> {
        if !self.config.enabled {
            return None;
        }

        let host = url_host(&input.url);
        if let Some(host) = &host
            && self
                .config
                .ignore_hosts
                .iter()
                .any(|h| h.eq_ignore_ascii_case(host))
        {
            return None;
        }

        let mut tags = Vec::new();
        if let Some(host) = &host {
            tags.push(format!("host:{}", host));
        }
        match &input.response {
            Some(response) => {
                tags.push(format!("status:{}", response.status));
                if response.status >= 400 {
                    tags.push("error".to_string());
                }
            }
            None => tags.push("error".to_string()),
        }

        let max_kb = self.config.max_body_size_kb;
        let content = HttpClientContent {
            method: input.method.to_ascii_uppercase(),
            url: input.url,
            headers: self.redactor.headers(&input.headers),
            body: input
                .body
                .map(|b| sanitize::truncate_value(self.redactor.value(b), max_kb)),
            response: input.response.map(|r| {
                let size = match &r.body {
                    Value::Null => 0,
                    body => sanitize::serialized_size(body) as u64,
                };
                ResponseContent {
                    status: r.status,
                    headers: self.redactor.headers(&r.headers),
                    body: sanitize::truncate_value(r.body, max_kb),
                    size: Some(size),
                }
            }),
        };

        Some(
            Entry::new(
                EntryType::HttpClient,
                batch_or_new(input.batch_id),
                sanitize::to_value_safe(&content),
            )
            .with_tags(tags)
            .with_duration(input.duration),
        )
    }
}
