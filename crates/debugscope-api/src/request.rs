//! Request and response envelopes

use debugscope_core::content::Headers;
use http::{Method, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};

/// Inbound API call, independent of any HTTP framework
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// Decoded query pairs in order; keys may repeat
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Build from a method and a path with an optional `?query`
    ///
    /// A query string that cannot be decoded is treated as empty.
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (path_and_query, Vec::new()),
        };

        Self {
            method,
            path: path.to_string(),
            query,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn get(path_and_query: &str) -> Self {
        Self::new(Method::GET, path_and_query)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// First value for `key`
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for any of `keys`, in order
    pub fn query_values(&self, keys: &[&str]) -> Vec<String> {
        self.query
            .iter()
            .filter(|(k, _)| keys.contains(&k.as_str()))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(query).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Ignoring undecodable query string");
        Vec::new()
    })
}

/// Status plus JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(e) => Self::internal_error(&e.to_string()),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: json!({"error": "Not found"}),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({"error": message}),
        }
    }

    pub fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: json!({"error": "Forbidden"}),
        }
    }

    pub fn internal_error(message: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({"error": "Internal server error", "message": message}),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
