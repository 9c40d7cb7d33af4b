//! Route dispatch from `ApiRequest` to storage calls

use chrono::Utc;
use http::Method;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error};

use crate::params::parse_list_options;
use crate::request::{ApiRequest, ApiResponse};
use debugscope_core::StorageAdapter;
use debugscope_core::query::cutoff_hours_ago;

pub const DEFAULT_PREFIX: &str = "/api";

const DEFAULT_PRUNE_HOURS: f64 = 24.0;

pub struct ApiHandler {
    storage: Arc<dyn StorageAdapter>,
    prefix: String,
}

impl ApiHandler {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Change the mount prefix; an empty prefix routes paths as given
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    /// Route one request; never fails, errors are mapped to status codes
    pub async fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let path = self.route_path(&request.path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        debug!(method = %request.method, path = %path, "API request");

        match (&request.method, segments.as_slice()) {
            (&Method::GET, ["entries"]) => self.list_entries(request).await,
            (&Method::GET, ["entries", id]) => self.get_entry(id).await,
            (&Method::DELETE, ["entries"]) => self.clear().await,
            (&Method::GET, ["batches", batch_id]) => self.get_batch(batch_id).await,
            (&Method::GET, ["stats"]) => self.stats().await,
            (&Method::POST, ["prune"]) => self.prune(request.body.as_ref()).await,
            _ => ApiResponse::not_found(),
        }
    }

    fn route_path<'a>(&self, path: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return path;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        }
    }

    async fn list_entries(&self, request: &ApiRequest) -> ApiResponse {
        let options = match parse_list_options(request) {
            Ok(options) => options,
            Err(message) => return ApiResponse::bad_request(&message),
        };

        match self.storage.list(&options).await {
            Ok(page) => ApiResponse::ok(&page),
            Err(e) => storage_failure("list", e),
        }
    }

    async fn get_entry(&self, id: &str) -> ApiResponse {
        match self.storage.find(id).await {
            Ok(Some(entry)) => ApiResponse::ok(&entry),
            Ok(None) => ApiResponse::not_found(),
            Err(e) => storage_failure("find", e),
        }
    }

    async fn get_batch(&self, batch_id: &str) -> ApiResponse {
        match self.storage.find_by_batch(batch_id).await {
            Ok(entries) => ApiResponse::ok(&entries),
            Err(e) => storage_failure("find_by_batch", e),
        }
    }

    async fn stats(&self) -> ApiResponse {
        match self.storage.stats().await {
            Ok(stats) => ApiResponse::ok(&stats),
            Err(e) => storage_failure("stats", e),
        }
    }

    async fn clear(&self) -> ApiResponse {
        match self.storage.clear().await {
            Ok(()) => ApiResponse::ok(&json!({"success": true})),
            Err(e) => storage_failure("clear", e),
        }
    }

    async fn prune(&self, body: Option<&Value>) -> ApiResponse {
        let hours = prune_hours(body);
        let cutoff = cutoff_hours_ago(Utc::now(), hours);

        match self.storage.prune(cutoff).await {
            Ok(deleted) => ApiResponse::ok(&json!({"success": true, "deleted": deleted})),
            Err(e) => storage_failure("prune", e),
        }
    }
}

/// `hours` from a prune body: a non-negative number or numeric string, else 24
fn prune_hours(body: Option<&Value>) -> f64 {
    let hours = match body.and_then(|b| b.get("hours")) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    hours
        .filter(|h| h.is_finite() && *h >= 0.0)
        .unwrap_or(DEFAULT_PRUNE_HOURS)
}

fn storage_failure(operation: &str, e: debugscope_core::Error) -> ApiResponse {
    error!(operation, error = %e, "Storage operation failed");
    ApiResponse::internal_error(&e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use debugscope_core::{
        Entry, EntryType, Error, ListOptions, PaginatedResult, Result, StorageStats,
    };
    use debugscope_storage_memory::MemoryStorage;
    use http::StatusCode;
    use mockall::mock;

    mock! {
        pub Storage {}

        #[async_trait]
        impl StorageAdapter for Storage {
            async fn initialize(&self) -> Result<()>;
            async fn save(&self, entry: &Entry) -> Result<()>;
            async fn find(&self, id: &str) -> Result<Option<Entry>>;
            async fn list(&self, options: &ListOptions) -> Result<PaginatedResult<Entry>>;
            async fn find_by_batch(&self, batch_id: &str) -> Result<Vec<Entry>>;
            async fn prune(&self, before: DateTime<Utc>) -> Result<u64>;
            async fn clear(&self) -> Result<()>;
            async fn stats(&self) -> Result<StorageStats>;
            fn name(&self) -> &'static str;
        }
    }

    async fn seeded() -> (ApiHandler, Vec<Entry>) {
        let storage = Arc::new(MemoryStorage::new(100).unwrap());
        let base = Utc::now() - Duration::minutes(10);
        let entries = vec![
            Entry::new(EntryType::Request, "b1", json!({"method": "GET", "path": "/users"}))
                .with_tags(vec!["GET".into(), "status:200".into()])
                .with_created_at(base),
            Entry::new(EntryType::Query, "b1", json!({"sql": "SELECT * FROM users"}))
                .with_tags(vec!["slow".into()])
                .with_created_at(base + Duration::seconds(1)),
            Entry::new(EntryType::Log, "b2", json!({"level": "info", "message": "ok"}))
                .with_created_at(base + Duration::seconds(2)),
        ];
        for entry in &entries {
            storage.save(entry).await.unwrap();
        }
        (ApiHandler::new(storage), entries)
    }

    #[tokio::test]
    async fn test_list_with_filters_and_prefix() {
        let (handler, _) = seeded().await;

        let response = handler.handle(&ApiRequest::get("/api/entries")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["total"], 3);
        assert_eq!(response.body["data"][0]["type"], "log");

        let response = handler
            .handle(&ApiRequest::get("/api/entries?type=query&tags[]=slow"))
            .await;
        assert_eq!(response.body["total"], 1);
        assert_eq!(response.body["data"][0]["content"]["sql"], "SELECT * FROM users");

        let response = handler
            .handle(&ApiRequest::get("/api/entries?search=USERS&limit=1"))
            .await;
        assert_eq!(response.body["total"], 2);
        assert_eq!(response.body["hasMore"], true);
    }

    #[tokio::test]
    async fn test_invalid_type_is_bad_request() {
        let (handler, _) = seeded().await;
        let response = handler.handle(&ApiRequest::get("/api/entries?type=nope")).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_entry_and_missing() {
        let (handler, entries) = seeded().await;

        let path = format!("/api/entries/{}", entries[0].id);
        let response = handler.handle(&ApiRequest::get(&path)).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["id"], entries[0].id.as_str());

        let response = handler.handle(&ApiRequest::get("/api/entries/missing")).await;
        assert_eq!(response, ApiResponse::not_found());
    }

    #[tokio::test]
    async fn test_batch_is_chronological() {
        let (handler, entries) = seeded().await;
        let response = handler.handle(&ApiRequest::get("/api/batches/b1")).await;

        let ids: Vec<&str> = response
            .body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec![entries[0].id.as_str(), entries[1].id.as_str()]);
    }

    #[tokio::test]
    async fn test_stats_clear_and_prune() {
        let (handler, _) = seeded().await;

        let stats = handler.handle(&ApiRequest::get("/api/stats")).await;
        assert_eq!(stats.body["totalEntries"], 3);

        let prune = ApiRequest::new(Method::POST, "/api/prune").with_body(json!({"hours": "0.05"}));
        let response = handler.handle(&prune).await;
        assert_eq!(response.body, json!({"success": true, "deleted": 3}));

        let response = handler
            .handle(&ApiRequest::new(Method::DELETE, "/api/entries"))
            .await;
        assert_eq!(response.body, json!({"success": true}));
    }

    #[tokio::test]
    async fn test_unknown_routes_are_not_found() {
        let (handler, _) = seeded().await;
        for request in [
            ApiRequest::get("/api/nothing"),
            ApiRequest::new(Method::POST, "/api/entries"),
            ApiRequest::get("/api/entries/a/b"),
        ] {
            assert_eq!(handler.handle(&request).await.status, StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_custom_prefix() {
        let (handler, _) = seeded().await;
        let handler = handler.with_prefix("/_debug/");
        let response = handler.handle(&ApiRequest::get("/_debug/stats")).await;
        assert_eq!(response.status, StatusCode::OK);
        // Unprefixed paths still route
        let response = handler.handle(&ApiRequest::get("/stats")).await;
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_storage_failure_maps_to_500() {
        let mut storage = MockStorage::new();
        storage
            .expect_list()
            .returning(|_| Err(Error::Database("connection refused".into())));
        storage
            .expect_prune()
            .withf(|before| *before < Utc::now() - Duration::hours(23))
            .returning(|_| Err(Error::Database("locked".into())));

        let handler = ApiHandler::new(Arc::new(storage));

        let response = handler.handle(&ApiRequest::get("/api/entries")).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["error"], "Internal server error");
        assert_eq!(
            response.body["message"],
            "Database error: connection refused"
        );

        let response = handler
            .handle(&ApiRequest::new(Method::POST, "/api/prune"))
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_prune_hours_coercion() {
        assert_eq!(prune_hours(None), 24.0);
        assert_eq!(prune_hours(Some(&json!({"hours": 2}))), 2.0);
        assert_eq!(prune_hours(Some(&json!({"hours": "1.5"}))), 1.5);
        assert_eq!(prune_hours(Some(&json!({"hours": "soon"}))), 24.0);
        assert_eq!(prune_hours(Some(&json!({"hours": -1}))), 24.0);
    }

    #[tokio::test]
    async fn test_enormous_prune_horizon_deletes_nothing() {
        let (handler, _) = seeded().await;
        let prune = ApiRequest::new(Method::POST, "/api/prune").with_body(json!({"hours": 1e10}));
        let response = handler.handle(&prune).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!({"success": true, "deleted": 0}));
    }

    #[tokio::test]
    async fn test_offset_past_usize_range_returns_empty_page() {
        let (handler, _) = seeded().await;
        let response = handler
            .handle(&ApiRequest::get("/api/entries?offset=18446744073709551615"))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["total"], 3);
        assert_eq!(response.body["data"], json!([]));
        assert_eq!(response.body["hasMore"], false);
    }
}
