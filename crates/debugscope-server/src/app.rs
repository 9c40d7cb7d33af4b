//! HTTP and WebSocket front end over a `Scope`
//!
//! - `{prefix}/*`: the query API
//! - `/ws`: real-time observer stream; send `{"type":"stats"}` to request stats
//! - `POST /ingest`: record one entry or an array of entries
//! - `/metrics`: Prometheus text format
//! - `/healthz`: liveness

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{
        DefaultBodyLimit, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use debugscope::api::ApiRequest;
use debugscope::watchers::sanitize;
use debugscope::{Entry, EntryType, RequestContext, Scope};

/// Entry shape accepted by `/ingest`; the recorder assigns id and timestamp
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestEntry {
    #[serde(rename = "type")]
    entry_type: EntryType,
    #[serde(default)]
    batch_id: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    memory_usage: Option<i64>,
}

impl IngestEntry {
    /// Build the entry, replacing oversized content with size sentinels
    ///
    /// Objects are bounded field by field so the content stays a mapping.
    fn into_entry(self, max_kb: usize) -> Entry {
        let content = match self.content {
            Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, sanitize::truncate_value(value, max_kb)))
                    .collect(),
            ),
            other => sanitize::truncate_value(other, max_kb),
        };
        let batch_id = self
            .batch_id
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| RequestContext::new().batch_id);
        Entry::new(self.entry_type, batch_id, content)
            .with_tags(self.tags)
            .with_duration(self.duration)
            .with_memory_usage(self.memory_usage)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub scope: Scope,
    pub body_limit: usize,
    pub ingest_max_content_kb: usize,
}

pub fn router(state: AppState) -> Router {
    let prefix = state.scope.config().api.prefix.trim_end_matches('/').to_string();
    let api_root = if prefix.is_empty() { "/".to_string() } else { prefix.clone() };

    Router::new()
        .route(&api_root, any(api_handler))
        .route(&format!("{}/{{*path}}", prefix), any(api_handler))
        .route("/ws", get(ws_handler))
        .route(
            "/ingest",
            post(ingest_handler).layer(DefaultBodyLimit::max(state.body_limit)),
        )
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn api_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let mut api_request = ApiRequest::new(parts.method.clone(), &path_and_query);
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            api_request = api_request.with_header(name.as_str(), value);
        }
    }

    let bytes = match to_bytes(body, state.body_limit).await {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::PAYLOAD_TOO_LARGE, &e.to_string()),
    };
    if !bytes.is_empty() {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => api_request = api_request.with_body(body),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON body: {}", e)),
        }
    }

    let response = state.scope.handle_api(&api_request).await;
    (response.status, Json(response.body)).into_response()
}

async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let auth_request = ApiRequest::new(axum::http::Method::POST, "/ingest");
    let auth_request = headers.iter().fold(auth_request, |request, (name, value)| match value.to_str() {
        Ok(value) => request.with_header(name.as_str(), value),
        Err(_) => request,
    });
    if !state.scope.check_authorization(&auth_request) {
        return error_response(StatusCode::FORBIDDEN, "Forbidden");
    }

    let parsed = match payload {
        Value::Array(_) => serde_json::from_value::<Vec<IngestEntry>>(payload),
        other => serde_json::from_value::<IngestEntry>(other).map(|item| vec![item]),
    };
    let items = match parsed {
        Ok(items) => items,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let mut recorded = 0usize;
    let max_kb = state.ingest_max_content_kb;
    for entry in items.into_iter().map(|item| item.into_entry(max_kb)) {
        match state.scope.record_entry(entry).await {
            Ok(Some(_)) => recorded += 1,
            Ok(None) => {}
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Internal server error", "message": e.to_string(), "recorded": recorded})),
                )
                    .into_response();
            }
        }
    }

    (StatusCode::ACCEPTED, Json(json!({"recorded": recorded}))).into_response()
}

async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let auth_request = ApiRequest::new(axum::http::Method::GET, "/ws");
    let auth_request = headers.iter().fold(auth_request, |request, (name, value)| match value.to_str() {
        Ok(value) => request.with_header(name.as_str(), value),
        Err(_) => request,
    });
    if !state.scope.check_authorization(&auth_request) {
        return error_response(StatusCode::FORBIDDEN, "Forbidden");
    }

    ws.on_upgrade(move |socket| observe(socket, state.scope))
}

async fn observe(mut socket: WebSocket, scope: Scope) {
    let mut observer = scope.connect_observer();
    let id = observer.id();
    debug!(observer_id = id, "WebSocket observer attached");

    loop {
        tokio::select! {
            message = observer.recv() => {
                // None: the hub dropped this observer
                let Some(message) = message else { break };
                let Ok(text) = message.to_json() else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if wants_stats(text.as_str())
                            && let Err(e) = scope.stats_for(id).await
                        {
                            warn!("Failed to send stats to observer {}: {}", id, e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    scope.disconnect_observer(id);
    debug!(observer_id = id, "WebSocket observer detached");
}

fn wants_stats(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "stats"))
        .unwrap_or(false)
}

/// Prometheus metrics handler
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.scope.metrics().encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", err),
        )
            .into_response(),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use debugscope::ScopeConfig;
    use debugscope::realtime::RealtimeMessage;
    use tower::ServiceExt; // for oneshot

    fn app_with(scope: Scope) -> Router {
        router(AppState {
            scope,
            body_limit: 1024 * 1024,
            ingest_max_content_kb: 1,
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_api_routes_through_scope() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        scope
            .record_entry(Entry::new(EntryType::Log, "b1", json!({"message": "hello"})))
            .await
            .unwrap();

        let response = app_with(scope)
            .oneshot(
                Request::builder()
                    .uri("/api/entries?type=log")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"][0]["batchId"], "b1");
    }

    #[tokio::test]
    async fn test_prune_with_json_body() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        let response = app_with(scope)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/prune")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"hours": 1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true, "deleted": 0}));
    }

    #[tokio::test]
    async fn test_invalid_json_body_rejected() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        let response = app_with(scope)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/prune")
                    .body(Body::from("{hours"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_api_route_is_not_found() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        let response = app_with(scope)
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "Not found"}));
    }

    #[tokio::test]
    async fn test_authorizer_applies_to_api() {
        let scope = Scope::new(ScopeConfig::default())
            .unwrap()
            .with_authorizer(|request: &ApiRequest| request.header("authorization") == Some("Bearer t"));
        let app = app_with(scope);

        let denied = app
            .clone()
            .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let allowed = app
            .oneshot(
                Request::builder()
                    .uri("/api/stats")
                    .header("Authorization", "Bearer t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ingest_records_and_broadcasts() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        let mut observer = scope.connect_observer();
        observer.recv().await;

        let entries = vec![
            Entry::new(EntryType::Event, "b2", json!({"name": "a"})),
            Entry::new(EntryType::Event, "b2", json!({"name": "b"})),
        ];
        let response = app_with(scope.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&entries).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await, json!({"recorded": 2}));
        assert!(matches!(observer.recv().await, Some(RealtimeMessage::Entry { .. })));
        assert_eq!(scope.storage().find_by_batch("b2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_assigns_batch_and_rejects_unknown_type() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        let app = app_with(scope.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"type":"job","content":{"name":"SendMail"},"tags":["mail"]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let page = scope.storage().list(&Default::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(!page.data[0].batch_id.is_empty());
        assert_eq!(page.data[0].tags, vec!["mail".to_string()]);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"type":"bogus","content":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_truncates_oversized_content() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        let big = "x".repeat(4096);
        let payload = json!({"type": "dump", "batchId": "big", "content": {"dump": big, "file": "a.rs"}});

        let response = app_with(scope.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let stored = scope.storage().find_by_batch("big").await.unwrap();
        assert_eq!(stored[0].content["dump"], "[TRUNCATED: 4098 bytes]");
        assert_eq!(stored[0].content["file"], "a.rs");
    }

    #[tokio::test]
    async fn test_ingest_rejects_body_over_limit() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        let app = router(AppState {
            scope,
            body_limit: 256,
            ingest_max_content_kb: 64,
        });
        let payload = json!({"type": "log", "content": {"message": "y".repeat(1024)}});

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        scope
            .record_entry(Entry::new(EntryType::Dump, "b", json!({"dump": 1})))
            .await
            .unwrap();

        let response = app_with(scope)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("debugscope_entries_recorded_total{type=\"dump\"} 1"));
    }

    #[test]
    fn test_wants_stats() {
        assert!(wants_stats(r#"{"type":"stats"}"#));
        assert!(!wants_stats(r#"{"type":"ping"}"#));
        assert!(!wants_stats("stats"));
    }
}
