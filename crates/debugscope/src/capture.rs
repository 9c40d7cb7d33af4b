//! `tracing` integration: record application events as log entries
//!
//! ```no_run
//! # use debugscope::{Scope, ScopeConfig, capture::CaptureLayer};
//! # use tracing_subscriber::prelude::*;
//! # async fn example() -> debugscope::Result<()> {
//! let scope = Scope::new(ScopeConfig::default())?;
//! let (layer, _worker) = CaptureLayer::spawn(scope.clone());
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(layer)
//!     .init();
//!
//! tracing::warn!(user_id = 7, batch_id = "b1", "Payment declined");
//! # Ok(())
//! # }
//! ```
//!
//! Events are handed to a worker task through a bounded channel; when the
//! channel is full the event is dropped rather than blocking the caller.

use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::scope::Scope;
use debugscope_core::content::LogLevel;
use debugscope_watchers::LogData;

pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Targets never captured: the recorder's own crates and the SQL driver
const EXCLUDED_TARGETS: &[&str] = &["debugscope", "sqlx"];

/// Field naming the batch an event belongs to
const BATCH_FIELD: &str = "batch_id";

pub struct CaptureLayer {
    tx: mpsc::Sender<LogData>,
    min_level: LogLevel,
    enabled: bool,
}

impl CaptureLayer {
    /// Create the layer and spawn its recording worker
    ///
    /// The worker ends once the layer is dropped and the channel drains.
    pub fn spawn(scope: Scope) -> (Self, JoinHandle<()>) {
        Self::with_buffer(scope, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer(scope: Scope, buffer_size: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LogData>(buffer_size.max(1));
        let layer = Self {
            tx,
            min_level: scope.config().watchers.log.min_level,
            enabled: scope.is_enabled()
                && scope.config().watchers.log.enabled
                && scope.config().logging.capture_tracing,
        };

        let worker = tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if let Err(e) = scope.record_log(data).await {
                    tracing::warn!("Failed to record captured log event: {}", e);
                }
            }
        });

        (layer, worker)
    }

    fn captures(&self, level: &Level, target: &str) -> bool {
        self.enabled && log_level(level) >= self.min_level && !is_internal(target)
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.captures(metadata.level(), metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut data = LogData::new(log_level(metadata.level()), visitor.message);
        data.channel = Some(metadata.target().to_string());
        data.batch_id = visitor.batch_id;
        if !visitor.fields.is_empty() {
            data.context = Some(Value::Object(visitor.fields));
        }

        // Dropped when full or closed; logging here would re-enter this layer
        let _ = self.tx.try_send(data);
    }
}

/// `debugscope`, `debugscope::*`, `debugscope_*` and the same for `sqlx`
fn is_internal(target: &str) -> bool {
    EXCLUDED_TARGETS
        .iter()
        .any(|prefix| match target.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with("::") || rest.starts_with('_'),
            None => false,
        })
}

pub fn log_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    batch_id: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
            BATCH_FIELD => {
                self.batch_id = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeConfig;
    use debugscope_core::{EntryType, ListOptions};
    use std::time::Duration;
    use tracing_subscriber::prelude::*;

    async fn captured_logs(scope: &Scope, expected: u64) -> Vec<debugscope_core::Entry> {
        let options = ListOptions::default().with_type(EntryType::Log);
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let page = scope.storage().list(&options).await.unwrap();
                if page.total >= expected {
                    return page.data;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_events_become_log_entries() {
        let scope = Scope::new(ScopeConfig::default()).unwrap();
        let (layer, _worker) = CaptureLayer::spawn(scope.clone());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "shop::billing", user_id = 7, batch_id = "b1", "Payment declined");
            tracing::info!(target: "sqlx::query", "SELECT 1");
            tracing::debug!(target: "debugscope_storage_sqlite", "internal");
        });

        let logs = captured_logs(&scope, 1).await;
        assert_eq!(logs.len(), 1);
        let entry = &logs[0];
        assert_eq!(entry.batch_id, "b1");
        assert_eq!(entry.content["level"], "warn");
        assert_eq!(entry.content["message"], "Payment declined");
        assert_eq!(entry.content["channel"], "shop::billing");
        assert_eq!(entry.content["context"]["user_id"], 7);
    }

    #[tokio::test]
    async fn test_min_level_applies() {
        let mut config = ScopeConfig::default();
        config.watchers.log.min_level = LogLevel::Error;
        let scope = Scope::new(config).unwrap();
        let (layer, _worker) = CaptureLayer::spawn(scope.clone());

        tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
            tracing::warn!(target: "app", "ignored");
            tracing::error!(target: "app", "kept");
        });

        let logs = captured_logs(&scope, 1).await;
        assert_eq!(logs[0].content["message"], "kept");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let page = scope
            .storage()
            .list(&ListOptions::default().with_type(EntryType::Log))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn test_excluded_targets() {
        let (tx, _rx) = mpsc::channel(1);
        let layer = CaptureLayer {
            tx,
            min_level: LogLevel::Debug,
            enabled: true,
        };
        assert!(layer.captures(&Level::INFO, "app::handlers"));
        assert!(layer.captures(&Level::INFO, "debugscoped"));
        assert!(!layer.captures(&Level::INFO, "debugscope"));
        assert!(!layer.captures(&Level::INFO, "debugscope::scope"));
        assert!(!layer.captures(&Level::INFO, "debugscope_api::handler"));
        assert!(!layer.captures(&Level::INFO, "sqlx::query"));
    }
}
