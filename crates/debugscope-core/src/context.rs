//! Per-unit-of-work capture context

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::entry::{generate_id, now_millis};

/// Context for one logical unit of work (typically one inbound HTTP request)
///
/// Every entry recorded while handling the unit shares `batch_id`. Contexts are
/// independent values; they are never shared between concurrent units.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub batch_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip)]
    started: Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::with_batch_id(generate_id())
    }

    pub fn with_batch_id(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            start_time: now_millis(),
            started: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the context was created
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
