//! Cache decorator that records every operation
//!
//! Wrap any `CacheClient` in an `InstrumentedCache`; reads, writes, deletes and
//! flushes go to the inner client unchanged and are recorded as cache entries.
//! Recording failures are logged and never reach the caller.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;

use crate::scope::Scope;
use debugscope_core::Result;
use debugscope_core::content::CacheOperation;
use debugscope_watchers::CacheData;

#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value`; `ttl` is in seconds
    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn flush(&self) -> Result<()>;

    /// Driver name shown on recorded entries
    fn driver(&self) -> &str {
        "custom"
    }
}

pub struct InstrumentedCache<C> {
    inner: C,
    scope: Scope,
    batch_id: Option<String>,
}

impl<C: CacheClient> InstrumentedCache<C> {
    pub fn new(inner: C, scope: Scope) -> Self {
        Self {
            inner,
            scope,
            batch_id: None,
        }
    }

    /// Attribute recorded operations to a batch
    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let started = Instant::now();
        let value = self.inner.get(key).await?;

        let mut data = self.data(CacheOperation::Get, key, started);
        data.hit = Some(value.is_some());
        data.value = value.clone();
        self.record(data).await;

        Ok(value)
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<()> {
        let started = Instant::now();
        self.inner.set(key, value.clone(), ttl).await?;

        let mut data = self.data(CacheOperation::Set, key, started).with_value(value);
        data.ttl = ttl;
        self.record(data).await;

        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let started = Instant::now();
        let existed = self.inner.delete(key).await?;
        self.record(self.data(CacheOperation::Delete, key, started)).await;
        Ok(existed)
    }

    pub async fn flush(&self) -> Result<()> {
        let started = Instant::now();
        self.inner.flush().await?;
        self.record(self.data(CacheOperation::Flush, "*", started)).await;
        Ok(())
    }

    fn data(&self, operation: CacheOperation, key: &str, started: Instant) -> CacheData {
        let mut data = CacheData::new(operation, key);
        data.batch_id = self.batch_id.clone();
        data.driver = self.inner.driver().to_string();
        data.duration = Some(started.elapsed().as_secs_f64() * 1000.0);
        data
    }

    async fn record(&self, data: CacheData) {
        if let Err(e) = self.scope.record_cache(data).await {
            tracing::warn!("Failed to record cache operation: {}", e);
        }
    }
}
