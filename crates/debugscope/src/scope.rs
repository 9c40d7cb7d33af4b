//! The recorder facade
//!
//! A `Scope` ties the watchers, the storage adapter, the query API and the
//! real-time hub together. It is a cheap handle; clones share everything.

use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ScopeConfig;
use crate::factory::create_storage;
use crate::metrics::ScopeMetrics;
use crate::retention::{RetentionScheduler, RetentionTask};
use debugscope_api::{ApiHandler, ApiRequest, ApiResponse};
use debugscope_core::{Entry, Error, RequestContext, Result, StorageAdapter};
use debugscope_realtime::{Observer, RealtimeHub};
use debugscope_watchers::{
    CacheData, DumpData, EventData, ExceptionData, HttpClientData, JobData, LogData, QueryData,
    RequestData, ScheduleData, Watcher, Watchers,
};

/// Caller-supplied gate for the query API
pub trait Authorizer: Send + Sync {
    fn authorize(&self, request: &ApiRequest) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&ApiRequest) -> bool + Send + Sync,
{
    fn authorize(&self, request: &ApiRequest) -> bool {
        self(request)
    }
}

#[derive(Clone)]
pub struct Scope {
    config: Arc<ScopeConfig>,
    storage: Arc<dyn StorageAdapter>,
    watchers: Arc<Watchers>,
    api: Arc<ApiHandler>,
    hub: Arc<RealtimeHub>,
    metrics: ScopeMetrics,
    authorizer: Option<Arc<dyn Authorizer>>,
    retention: Arc<Mutex<Option<RetentionTask>>>,
}

impl Scope {
    /// Build from configuration, constructing the configured storage backend
    ///
    /// # Errors
    /// - `Error::Config` for invalid settings or a missing connection string
    pub fn new(config: ScopeConfig) -> Result<Self> {
        config.validate()?;
        let storage = create_storage(&config.storage)?;
        Self::with_storage(config, storage)
    }

    /// Build around an existing storage adapter
    pub fn with_storage(config: ScopeConfig, storage: Arc<dyn StorageAdapter>) -> Result<Self> {
        config.validate()?;

        let metrics = ScopeMetrics::new()
            .map_err(|e| Error::Internal(format!("Failed to create metrics: {}", e)))?;
        let api = ApiHandler::new(storage.clone()).with_prefix(config.api.prefix.clone());
        let hub = RealtimeHub::new(config.realtime.to_realtime_config());

        Ok(Self {
            watchers: Arc::new(Watchers::new(&config.watchers)),
            api: Arc::new(api),
            hub: Arc::new(hub),
            storage,
            metrics,
            authorizer: None,
            retention: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
        })
    }

    /// Gate API access; without one every request is allowed
    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn watchers(&self) -> &Watchers {
        &self.watchers
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    pub fn metrics(&self) -> &ScopeMetrics {
        &self.metrics
    }

    /// Initialize storage, then launch retention and the heartbeat
    ///
    /// Calling it again while running leaves the existing tasks in place.
    pub async fn start(&self) -> Result<()> {
        self.storage.initialize().await?;

        if self.config.retention.enabled {
            let mut retention = self.retention.lock().await;
            if retention.is_none() {
                let scheduler =
                    RetentionScheduler::new(self.storage.clone(), &self.config.retention)
                        .with_metrics(self.metrics.clone());
                *retention = Some(scheduler.spawn());
            }
        }

        if self.config.realtime.enabled {
            self.hub.start_heartbeat();
        }

        info!(
            storage = self.storage.name(),
            enabled = self.config.enabled,
            "debugscope started"
        );
        Ok(())
    }

    /// Stop background tasks and close storage
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(task) = self.retention.lock().await.take() {
            task.shutdown().await;
        }
        self.hub.stop_heartbeat();
        self.storage.close().await?;
        info!("debugscope stopped");
        Ok(())
    }

    pub fn create_context(&self) -> RequestContext {
        RequestContext::new()
    }

    /// Persist an entry, then broadcast it
    ///
    /// Returns `Ok(None)` without touching storage when the scope is disabled.
    /// Nothing is broadcast when the save fails.
    pub async fn record_entry(&self, entry: Entry) -> Result<Option<Entry>> {
        if !self.config.enabled {
            return Ok(None);
        }

        if let Err(e) = self.storage.save(&entry).await {
            self.metrics.record_failure(entry.entry_type);
            warn!(entry_type = %entry.entry_type, error = %e, "Failed to record entry");
            return Err(e);
        }
        self.metrics.record_entry(entry.entry_type);

        if self.config.realtime.enabled {
            self.hub.broadcast_entry(&entry);
            self.sync_observer_metrics();
        }

        Ok(Some(entry))
    }

    /// Append caller tags (after the watcher's own) and record
    pub async fn record_entry_with_tags<I, S>(&self, mut entry: Entry, tags: I) -> Result<Option<Entry>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        entry.append_tags(tags);
        self.record_entry(entry).await
    }

    fn capture<W: Watcher>(&self, watcher: &W, input: W::Input) -> Option<Entry> {
        if !self.config.enabled {
            return None;
        }
        let entry = watcher.record(input);
        if entry.is_none() {
            debug!(entry_type = %watcher.entry_type(), "Watcher suppressed entry");
        }
        entry
    }

    async fn record_captured(&self, entry: Option<Entry>) -> Result<Option<Entry>> {
        match entry {
            Some(entry) => self.record_entry(entry).await,
            None => Ok(None),
        }
    }

    pub async fn record_request(&self, data: RequestData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.request, data);
        self.record_captured(entry).await
    }

    pub async fn record_query(&self, data: QueryData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.query, data);
        self.record_captured(entry).await
    }

    pub async fn record_cache(&self, data: CacheData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.cache, data);
        self.record_captured(entry).await
    }

    pub async fn record_log(&self, data: LogData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.log, data);
        self.record_captured(entry).await
    }

    pub async fn record_exception(&self, data: ExceptionData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.exception, data);
        self.record_captured(entry).await
    }

    /// Record an error value with its `source()` chain
    pub async fn record_error(
        &self,
        error: &(dyn StdError + 'static),
        batch_id: Option<String>,
    ) -> Result<Option<Entry>> {
        let mut data = ExceptionData::from_error(error);
        data.batch_id = batch_id;
        self.record_exception(data).await
    }

    pub async fn record_http_client(&self, data: HttpClientData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.http_client, data);
        self.record_captured(entry).await
    }

    pub async fn record_event(&self, data: EventData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.event, data);
        self.record_captured(entry).await
    }

    pub async fn record_job(&self, data: JobData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.job, data);
        self.record_captured(entry).await
    }

    pub async fn record_schedule(&self, data: ScheduleData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.schedule, data);
        self.record_captured(entry).await
    }

    pub async fn record_dump(&self, data: DumpData) -> Result<Option<Entry>> {
        let entry = self.capture(&self.watchers.dump, data);
        self.record_captured(entry).await
    }

    pub fn check_authorization(&self, request: &ApiRequest) -> bool {
        self.authorizer
            .as_ref()
            .is_none_or(|authorizer| authorizer.authorize(request))
    }

    /// Authorize, then route through the query API
    pub async fn handle_api(&self, request: &ApiRequest) -> ApiResponse {
        if !self.check_authorization(request) {
            debug!(path = %request.path, "API request rejected by authorizer");
            return ApiResponse::forbidden();
        }
        self.api.handle(request).await
    }

    pub fn connect_observer(&self) -> Observer {
        let observer = self.hub.connect();
        self.sync_observer_metrics();
        observer
    }

    pub fn disconnect_observer(&self, id: u64) -> bool {
        let removed = self.hub.disconnect(id);
        self.sync_observer_metrics();
        removed
    }

    /// Send current storage stats to one observer
    ///
    /// Returns whether the observer accepted the message.
    pub async fn stats_for(&self, observer_id: u64) -> Result<bool> {
        let stats = self.storage.stats().await?;
        let delivered = self.hub.send_stats(observer_id, stats);
        self.sync_observer_metrics();
        Ok(delivered)
    }

    fn sync_observer_metrics(&self) {
        self.metrics
            .set_observers(self.hub.observer_count(), self.hub.dropped_count());
    }
}
