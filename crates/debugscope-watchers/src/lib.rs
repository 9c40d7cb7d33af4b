//! Watchers turn raw observations into entries
//!
//! Each watcher owns its configuration, decides whether an observation is recorded
//! at all, sanitizes the payload and derives tags. A watcher never fails: capture
//! problems are replaced with sentinel values (see [`sanitize`]).

pub mod cache;
pub mod dump;
pub mod event;
pub mod exception;
pub mod http_client;
pub mod job;
pub mod log;
pub mod query;
pub mod request;
pub mod sanitize;
pub mod schedule;
pub mod stack;

use debugscope_core::{Entry, EntryType, entry::generate_id};
use serde::{Deserialize, Serialize};

pub use cache::{CacheData, CacheWatcher, CacheWatcherConfig};
pub use dump::{DumpData, DumpWatcher, DumpWatcherConfig};
pub use event::{EventData, EventWatcher, EventWatcherConfig};
pub use exception::{ExceptionData, ExceptionWatcher, ExceptionWatcherConfig};
pub use http_client::{HttpClientData, HttpClientWatcher, HttpClientWatcherConfig, HttpResponseData};
pub use job::{JobData, JobWatcher, JobWatcherConfig};
pub use log::{LogData, LogWatcher, LogWatcherConfig};
pub use query::{QueryData, QueryWatcher, QueryWatcherConfig};
pub use request::{RequestData, RequestWatcher, RequestWatcherConfig};
pub use schedule::{ScheduleData, ScheduleWatcher, ScheduleWatcherConfig};

/// A recorder for one category of runtime event
pub trait Watcher: Send + Sync {
    type Input;

    fn entry_type(&self) -> EntryType;

    /// Build an entry, or `None` when the observation is suppressed
    fn record(&self, input: Self::Input) -> Option<Entry>;
}

/// Watcher that drops inputs rejected by a predicate
pub struct Filtered<W, F> {
    inner: W,
    filter: F,
}

impl<W, F> Watcher for Filtered<W, F>
where
    W: Watcher,
    F: Fn(&W::Input) -> bool + Send + Sync,
{
    type Input = W::Input;

    fn entry_type(&self) -> EntryType {
        self.inner.entry_type()
    }

    fn record(&self, input: Self::Input) -> Option<Entry> {
        if (self.filter)(&input) {
            self.inner.record(input)
        } else {
            None
        }
    }
}

/// Watcher that appends extra tags computed from the produced entry
pub struct Tagged<W, F> {
    inner: W,
    tagger: F,
}

impl<W, F> Watcher for Tagged<W, F>
where
    W: Watcher,
    F: Fn(&Entry) -> Vec<String> + Send + Sync,
{
    type Input = W::Input;

    fn entry_type(&self) -> EntryType {
        self.inner.entry_type()
    }

    fn record(&self, input: Self::Input) -> Option<Entry> {
        let mut entry = self.inner.record(input)?;
        let extra = (self.tagger)(&entry);
        entry.append_tags(extra);
        Some(entry)
    }
}

/// Only record inputs for which `filter` returns true
pub fn with_filter<W, F>(watcher: W, filter: F) -> Filtered<W, F>
where
    W: Watcher,
    F: Fn(&W::Input) -> bool + Send + Sync,
{
    Filtered {
        inner: watcher,
        filter,
    }
}

/// Append tags computed by `tagger` to every recorded entry
pub fn with_tagger<W, F>(watcher: W, tagger: F) -> Tagged<W, F>
where
    W: Watcher,
    F: Fn(&Entry) -> Vec<String> + Send + Sync,
{
    Tagged {
        inner: watcher,
        tagger,
    }
}

/// Use the caller's batch id or start a fresh one
pub(crate) fn batch_or_new(batch_id: Option<String>) -> String {
    batch_id.unwrap_or_else(generate_id)
}

pub(crate) fn default_true() -> bool {
    true
}

/// Configuration for every watcher
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchersConfig {
    #[serde(default)]
    pub request: RequestWatcherConfig,
    #[serde(default)]
    pub query: QueryWatcherConfig,
    #[serde(default)]
    pub cache: CacheWatcherConfig,
    #[serde(default)]
    pub log: LogWatcherConfig,
    #[serde(default)]
    pub exception: ExceptionWatcherConfig,
    #[serde(default)]
    pub http_client: HttpClientWatcherConfig,
    #[serde(default)]
    pub event: EventWatcherConfig,
    #[serde(default)]
    pub job: JobWatcherConfig,
    #[serde(default)]
    pub schedule: ScheduleWatcherConfig,
    #[serde(default)]
    pub dump: DumpWatcherConfig,
}

/// One instance of every watcher, built from a [`WatchersConfig`]
#[derive(Debug, Clone)]
pub struct Watchers {
    pub request: RequestWatcher,
    pub query: QueryWatcher,
    pub cache: CacheWatcher,
    pub log: LogWatcher,
    pub exception: ExceptionWatcher,
    pub http_client: HttpClientWatcher,
    pub event: EventWatcher,
    pub job: JobWatcher,
    pub schedule: ScheduleWatcher,
    pub dump: DumpWatcher,
}

impl Watchers {
    pub fn new(config: &WatchersConfig) -> Self {
        Self {
            request: RequestWatcher::new(config.request.clone()),
            query: QueryWatcher::new(config.query.clone()),
            cache: CacheWatcher::new(config.cache.clone()),
            log: LogWatcher::new(config.log.clone()),
            exception: ExceptionWatcher::new(config.exception.clone()),
            http_client: HttpClientWatcher::new(config.http_client.clone()),
            event: EventWatcher::new(config.event.clone()),
            job: JobWatcher::new(config.job.clone()),
            schedule: ScheduleWatcher::new(config.schedule.clone()),
            dump: DumpWatcher::new(config.dump.clone()),
        }
    }
}

impl Default for Watchers {
    fn default() -> Self {
        Self::new(&WatchersConfig::default())
    }
}
