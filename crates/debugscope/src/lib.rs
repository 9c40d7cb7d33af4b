//! debugscope - embeddable application debugging recorder
//!
//! Captures structured entries (requests, queries, cache operations, logs,
//! exceptions, outbound HTTP calls, events, jobs, scheduled tasks, dumps),
//! persists them through a pluggable storage adapter and streams them to
//! connected observers.
//!
//! ```no_run
//! use debugscope::{Scope, ScopeConfig};
//! use debugscope::watchers::{QueryData, RequestData};
//!
//! # async fn example() -> debugscope::Result<()> {
//! let scope = Scope::new(ScopeConfig::default())?;
//! scope.start().await?;
//!
//! let ctx = scope.create_context();
//! let mut query = QueryData::new("SELECT * FROM users WHERE id = ?");
//! query.batch_id = Some(ctx.batch_id.clone());
//! query.duration = Some(3.2);
//! scope.record_query(query).await?;
//!
//! let mut request = RequestData::new("GET", "/users/1");
//! request.batch_id = Some(ctx.batch_id.clone());
//! request.duration = Some(ctx.elapsed_ms());
//! scope.record_request(request).await?;
//!
//! scope.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod capture;
pub mod config;
pub mod factory;
pub mod metrics;
pub mod panic;
pub mod retention;
pub mod scope;

pub use cache::{CacheClient, InstrumentedCache};
pub use capture::CaptureLayer;
pub use config::{ScopeConfig, StorageConfig, StorageDriver};
pub use factory::create_storage;
pub use metrics::ScopeMetrics;
pub use panic::install_panic_hook;
pub use retention::{RetentionScheduler, RetentionTask};
pub use scope::{Authorizer, Scope};

pub use debugscope_api as api;
pub use debugscope_core::{
    Entry, EntryType, Error, ListOptions, PaginatedResult, RequestContext, Result,
    StorageAdapter, StorageStats,
};
pub use debugscope_realtime as realtime;
pub use debugscope_watchers as watchers;
