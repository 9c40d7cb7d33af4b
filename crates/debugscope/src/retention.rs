//! Periodic pruning of old entries
//!
//! The sweep runs on a plain spawned task independent of traffic. Dropping the
//! runtime ends it; `RetentionTask::shutdown` stops it gracefully.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

use crate::config::RetentionConfig;
use crate::metrics::ScopeMetrics;
use debugscope_core::query::cutoff_hours_ago;
use debugscope_core::{Result, StorageAdapter};

#[derive(Clone)]
pub struct RetentionScheduler {
    storage: Arc<dyn StorageAdapter>,
    hours: f64,
    interval: Duration,
    metrics: Option<ScopeMetrics>,
}

impl RetentionScheduler {
    pub fn new(storage: Arc<dyn StorageAdapter>, config: &RetentionConfig) -> Self {
        Self {
            storage,
            hours: config.hours,
            interval: config.interval(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ScopeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `now - hours`; entries strictly older are removed
    pub fn cutoff(&self) -> DateTime<Utc> {
        cutoff_hours_ago(Utc::now(), self.hours)
    }

    /// Run a single sweep
    pub async fn run_once(&self) -> Result<u64> {
        let cutoff = self.cutoff();
        match self.storage.prune(cutoff).await {
            Ok(deleted) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_pruned(deleted);
                }
                if deleted > 0 {
                    tracing::info!("Retention sweep removed {} entries older than {}", deleted, cutoff);
                } else {
                    tracing::debug!("Retention sweep found nothing older than {}", cutoff);
                }
                Ok(deleted)
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_prune_failure();
                }
                tracing::error!("Retention sweep failed: {}", e);
                Err(e)
            }
        }
    }

    /// Spawn the periodic sweep
    ///
    /// The first sweep happens one interval after spawning.
    pub fn spawn(self) -> RetentionTask {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            tracing::info!(
                "Starting retention task (interval: {:?}, horizon: {}h)",
                self.interval,
                self.hours
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Retention task shutting down");
                        break;
                    }
                    _ = sleep(self.interval) => {
                        // Errors are logged inside run_once
                        let _ = self.run_once().await;
                    }
                }
            }
        });

        RetentionTask {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle for the background retention task
pub struct RetentionTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl RetentionTask {
    /// Signal the task to stop and wait for it
    ///
    /// An in-flight sweep is allowed to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
