//! Observer registry and heartbeat

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::message::RealtimeMessage;
use debugscope_core::{Entry, StorageStats};

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Interval between `ping` messages
    pub heartbeat_interval: Duration,

    /// Per-observer channel capacity
    pub buffer_size: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            buffer_size: 64,
        }
    }
}

/// Receiving side of one registration
///
/// Dropping it closes the channel; the hub notices on its next send.
#[derive(Debug)]
pub struct Observer {
    id: u64,
    receiver: mpsc::Receiver<RealtimeMessage>,
}

impl Observer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message, or `None` once the hub has dropped this observer
    pub async fn recv(&mut self) -> Option<RealtimeMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RealtimeMessage> {
        self.receiver.try_recv().ok()
    }
}

pub struct RealtimeHub {
    observers: DashMap<u64, mpsc::Sender<RealtimeMessage>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    config: RealtimeConfig,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeHub {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            observers: DashMap::new(),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            config,
            heartbeat: Mutex::new(None),
        }
    }

    /// Register an observer and greet it with a `connected` message
    pub fn connect(&self) -> Observer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, receiver) = mpsc::channel(self.config.buffer_size.max(1));
        self.observers.insert(id, tx);

        let clients = self.observers.len();
        debug!(observer_id = id, clients, "Observer connected");
        self.send_to(id, RealtimeMessage::Connected { clients });

        Observer { id, receiver }
    }

    /// Remove an observer; returns whether it was registered
    pub fn disconnect(&self, id: u64) -> bool {
        let removed = self.observers.remove(&id).is_some();
        if removed {
            debug!(observer_id = id, "Observer disconnected");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Observers dropped because their channel was full or closed
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send to one observer; a failed send deregisters it
    pub fn send_to(&self, id: u64, message: RealtimeMessage) -> bool {
        let result = match self.observers.get(&id) {
            Some(sender) => sender.try_send(message),
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.drop_observer(id, &e);
                false
            }
        }
    }

    /// Send to every observer, dropping any that cannot accept it
    pub fn broadcast(&self, message: &RealtimeMessage) {
        // Collect first: removing while iterating a DashMap would deadlock
        let failed: Vec<(u64, TrySendError<RealtimeMessage>)> = self
            .observers
            .iter()
            .filter_map(|observer| {
                observer
                    .value()
                    .try_send(message.clone())
                    .err()
                    .map(|e| (*observer.key(), e))
            })
            .collect();

        for (id, e) in failed {
            self.drop_observer(id, &e);
        }
    }

    pub fn broadcast_entry(&self, entry: &Entry) {
        if self.observers.is_empty() {
            return;
        }
        self.broadcast(&RealtimeMessage::Entry { data: entry.clone() });
    }

    pub fn send_stats(&self, id: u64, stats: StorageStats) -> bool {
        self.send_to(id, RealtimeMessage::Stats { data: stats })
    }

    fn drop_observer(&self, id: u64, reason: &TrySendError<RealtimeMessage>) {
        if self.observers.remove(&id).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match reason {
                TrySendError::Full(_) => "full",
                TrySendError::Closed(_) => "closed",
            };
            debug!(observer_id = id, reason, "Dropping observer");
        }
    }

    /// Start the heartbeat task; a no-op while one is already running
    ///
    /// The task holds only a weak reference and ends once the hub is dropped.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let Ok(mut guard) = self.heartbeat.lock() else {
            return;
        };
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let hub: Weak<Self> = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        info!("Starting heartbeat every {:?}", period);

        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.broadcast(&RealtimeMessage::Ping {
                    timestamp: Utc::now().timestamp_millis(),
                });
            }
        }));
    }

    pub fn stop_heartbeat(&self) {
        if let Ok(mut guard) = self.heartbeat.lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
            info!("Heartbeat stopped");
        }
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(RealtimeConfig::default())
    }
}

impl Drop for RealtimeHub {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use debugscope_core::EntryType;
    use serde_json::json;

    fn hub(buffer_size: usize) -> RealtimeHub {
        RealtimeHub::new(RealtimeConfig {
            buffer_size,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_connect_greets_with_client_count() {
        let hub = hub(8);
        let mut first = hub.connect();
        let mut second = hub.connect();

        assert_eq!(first.recv().await, Some(RealtimeMessage::Connected { clients: 1 }));
        assert_eq!(second.recv().await, Some(RealtimeMessage::Connected { clients: 2 }));
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_broadcast_entry_reaches_all() {
        let hub = hub(8);
        let mut a = hub.connect();
        let mut b = hub.connect();
        a.recv().await;
        b.recv().await;

        let entry = Entry::new(EntryType::Log, "b1", json!({"message": "hi"}));
        hub.broadcast_entry(&entry);

        for observer in [&mut a, &mut b] {
            match observer.recv().await {
                Some(RealtimeMessage::Entry { data }) => assert_eq!(data.id, entry.id),
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_full_observer_is_dropped_others_still_served() {
        let hub = hub(1);
        // Never drained: its single slot holds the greeting
        let _stuck = hub.connect();
        let mut live = hub.connect();

        live.recv().await;
        hub.broadcast(&RealtimeMessage::Ping { timestamp: 1 });

        assert_eq!(live.recv().await, Some(RealtimeMessage::Ping { timestamp: 1 }));
        assert_eq!(hub.observer_count(), 1);
        assert_eq!(hub.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_observer_is_dropped() {
        let hub = hub(8);
        let observer = hub.connect();
        drop(observer);

        hub.broadcast(&RealtimeMessage::Ping { timestamp: 1 });
        assert_eq!(hub.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_send_stats_to_one_observer() {
        let hub = hub(8);
        let mut a = hub.connect();
        let mut b = hub.connect();
        a.recv().await;
        b.recv().await;

        assert!(hub.send_stats(a.id(), StorageStats::empty()));
        assert!(matches!(a.recv().await, Some(RealtimeMessage::Stats { .. })));
        assert!(b.try_recv().is_none());
        assert!(!hub.send_stats(999, StorageStats::empty()));
    }

    #[tokio::test]
    async fn test_heartbeat_pings_and_stops() {
        let hub = Arc::new(RealtimeHub::new(RealtimeConfig {
            heartbeat_interval: Duration::from_millis(20),
            buffer_size: 16,
        }));
        let mut observer = hub.connect();
        observer.recv().await;

        hub.start_heartbeat();
        hub.start_heartbeat();
        assert!(hub.heartbeat_running());

        let ping = tokio::time::timeout(Duration::from_secs(2), observer.recv())
            .await
            .unwrap();
        assert!(matches!(ping, Some(RealtimeMessage::Ping { .. })));

        hub.stop_heartbeat();
        assert!(!hub.heartbeat_running());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let hub = hub(8);
        let observer = hub.connect();
        assert!(hub.disconnect(observer.id()));
        assert!(!hub.disconnect(observer.id()));
        assert_eq!(hub.dropped_count(), 0);
    }
}
