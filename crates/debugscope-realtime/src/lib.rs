//! Real-time fan-out of recorded entries to connected observers
//!
//! Observers are registered in a [`DashMap`] and each gets its own bounded
//! channel. Delivery is fire-and-forget: when an observer's channel is full or
//! closed it is deregistered on the spot and never retried, so a slow observer
//! cannot hold up recording.
//!
//! ```text
//! record_entry ──► broadcast_entry ──► try_send ──► Observer (bounded mpsc)
//!                                          │
//!                                          └─ Full/Closed ──► deregister
//! ```

mod hub;
mod message;

pub use hub::{Observer, RealtimeConfig, RealtimeHub};
pub use message::RealtimeMessage;
