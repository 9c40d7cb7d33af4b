//! Wire messages pushed to observers

use debugscope_core::{Entry, StorageStats};
use serde::{Deserialize, Serialize};

/// One real-time protocol message, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeMessage {
    /// Sent once to a newly registered observer
    Connected { clients: usize },

    /// A freshly persisted entry
    Entry { data: Entry },

    Stats { data: StorageStats },

    /// Heartbeat; `timestamp` is epoch milliseconds
    Ping { timestamp: i64 },
}

impl RealtimeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Entry { .. } => "entry",
            Self::Stats { .. } => "stats",
            Self::Ping { .. } => "ping",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use debugscope_core::EntryType;
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        let connected = serde_json::to_value(RealtimeMessage::Connected { clients: 2 }).unwrap();
        assert_eq!(connected, json!({"type": "connected", "clients": 2}));

        let ping = serde_json::to_value(RealtimeMessage::Ping { timestamp: 1700000000000 }).unwrap();
        assert_eq!(ping, json!({"type": "ping", "timestamp": 1700000000000i64}));

        let entry = debugscope_core::Entry::new(EntryType::Log, "b1", json!({"message": "hi"}));
        let value = serde_json::to_value(RealtimeMessage::Entry { data: entry.clone() }).unwrap();
        assert_eq!(value["type"], "entry");
        assert_eq!(value["data"]["id"], entry.id);
        assert_eq!(value["data"]["batchId"], "b1");

        let stats = serde_json::to_value(RealtimeMessage::Stats {
            data: StorageStats::empty(),
        })
        .unwrap();
        assert_eq!(stats["type"], "stats");
        assert_eq!(stats["data"]["totalEntries"], 0);
    }
}
