//! In-process push hub.
//!
//! [`BroadcastPushSink`] is the bridge to whatever push transport the host
//! runs (a WebSocket server, say).  Each subscriber gets its own
//! `tokio::sync::broadcast` receiver of [`PushMessage`]s.  A subscriber that
//! falls behind loses the oldest messages instead of slowing the publisher.

use pairlink_core::PushMessage;
use tokio::sync::broadcast;

use crate::application::ports::{PushError, PushSink};

/// Default number of messages buffered per subscriber.
pub const DEFAULT_PUSH_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct BroadcastPushSink {
    tx: broadcast::Sender<PushMessage>,
}

impl BroadcastPushSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Opens a new subscription.  Only messages published afterwards arrive.
    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastPushSink {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_CAPACITY)
    }
}

impl PushSink for BroadcastPushSink {
    fn deliver(&self, event_type: &str, payload: &serde_json::Value) -> Result<(), PushError> {
        let message = PushMessage {
            event_type: event_type.to_string(),
            data: payload.clone(),
        };
        self.tx
            .send(message)
            .map(|_| ())
            .map_err(|_| PushError::NoSubscribers)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
