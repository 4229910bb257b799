//! Per-device event fan-out.
//!
//! Each device gets its own broadcast channel, created when the first
//! WebSocket client subscribes. Publishing to a device only reaches clients
//! subscribed to that device; there is no global fan-out. Channels are
//! buffered: a slow client that falls behind the buffer loses the oldest
//! events rather than blocking ingestion.

use std::collections::HashMap;

use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use stroller_types::StateEvent;

/// Per-device broadcast channels for pushing [`StateEvent`]s.
pub struct Broadcaster {
    channels: RwLock<HashMap<String, broadcast::Sender<StateEvent>>>,
    buffer: usize,
}

impl Broadcaster {
    /// Create a broadcaster whose channels hold `buffer` pending events.
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer,
        }
    }

    /// Subscribe to a device's events, creating its channel if needed.
    pub async fn subscribe(&self, device_id: &str) -> broadcast::Receiver<StateEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(device_id.to_string())
            .or_insert_with(|| {
                debug!(device_id, "created broadcast channel");
                broadcast::channel(self.buffer).0
            })
            .subscribe()
    }

    /// Publish an event on a device's channel.
    ///
    /// Returns the number of subscribers the event was queued for. Zero
    /// means no client is watching this device; the event is not retained.
    pub async fn publish(&self, device_id: &str, event: StateEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(device_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop a device's channel if it has no subscribers left.
    ///
    /// Called when a WebSocket client disconnects; keeps the map from
    /// accumulating channels for devices nobody watches anymore.
    pub async fn release_if_idle(&self, device_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(tx) = channels.get(device_id)
            && tx.receiver_count() == 0
        {
            channels.remove(device_id);
            debug!(device_id, "released idle broadcast channel");
        }
    }

    /// Current number of subscribers on a device's channel.
    pub async fn subscriber_count(&self, device_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(device_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Number of live channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}
