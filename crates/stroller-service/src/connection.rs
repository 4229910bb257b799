//! Per-device telemetry subscriptions.
//!
//! The service holds one MQTT connection, but each initialized device gets
//! an explicit connection record: its topic set plus counters for the
//! telemetry that arrived on it. The bus consults the manager on every
//! (re)connect to know what to subscribe to, and the REST layer opens and
//! closes records as devices come and go.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::info;

/// Which telemetry topic a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    /// `stroller/{id}/gps`
    Gps,
    /// `stroller/{id}/status`
    Status,
    /// `stroller/{id}/temp_humidity`
    TempHumidity,
}

/// The MQTT topics belonging to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    /// GPS fix stream (inbound).
    pub gps: String,
    /// Status reports (inbound).
    pub status: String,
    /// Temperature and humidity reports (inbound).
    pub temp_humidity: String,
    /// Command topic (outbound only).
    pub commands: String,
}

impl DeviceTopics {
    /// Build the topic set for a device ID.
    #[must_use]
    pub fn for_device(device_id: &str) -> Self {
        Self {
            gps: format!("stroller/{}/gps", device_id),
            status: format!("stroller/{}/status", device_id),
            temp_humidity: format!("stroller/{}/temp_humidity", device_id),
            commands: format!("backend/{}/commands", device_id),
        }
    }

    /// The inbound topics the bus subscribes to for this device.
    #[must_use]
    pub fn subscriptions(&self) -> [&str; 3] {
        [&self.gps, &self.status, &self.temp_humidity]
    }
}

/// Split an inbound topic into device ID and telemetry kind.
///
/// Returns `None` for anything outside the `stroller/{id}/{kind}` shape,
/// including device IDs containing `/`.
#[must_use]
pub fn parse_topic(topic: &str) -> Option<(&str, TelemetryKind)> {
    let rest = topic.strip_prefix("stroller/")?;
    let (device_id, kind) = rest.split_once('/')?;
    if device_id.is_empty() {
        return None;
    }

    let kind = match kind {
        "gps" => TelemetryKind::Gps,
        "status" => TelemetryKind::Status,
        "temp_humidity" => TelemetryKind::TempHumidity,
        _ => return None,
    };

    Some((device_id, kind))
}

/// One device's active subscription.
#[derive(Debug)]
pub struct DeviceConnection {
    /// The device this connection belongs to.
    pub device_id: String,
    /// The device's topic set.
    pub topics: DeviceTopics,
    /// When the connection record was opened.
    pub opened_at: OffsetDateTime,
    /// Telemetry messages routed through this connection.
    messages_received: AtomicU64,
    /// Unix timestamp of the last message, 0 when none arrived yet.
    last_message_at: AtomicU64,
}

impl DeviceConnection {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            topics: DeviceTopics::for_device(device_id),
            opened_at: OffsetDateTime::now_utc(),
            messages_received: AtomicU64::new(0),
            last_message_at: AtomicU64::new(0),
        }
    }

    /// Note one inbound telemetry message.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        self.last_message_at.store(now, Ordering::Relaxed);
    }

    /// Total telemetry messages routed through this connection.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// When the last telemetry message arrived, if any.
    pub fn last_message_at(&self) -> Option<OffsetDateTime> {
        let ts = self.last_message_at.load(Ordering::Relaxed);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }
}

/// Registry of per-device connection records.
#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<String, Arc<DeviceConnection>>>,
}

impl ConnectionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection record for a device, or return the existing one.
    pub async fn open(&self, device_id: &str) -> Arc<DeviceConnection> {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get(device_id) {
            return Arc::clone(existing);
        }

        let connection = Arc::new(DeviceConnection::new(device_id));
        connections.insert(device_id.to_string(), Arc::clone(&connection));
        info!(device_id, "opened device connection");
        connection
    }

    /// Look up a device's connection record.
    pub async fn get(&self, device_id: &str) -> Option<Arc<DeviceConnection>> {
        self.connections.read().await.get(device_id).cloned()
    }

    /// Close a device's connection record. Returns true if one existed.
    pub async fn close(&self, device_id: &str) -> bool {
        let removed = self.connections.write().await.remove(device_id).is_some();
        if removed {
            info!(device_id, "closed device connection");
        }
        removed
    }

    /// Whether a device currently has a connection record.
    pub async fn is_open(&self, device_id: &str) -> bool {
        self.connections.read().await.contains_key(device_id)
    }

    /// Snapshot of all open connection records.
    pub async fn list(&self) -> Vec<Arc<DeviceConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Number of open connection records.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}
