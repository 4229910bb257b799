//! Application state shared across handlers.
//!
//! # Broadcast Channel Behavior
//!
//! Per-device broadcast channels push state events to WebSocket clients.
//! Key characteristics:
//!
//! - **Buffer size**: Configurable via `server.broadcast_buffer` (default: 64)
//! - **Message loss**: If a subscriber falls behind and the buffer fills, old events are dropped
//! - **No blocking**: Senders never block; they succeed or drop events for slow receivers
//!
//! ## Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//! broadcast_buffer = 200  # Larger buffer for slow clients
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use stroller_store::Store;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{debug, info, warn};

use stroller_core::ConnectionState;
use stroller_types::DeviceCommand;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::connection::{ConnectionManager, DeviceConnection};
use crate::registry::DeviceRegistry;

/// Depth of the request queue between REST handlers and the bus task.
const BUS_QUEUE_DEPTH: usize = 64;

/// Shared application state.
pub struct AppState {
    /// The data store (shared with the registry for write-through).
    pub store: Arc<Mutex<Store>>,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
    /// Authoritative per-device state.
    pub registry: DeviceRegistry,
    /// Per-device event channels for WebSocket push.
    pub broadcaster: Broadcaster,
    /// Per-device telemetry subscriptions.
    pub connections: ConnectionManager,
    /// Telemetry bus control state.
    pub bus: BusState,
    /// Where the config was loaded from, for persisting runtime changes.
    config_path: RwLock<Option<PathBuf>>,
}

impl AppState {
    /// Create new application state.
    ///
    /// The per-device broadcast buffer size is taken from
    /// `config.server.broadcast_buffer`. If a buffer fills (slow
    /// subscribers), old events are dropped without blocking.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let store = Arc::new(Mutex::new(store));
        let buffer_size = config.server.broadcast_buffer;
        Arc::new(Self {
            registry: DeviceRegistry::new(Arc::clone(&store)),
            broadcaster: Broadcaster::new(buffer_size),
            connections: ConnectionManager::new(),
            bus: BusState::new(),
            store,
            config: RwLock::new(config),
            config_path: RwLock::new(None),
        })
    }

    /// Remember which file the config came from.
    ///
    /// Device directory changes made over the API are saved back to this
    /// path. Without one (tests, ad hoc runs) changes stay in memory.
    pub async fn set_config_path(&self, path: PathBuf) {
        *self.config_path.write().await = Some(path);
    }

    /// Persist the config after a device directory change.
    pub async fn on_devices_changed(&self) {
        let path = self.config_path.read().await.clone();
        let Some(path) = path else {
            return;
        };

        let config = self.config.read().await;
        match config.save(&path) {
            Ok(()) => info!(path = %path.display(), "saved device directory"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to save config"),
        }
    }

    /// Queue a command for publication on the device's command topic.
    ///
    /// The triggering mutation is already persisted by the time this runs;
    /// a full queue or a disabled bus drops the command with a log line
    /// rather than failing the request.
    pub fn publish_command(&self, device_id: &str, command: DeviceCommand) {
        self.send_bus_request(BusRequest::Publish(OutboundCommand {
            device_id: device_id.to_string(),
            command,
        }));
    }

    /// Open a device's telemetry subscriptions.
    ///
    /// Records the connection and asks the bus to subscribe. When the bus
    /// is down the record alone suffices: every ConnAck resubscribes the
    /// full set held by the connection manager.
    pub async fn open_device(&self, device_id: &str) -> Arc<DeviceConnection> {
        let connection = self.connections.open(device_id).await;
        self.send_bus_request(BusRequest::Subscribe(device_id.to_string()));
        connection
    }

    /// Close a device's telemetry subscriptions.
    ///
    /// Returns false when the device had no open connection.
    pub async fn close_device(&self, device_id: &str) -> bool {
        let closed = self.connections.close(device_id).await;
        if closed {
            self.send_bus_request(BusRequest::Unsubscribe(device_id.to_string()));
        }
        closed
    }

    fn send_bus_request(&self, request: BusRequest) {
        if !self.bus.is_running() {
            debug!(request = ?request, "telemetry bus not running, request dropped");
            return;
        }

        if let Err(e) = self.bus.requests_tx.try_send(request) {
            warn!(error = %e, "failed to queue bus request");
        }
    }
}

/// A command bound for a device's MQTT command topic.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    /// Target device.
    pub device_id: String,
    /// The command to serialize and publish.
    pub command: DeviceCommand,
}

/// Work handed from request handlers to the bus task.
#[derive(Debug, Clone, PartialEq)]
pub enum BusRequest {
    /// Publish a command envelope on the device's command topic.
    Publish(OutboundCommand),
    /// Subscribe to a device's telemetry topics.
    Subscribe(String),
    /// Drop the subscriptions to a device's telemetry topics.
    Unsubscribe(String),
}

/// State for tracking and controlling the telemetry bus.
pub struct BusState {
    /// Whether the bus task is currently running.
    running: AtomicBool,
    /// When the bus was started (Unix timestamp).
    started_at: AtomicU64,
    /// Channel to signal the bus task to stop.
    stop_tx: watch::Sender<bool>,
    /// Receiver for stop signal (cloned by the bus task).
    stop_rx: watch::Receiver<bool>,
    /// Telemetry messages ingested since startup.
    messages_received: AtomicU64,
    /// Payloads or topics dropped as unparseable.
    parse_failures: AtomicU64,
    /// Current broker link state.
    connection: RwLock<ConnectionState>,
    /// Sender side of the request queue.
    requests_tx: mpsc::Sender<BusRequest>,
    /// Receiver side, taken once by the bus task on startup.
    requests_rx: Mutex<Option<mpsc::Receiver<BusRequest>>>,
}

impl BusState {
    /// Create a new bus state.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (requests_tx, requests_rx) = mpsc::channel(BUS_QUEUE_DEPTH);
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            stop_tx,
            stop_rx,
            messages_received: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            connection: RwLock::new(ConnectionState::Disconnected),
            requests_tx,
            requests_rx: Mutex::new(Some(requests_rx)),
        }
    }

    /// Check if the bus is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the bus as started or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    /// Get the bus start time.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal the bus task to stop.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Reset the stop signal (for restarting).
    pub fn reset_stop(&self) {
        let _ = self.stop_tx.send(false);
    }

    /// Take the request queue receiver. Yields `Some` exactly once.
    pub async fn take_request_receiver(&self) -> Option<mpsc::Receiver<BusRequest>> {
        self.requests_rx.lock().await.take()
    }

    /// Note one ingested telemetry message.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Note one dropped, unparseable message.
    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Telemetry messages ingested since startup.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Messages dropped as unparseable since startup.
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    /// Record the broker link state.
    pub async fn set_connection(&self, state: ConnectionState) {
        *self.connection.write().await = state;
    }

    /// Current broker link state.
    pub async fn connection(&self) -> ConnectionState {
        *self.connection.read().await
    }
}

impl Default for BusState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stroller_types::{Speed, StateEvent};

    #[tokio::test]
    async fn test_app_state_new() {
        let store = Store::open_in_memory().unwrap();
        let config = Config::default();
        let state = AppState::new(store, config);

        let config = state.config.read().await;
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_app_state_store_access() {
        let store = Store::open_in_memory().unwrap();
        let config = Config::default();
        let state = AppState::new(store, config);

        let store = state.store.lock().await;
        let states = store.list_device_states().unwrap();
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn test_registry_writes_through_shared_store() {
        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(store, Config::default());

        state.registry.initialize("stroller-1").await;

        let store = state.store.lock().await;
        let persisted = store.get_device_state("stroller-1").unwrap();
        assert!(persisted.is_some());
    }

    #[tokio::test]
    async fn test_broadcaster_wired_to_config_buffer() {
        let store = Store::open_in_memory().unwrap();
        let mut config = Config::default();
        config.server.broadcast_buffer = 2;
        let state = AppState::new(store, config);

        let mut rx = state.broadcaster.subscribe("stroller-1").await;
        for i in 0..4 {
            state
                .broadcaster
                .publish(
                    "stroller-1",
                    StateEvent::Update {
                        latitude: 10.0,
                        longitude: f64::from(i),
                        distance: 0.0,
                    },
                )
                .await;
        }

        // Buffer of 2 means the oldest two were dropped.
        assert!(matches!(
            rx.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(2))
        ));
    }

    #[test]
    fn test_bus_state() {
        let bus = BusState::new();
        assert!(!bus.is_running());
        assert!(bus.started_at().is_none());

        bus.set_running(true);
        assert!(bus.is_running());
        assert!(bus.started_at().is_some());

        bus.signal_stop();
        assert!(!bus.is_running());
    }

    #[test]
    fn test_bus_state_stop_and_reset() {
        let bus = BusState::new();
        let rx = bus.subscribe_stop();

        assert!(!*rx.borrow());

        bus.signal_stop();
        assert!(*rx.borrow());

        bus.reset_stop();
        assert!(!*rx.borrow());
    }

    #[test]
    fn test_bus_state_counters() {
        let bus = BusState::new();

        bus.record_message();
        bus.record_message();
        bus.record_parse_failure();

        assert_eq!(bus.messages_received(), 2);
        assert_eq!(bus.parse_failures(), 1);
    }

    #[tokio::test]
    async fn test_bus_connection_state() {
        let bus = BusState::new();
        assert_eq!(bus.connection().await, ConnectionState::Disconnected);

        bus.set_connection(ConnectionState::Connected).await;
        assert_eq!(bus.connection().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_request_receiver_taken_once() {
        let bus = BusState::new();

        assert!(bus.take_request_receiver().await.is_some());
        assert!(bus.take_request_receiver().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_command_queues_when_running() {
        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(store, Config::default());
        state.bus.set_running(true);

        let mut rx = state.bus.take_request_receiver().await.unwrap();
        state.publish_command("stroller-1", DeviceCommand::Speed(Speed::High));

        let request = rx.recv().await.unwrap();
        assert_eq!(
            request,
            BusRequest::Publish(OutboundCommand {
                device_id: "stroller-1".to_string(),
                command: DeviceCommand::Speed(Speed::High),
            })
        );
    }

    #[tokio::test]
    async fn test_publish_command_dropped_when_bus_stopped() {
        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(store, Config::default());

        let mut rx = state.bus.take_request_receiver().await.unwrap();
        state.publish_command("stroller-1", DeviceCommand::Halt);

        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_open_device_records_connection_and_queues_subscribe() {
        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(store, Config::default());
        state.bus.set_running(true);

        let mut rx = state.bus.take_request_receiver().await.unwrap();
        state.open_device("stroller-1").await;

        assert!(state.connections.is_open("stroller-1").await);
        assert_eq!(
            rx.recv().await.unwrap(),
            BusRequest::Subscribe("stroller-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_close_device_without_connection_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(store, Config::default());
        state.bus.set_running(true);

        let mut rx = state.bus.take_request_receiver().await.unwrap();
        assert!(!state.close_device("stroller-1").await);

        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_on_devices_changed_saves_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("server.toml");

        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(store, Config::default());
        state.set_config_path(config_path.clone()).await;

        {
            let mut config = state.config.write().await;
            config.devices.push(crate::config::DeviceConfig {
                id: "stroller-17".to_string(),
                alias: None,
            });
        }
        state.on_devices_changed().await;

        let saved = Config::load(&config_path).unwrap();
        assert_eq!(saved.devices.len(), 1);
        assert_eq!(saved.devices[0].id, "stroller-17");
    }

    #[tokio::test]
    async fn test_on_devices_changed_without_path_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(store, Config::default());

        // No config path set; nothing to write, nothing to panic on.
        state.on_devices_changed().await;
    }
}
