//! MQTT telemetry bus linking strollers to the backend.
//!
//! This module owns the single broker connection. Inbound telemetry is
//! routed into the device registry (and the fix store); outbound device
//! commands queued by REST handlers are published on their way out.
//!
//! # Topic Structure
//!
//! Per device id `{device}`:
//!
//! - `stroller/{device}/gps` - position fixes as `{"latitude", "longitude"}`
//! - `stroller/{device}/status` - status reports as `{"status"}`
//! - `stroller/{device}/temp_humidity` - cabin readings as `{"temperature", "humidity"}`
//! - `backend/{device}/commands` - outbound command envelopes (publish only)
//!
//! # Example Configuration
//!
//! ```toml
//! [mqtt]
//! enabled = true
//! broker = "mqtt://localhost:1883"
//! client_id = "stroller-backend"
//! qos = 1
//! ```
//!
//! # Reconnection
//!
//! The bus reconnects with exponential backoff when the broker drops the
//! connection, and re-subscribes every open device on each ConnAck, so a
//! reconnect is invisible to the rest of the service. Malformed payloads
//! are dropped with a warning; they never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use stroller_core::{ConnectionState, FixOutcome, ReconnectOptions, WalkDetector};
use stroller_types::{GpsFix, StateEvent};

use crate::config::MqttConfig;
use crate::connection::{DeviceTopics, TelemetryKind, parse_topic};
use crate::state::{AppState, BusRequest, OutboundCommand};

/// The MQTT telemetry bus.
pub struct TelemetryBus {
    state: Arc<AppState>,
}

impl TelemetryBus {
    /// Create a new telemetry bus.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start the telemetry bus.
    ///
    /// This spawns a background task that:
    /// 1. Connects to the configured MQTT broker
    /// 2. Subscribes to the telemetry topics of every open device
    /// 3. Routes inbound telemetry into the registry and the fix store
    /// 4. Publishes queued device commands
    ///
    /// Returns immediately; the bus runs in the background.
    pub async fn start(&self) {
        let config = self.state.config.read().await;
        let mqtt_config = config.mqtt.clone();
        drop(config);

        if !mqtt_config.enabled {
            info!("Telemetry bus is disabled");
            return;
        }

        info!("Starting telemetry bus to {}", mqtt_config.broker);

        let state = Arc::clone(&self.state);
        let stop_rx = self.state.bus.subscribe_stop();

        self.state.bus.reset_stop();
        self.state.bus.set_running(true);

        tokio::spawn(async move {
            run_telemetry_bus(state, mqtt_config, stop_rx).await;
        });
    }
}

/// Run the telemetry bus loop.
async fn run_telemetry_bus(
    state: Arc<AppState>,
    config: MqttConfig,
    mut stop_rx: tokio::sync::watch::Receiver<bool>,
) {
    // Parse broker URL
    let (host, port, use_tls) = match parse_broker_url(&config.broker) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Invalid MQTT broker URL: {}", e);
            state.bus.set_running(false);
            return;
        }
    };

    // Configure MQTT client
    let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    // Set credentials if provided
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        mqtt_options.set_credentials(username, password);
    }

    // Enable TLS if using mqtts://
    if use_tls {
        mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    let qos = match config.qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    };

    // Create MQTT client
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    let mut requests_rx = match state.bus.take_request_receiver().await {
        Some(rx) => rx,
        None => {
            error!("Bus request receiver already taken, telemetry bus cannot start");
            state.bus.set_running(false);
            return;
        }
    };

    let reconnect = ReconnectOptions::unlimited()
        .initial_delay(Duration::from_secs(config.reconnect_initial_secs))
        .max_delay(Duration::from_secs(config.reconnect_max_secs))
        .backoff_multiplier(config.reconnect_multiplier);
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("MQTT connected: {:?}", ack.code);
                        attempt = 0;
                        state.bus.set_connection(ConnectionState::Connected).await;
                        resubscribe(&client, &state, qos).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&state, &publish).await;
                    }
                    Ok(Event::Incoming(Packet::PingResp)) => {
                        debug!("MQTT ping response received");
                    }
                    Ok(Event::Outgoing(_)) => {
                        // Outgoing events are normal, no need to log
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let delay = reconnect.delay_for_attempt(attempt);
                        attempt = attempt.saturating_add(1);
                        warn!("MQTT connection error: {}. Reconnecting in {:?}...", e, delay);
                        state.bus.set_connection(ConnectionState::Reconnecting).await;

                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = stop_rx.changed() => {
                                if *stop_rx.borrow() {
                                    info!("Telemetry bus received stop signal");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            request = requests_rx.recv() => {
                match request {
                    Some(BusRequest::Publish(outbound)) => {
                        if let Err(e) = publish_command(&client, &outbound, qos).await {
                            warn!(
                                device_id = %outbound.device_id,
                                "Failed to publish command: {}", e
                            );
                        }
                    }
                    Some(BusRequest::Subscribe(device_id)) => {
                        subscribe_device(&client, &device_id, qos).await;
                    }
                    Some(BusRequest::Unsubscribe(device_id)) => {
                        unsubscribe_device(&client, &device_id).await;
                    }
                    None => {
                        info!("Bus request queue closed, stopping telemetry bus");
                        break;
                    }
                }
            }
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    info!("Telemetry bus received stop signal");
                    break;
                }
            }
        }
    }

    // Disconnect gracefully
    if let Err(e) = client.disconnect().await {
        debug!("Error disconnecting MQTT client: {}", e);
    }

    state.bus.set_connection(ConnectionState::Disconnected).await;
    state.bus.set_running(false);
    info!("Telemetry bus stopped");
}

/// Re-subscribe the telemetry topics of every open device.
///
/// Runs on each ConnAck; the broker treats repeated subscriptions to the
/// same topic as idempotent, so a fresh connect and a reconnect take the
/// same path.
async fn resubscribe(client: &AsyncClient, state: &Arc<AppState>, qos: QoS) {
    let connections = state.connections.list().await;
    if connections.is_empty() {
        debug!("No open device connections to subscribe");
        return;
    }

    info!("Subscribing telemetry topics for {} devices", connections.len());
    for connection in connections {
        for topic in connection.topics.subscriptions() {
            if let Err(e) = client.subscribe(topic, qos).await {
                warn!(topic, "Failed to subscribe: {}", e);
            }
        }
    }
}

/// Subscribe one device's telemetry topics.
async fn subscribe_device(client: &AsyncClient, device_id: &str, qos: QoS) {
    let topics = DeviceTopics::for_device(device_id);
    for topic in topics.subscriptions() {
        if let Err(e) = client.subscribe(topic, qos).await {
            warn!(topic, "Failed to subscribe: {}", e);
        }
    }
    debug!(device_id, "subscribed telemetry topics");
}

/// Drop one device's telemetry subscriptions.
async fn unsubscribe_device(client: &AsyncClient, device_id: &str) {
    let topics = DeviceTopics::for_device(device_id);
    for topic in topics.subscriptions() {
        if let Err(e) = client.unsubscribe(topic).await {
            warn!(topic, "Failed to unsubscribe: {}", e);
        }
    }
    debug!(device_id, "dropped telemetry subscriptions");
}

/// Publish a command envelope on the device's command topic.
///
/// Commands are never retained: replaying a stale command to a stroller
/// that reconnects later would be worse than dropping it.
async fn publish_command(
    client: &AsyncClient,
    outbound: &OutboundCommand,
    qos: QoS,
) -> Result<(), rumqttc::ClientError> {
    let topics = DeviceTopics::for_device(&outbound.device_id);
    let payload = serde_json::to_string(&outbound.command).unwrap_or_default();

    client
        .publish(&topics.commands, qos, false, payload.as_bytes())
        .await?;

    debug!(
        device_id = %outbound.device_id,
        command = outbound.command.kind(),
        "published device command"
    );

    Ok(())
}

/// Route one inbound publish packet.
async fn handle_publish(state: &Arc<AppState>, publish: &Publish) {
    let Some((device_id, kind)) = parse_topic(&publish.topic) else {
        state.bus.record_parse_failure();
        warn!(topic = %publish.topic, "Ignoring message on unrecognized topic");
        return;
    };

    if let Some(connection) = state.connections.get(device_id).await {
        connection.record_message();
    }

    dispatch_telemetry(state, device_id, kind, &publish.payload).await;
}

/// Wire payload of `stroller/{device}/gps`.
#[derive(Debug, Deserialize)]
struct GpsPayload {
    latitude: f64,
    longitude: f64,
}

/// Wire payload of `stroller/{device}/status`.
#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: String,
}

/// Wire payload of `stroller/{device}/temp_humidity`.
#[derive(Debug, Deserialize)]
struct TempHumidityPayload {
    temperature: f32,
    humidity: f32,
}

/// Parse and apply one telemetry payload, then broadcast the result.
///
/// Factored out of the event loop so ingestion is testable without a
/// broker. Never fails: malformed payloads are counted and dropped.
pub(crate) async fn dispatch_telemetry(
    state: &Arc<AppState>,
    device_id: &str,
    kind: TelemetryKind,
    payload: &[u8],
) {
    state.bus.record_message();

    match kind {
        TelemetryKind::Gps => {
            let gps: GpsPayload = match serde_json::from_slice(payload) {
                Ok(gps) => gps,
                Err(e) => {
                    state.bus.record_parse_failure();
                    warn!(device_id, "Dropping malformed GPS payload: {}", e);
                    return;
                }
            };

            let fix = GpsFix::new(gps.latitude, gps.longitude, OffsetDateTime::now_utc());
            if !fix.has_finite_coordinates() {
                state.bus.record_parse_failure();
                warn!(device_id, "Dropping GPS fix with non-finite coordinates");
                return;
            }

            ingest_fix(state, device_id, fix).await;
        }
        TelemetryKind::Status => {
            let report: StatusPayload = match serde_json::from_slice(payload) {
                Ok(report) => report,
                Err(e) => {
                    state.bus.record_parse_failure();
                    warn!(device_id, "Dropping malformed status payload: {}", e);
                    return;
                }
            };

            let status = report.status;
            state
                .registry
                .update_or_create(device_id, |device| {
                    device.status = status.clone();
                })
                .await;

            state
                .broadcaster
                .publish(device_id, StateEvent::Status { status })
                .await;
        }
        TelemetryKind::TempHumidity => {
            let readings: TempHumidityPayload = match serde_json::from_slice(payload) {
                Ok(readings) => readings,
                Err(e) => {
                    state.bus.record_parse_failure();
                    warn!(device_id, "Dropping malformed temp_humidity payload: {}", e);
                    return;
                }
            };

            state
                .registry
                .update_or_create(device_id, |device| {
                    device.temperature = Some(readings.temperature);
                    device.humidity = Some(readings.humidity);
                })
                .await;

            state
                .broadcaster
                .publish(
                    device_id,
                    StateEvent::TempHumidity {
                        temperature: Some(readings.temperature),
                        humidity: Some(readings.humidity),
                    },
                )
                .await;
        }
    }
}

/// Feed one validated fix through walk detection and fan out the result.
async fn ingest_fix(state: &Arc<AppState>, device_id: &str, fix: GpsFix) {
    let thresholds = state.config.read().await.walk.clone();
    let detector = WalkDetector::new(thresholds);

    let (outcome, snapshot) = state
        .registry
        .update_or_create(device_id, |device| detector.process_fix(device, fix))
        .await;

    if outcome.walk_completed() {
        info!(device_id, walk_count = snapshot.walk_count, "walk completed");
    }

    match outcome {
        FixOutcome::Retained { delta_meters, .. } => {
            {
                let store = state.store.lock().await;
                if let Err(e) =
                    store.insert_fix(device_id, &fix, snapshot.walk_count, snapshot.walking_state)
                {
                    warn!(device_id, error = %e, "failed to persist GPS fix");
                }
            }

            debug!(
                device_id,
                delta_meters,
                distance = snapshot.distance_meters,
                "retained GPS fix"
            );

            state
                .broadcaster
                .publish(
                    device_id,
                    StateEvent::Update {
                        latitude: fix.latitude,
                        longitude: fix.longitude,
                        distance: snapshot.distance_meters,
                    },
                )
                .await;
        }
        FixOutcome::Jitter { walk_completed } => {
            if walk_completed {
                // The fix itself is not retained, but it marks where the
                // walk ended; keep that boundary in the fix log.
                let store = state.store.lock().await;
                if let Err(e) =
                    store.insert_fix(device_id, &fix, snapshot.walk_count, snapshot.walking_state)
                {
                    warn!(device_id, error = %e, "failed to persist walk boundary fix");
                }
            } else {
                debug!(device_id, "discarded jitter fix");
            }
        }
        FixOutcome::Halted => {
            debug!(device_id, "tracking halted, fix ignored");
        }
    }
}

/// Parse an MQTT broker URL into (host, port, use_tls).
fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    let (scheme, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        ("mqtt", stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        ("mqtts", stripped)
    } else {
        return Err("Invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    };

    let use_tls = scheme == "mqtts";
    let default_port = if use_tls { 8883 } else { 1883 };

    // Parse host:port
    let (host, port) = if let Some((h, p)) = rest.rsplit_once(':') {
        let port = p
            .parse::<u16>()
            .map_err(|_| format!("Invalid port: {}", p))?;
        (h.to_string(), port)
    } else {
        (rest.to_string(), default_port)
    };

    if host.is_empty() {
        return Err("Host cannot be empty".to_string());
    }

    Ok((host, port, use_tls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use stroller_store::Store;
    use stroller_types::WalkingState;

    fn test_state() -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        AppState::new(store, Config::default())
    }

    #[test]
    fn test_parse_broker_url_mqtt() {
        let (host, port, tls) = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
        assert!(!tls);
    }

    #[test]
    fn test_parse_broker_url_mqtts() {
        let (host, port, tls) = parse_broker_url("mqtts://broker.example.com:8883").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);
        assert!(tls);
    }

    #[test]
    fn test_parse_broker_url_default_port() {
        let (host, port, tls) = parse_broker_url("mqtt://localhost").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
        assert!(!tls);

        let (host, port, tls) = parse_broker_url("mqtts://secure.example.com").unwrap();
        assert_eq!(host, "secure.example.com");
        assert_eq!(port, 8883);
        assert!(tls);
    }

    #[test]
    fn test_parse_broker_url_invalid_scheme() {
        assert!(parse_broker_url("http://localhost:1883").is_err());
        assert!(parse_broker_url("localhost:1883").is_err());
    }

    #[test]
    fn test_parse_broker_url_empty_host() {
        assert!(parse_broker_url("mqtt://:1883").is_err());
    }

    #[tokio::test]
    async fn test_gps_telemetry_creates_state_and_persists_fix() {
        let state = test_state();
        let mut rx = state.broadcaster.subscribe("stroller-1").await;

        dispatch_telemetry(
            &state,
            "stroller-1",
            TelemetryKind::Gps,
            br#"{"latitude": 52.52, "longitude": 13.405}"#,
        )
        .await;

        let snapshot = state.registry.snapshot("stroller-1").await.unwrap();
        assert_eq!(snapshot.gps_history.len(), 1);
        assert_eq!(snapshot.walking_state, WalkingState::Idle);

        let store = state.store.lock().await;
        assert_eq!(store.count_fixes(Some("stroller-1")).unwrap(), 1);
        drop(store);

        match rx.try_recv().unwrap() {
            StateEvent::Update {
                latitude,
                longitude,
                distance,
            } => {
                assert_eq!(latitude, 52.52);
                assert_eq!(longitude, 13.405);
                assert_eq!(distance, 0.0);
            }
            other => panic!("expected update event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gps_jitter_is_not_persisted_or_broadcast() {
        let state = test_state();

        dispatch_telemetry(
            &state,
            "stroller-1",
            TelemetryKind::Gps,
            br#"{"latitude": 52.52, "longitude": 13.405}"#,
        )
        .await;

        let mut rx = state.broadcaster.subscribe("stroller-1").await;

        // Within the 5 m jitter threshold of the first fix.
        dispatch_telemetry(
            &state,
            "stroller-1",
            TelemetryKind::Gps,
            br#"{"latitude": 52.520001, "longitude": 13.405001}"#,
        )
        .await;

        let snapshot = state.registry.snapshot("stroller-1").await.unwrap();
        assert_eq!(snapshot.gps_history.len(), 1);

        let store = state.store.lock().await;
        assert_eq!(store.count_fixes(Some("stroller-1")).unwrap(), 1);
        drop(store);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_gps_ignored_while_halted() {
        let state = test_state();
        state.registry.initialize("stroller-1").await;
        state
            .registry
            .update("stroller-1", |device| device.tracking_halted = true)
            .await;

        dispatch_telemetry(
            &state,
            "stroller-1",
            TelemetryKind::Gps,
            br#"{"latitude": 52.52, "longitude": 13.405}"#,
        )
        .await;

        let snapshot = state.registry.snapshot("stroller-1").await.unwrap();
        assert!(snapshot.gps_history.is_empty());
        assert_eq!(snapshot.distance_meters, 0.0);

        let store = state.store.lock().await;
        assert_eq!(store.count_fixes(Some("stroller-1")).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_walk_boundary_is_persisted() {
        let state = test_state();
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        // Anchor, then a ~313 m jump marks the device MOVING.
        ingest_fix(&state, "stroller-1", GpsFix::new(10.0, 10.0, start)).await;
        ingest_fix(
            &state,
            "stroller-1",
            GpsFix::new(10.002, 10.002, start + time::Duration::seconds(60)),
        )
        .await;

        let moving = state.registry.snapshot("stroller-1").await.unwrap();
        assert_eq!(moving.walking_state, WalkingState::Moving);

        // A jitter fix past the cooldown closes the walk; the boundary
        // lands in the fix log even though the fix itself was discarded.
        ingest_fix(
            &state,
            "stroller-1",
            GpsFix::new(10.002, 10.002, start + time::Duration::seconds(300)),
        )
        .await;

        let snapshot = state.registry.snapshot("stroller-1").await.unwrap();
        assert_eq!(snapshot.walk_count, 1);
        assert_eq!(snapshot.walking_state, WalkingState::Idle);
        assert_eq!(snapshot.gps_history.len(), 2);

        let store = state.store.lock().await;
        assert_eq!(store.count_fixes(Some("stroller-1")).unwrap(), 3);

        let boundary = store.latest_fix("stroller-1").unwrap().unwrap();
        assert_eq!(boundary.walk_count, 1);
        assert_eq!(boundary.walking_state, WalkingState::Idle);
        assert_eq!(boundary.latitude, 10.002);
    }

    #[tokio::test]
    async fn test_malformed_gps_payload_is_counted_and_dropped() {
        let state = test_state();

        dispatch_telemetry(&state, "stroller-1", TelemetryKind::Gps, b"not json").await;

        assert_eq!(state.bus.parse_failures(), 1);
        assert!(state.registry.snapshot("stroller-1").await.is_none());
    }

    #[tokio::test]
    async fn test_non_finite_coordinates_are_dropped() {
        let state = test_state();

        // 1e999 overflows f64 and parses as infinity.
        dispatch_telemetry(
            &state,
            "stroller-1",
            TelemetryKind::Gps,
            br#"{"latitude": 1e999, "longitude": 0.0}"#,
        )
        .await;

        assert_eq!(state.bus.parse_failures(), 1);
        assert!(state.registry.snapshot("stroller-1").await.is_none());
    }

    #[tokio::test]
    async fn test_status_telemetry_updates_state_and_broadcasts() {
        let state = test_state();
        let mut rx = state.broadcaster.subscribe("stroller-1").await;

        dispatch_telemetry(
            &state,
            "stroller-1",
            TelemetryKind::Status,
            br#"{"status": "Left wheel blocked"}"#,
        )
        .await;

        let snapshot = state.registry.snapshot("stroller-1").await.unwrap();
        assert_eq!(snapshot.status, "Left wheel blocked");

        assert_eq!(
            rx.try_recv().unwrap(),
            StateEvent::Status {
                status: "Left wheel blocked".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_temp_humidity_telemetry_updates_state_and_broadcasts() {
        let state = test_state();
        let mut rx = state.broadcaster.subscribe("stroller-1").await;

        dispatch_telemetry(
            &state,
            "stroller-1",
            TelemetryKind::TempHumidity,
            br#"{"temperature": 21.5, "humidity": 48.0}"#,
        )
        .await;

        let snapshot = state.registry.snapshot("stroller-1").await.unwrap();
        assert_eq!(snapshot.temperature, Some(21.5));
        assert_eq!(snapshot.humidity, Some(48.0));

        assert_eq!(
            rx.try_recv().unwrap(),
            StateEvent::TempHumidity {
                temperature: Some(21.5),
                humidity: Some(48.0),
            }
        );
    }

    #[tokio::test]
    async fn test_telemetry_counters() {
        let state = test_state();

        dispatch_telemetry(
            &state,
            "stroller-1",
            TelemetryKind::Status,
            br#"{"status": "All good"}"#,
        )
        .await;
        dispatch_telemetry(&state, "stroller-1", TelemetryKind::Status, b"garbage").await;

        assert_eq!(state.bus.messages_received(), 2);
        assert_eq!(state.bus.parse_failures(), 1);
    }
}
