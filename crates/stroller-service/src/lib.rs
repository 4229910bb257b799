//! MQTT telemetry collector and HTTP REST API for connected strollers.
//!
//! This crate provides a service that:
//! - Subscribes to per-device telemetry topics on an MQTT broker
//! - Tracks live device state and walk detection, persisting through restarts
//! - Publishes drive commands back to strollers
//! - Exposes a REST API for control and queries
//! - Provides WebSocket connections for real-time updates
//! - Optional API token authentication
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check (no auth required)
//! - `POST /api/initialize` - Initialize a device and open its subscriptions
//! - `POST /api/mode` - Set the driving mode
//! - `POST /api/speed` - Set the speed preset
//! - `POST /api/steer` - Set the steering position
//! - `POST /api/remote` - Select the remote-control input
//! - `GET /api/distance` - Accumulated travel distance
//! - `POST /api/distance/reset` - Zero the distance counter
//! - `POST /api/distance/halt` - Pause distance tracking
//! - `POST /api/distance/resume` - Resume distance tracking
//! - `GET /api/status` - Full device state record
//! - `GET/PUT /api/temp_humidity` - Cabin climate readings
//! - `GET /api/devices` - Device directory
//! - `POST /api/devices` - Register a device
//! - `DELETE /api/devices/{id}` - Remove a device
//! - `GET /api/devices/{id}/fixes` - Query the persisted GPS fix log
//! - `WS /api/ws?deviceId={id}` - Real-time state event stream
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/stroller/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/stroller/data.db"
//!
//! [mqtt]
//! broker = "mqtt://localhost:1883"
//! client_id = "stroller-backend"
//!
//! [[devices]]
//! id = "stroller-17"
//! alias = "Emma's stroller"
//! ```
//!
//! # Security
//!
//! Optional token authentication can be enabled:
//!
//! ```toml
//! [security]
//! # Require X-API-Token header for all requests (except /api/health)
//! api_token = "your-secure-random-token-at-least-16-chars"
//! ```

pub mod api;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod middleware;
pub mod mqtt;
pub mod registry;
pub mod state;
pub mod ws;

pub use config::{
    Config, ConfigError, DeviceConfig, MqttConfig, SecurityConfig, ServerConfig, StorageConfig,
};
pub use mqtt::TelemetryBus;
pub use state::AppState;
