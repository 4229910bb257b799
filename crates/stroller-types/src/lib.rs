//! Shared domain and wire types for the stroller telemetry backend.
//!
//! This crate provides the types shared by the service, the domain logic,
//! and the persistence layer:
//!
//! - The authoritative [`DeviceState`] record and its field types
//! - The [`StateEvent`] push envelope delivered to WebSocket clients
//! - The [`DeviceCommand`] envelope published to strollers over MQTT
//! - Error types for wire-value parsing
//!
//! # Example
//!
//! ```
//! use stroller_types::{DeviceState, Speed, StrollerMode};
//!
//! let state = DeviceState::new("stroller-042");
//! assert_eq!(state.mode, StrollerMode::Manual);
//! assert_eq!(state.speed, Speed::Stop);
//! assert_eq!(state.status, "All good");
//! ```

pub mod commands;
pub mod error;
pub mod events;
pub mod types;

pub use commands::DeviceCommand;
pub use error::{ParseError, ParseResult};
pub use events::{StateEvent, WsRequest};
pub use types::{
    DeviceState, GpsFix, RemoteControl, Speed, Steering, StrollerMode, WalkingState,
};
