//! Commands published to the stroller over MQTT.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::types::{RemoteControl, Speed, Steering, StrollerMode};

/// A command relayed to the stroller on its `backend/{device}/commands` topic.
///
/// Serialized as a `{"type": ..., "value": ...}` envelope; commands without a
/// parameter omit `value`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "type", content = "value", rename_all = "camelCase")
)]
#[non_exhaustive]
pub enum DeviceCommand {
    /// Switch the driving mode.
    Mode(StrollerMode),
    /// Apply a speed preset.
    Speed(Speed),
    /// Set the steering position.
    Steer(Steering),
    /// Switch the remote-control input.
    Remote(RemoteControl),
    /// Halt distance tracking on the device side.
    Halt,
    /// Resume distance tracking.
    Resume,
    /// Zero the device's own distance counter.
    ResetDistance,
}

impl DeviceCommand {
    /// The wire name of this command's `type` tag, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceCommand::Mode(_) => "mode",
            DeviceCommand::Speed(_) => "speed",
            DeviceCommand::Steer(_) => "steer",
            DeviceCommand::Remote(_) => "remote",
            DeviceCommand::Halt => "halt",
            DeviceCommand::Resume => "resume",
            DeviceCommand::ResetDistance => "resetDistance",
        }
    }
}
