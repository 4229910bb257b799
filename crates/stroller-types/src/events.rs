//! Push events delivered to WebSocket clients.
//!
//! Every frame on the wire is a `{"type": ..., "data": ...}` envelope. The
//! `type` tag names what changed; `data` carries the minimal payload a client
//! needs to update its view without refetching.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::types::{DeviceState, RemoteControl, Speed, Steering, StrollerMode};

/// A device-scoped state change pushed to subscribed clients.
///
/// Events are only ever delivered on the channel of the device they concern.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "type", content = "data", rename_all = "camelCase")
)]
#[non_exhaustive]
pub enum StateEvent {
    /// A GPS fix was ingested; carries the new position and total distance.
    Update {
        latitude: f64,
        longitude: f64,
        distance: f64,
    },
    /// The stroller reported a new status string.
    Status { status: String },
    /// The stroller reported new cabin readings.
    TempHumidity {
        temperature: Option<f32>,
        humidity: Option<f32>,
    },
    /// The driving mode was changed over the REST API.
    ModeChange { mode: StrollerMode },
    /// The speed preset was changed over the REST API.
    SpeedChange { speed: Speed },
    /// The steering position was changed over the REST API.
    SetSteering { steering: Steering },
    /// The remote-control input was changed over the REST API.
    SetRemote { remote: RemoteControl },
    /// Distance tracking was reset; `distance` is the new (zero) total.
    ResetDistance { distance: f64 },
    /// Distance tracking was halted.
    HaltDistance { halted: bool },
    /// Distance tracking was resumed.
    ResumeDistance { halted: bool },
    /// Reply to a client's `getDistance` request.
    GetDistance { distance: f64 },
    /// Reply to a client's `getStatus` request: the full state record.
    GetStatus(DeviceState),
    /// Reply to a client's `getTempHumidity` request.
    GetTempHumidity {
        temperature: Option<f32>,
        humidity: Option<f32>,
    },
    /// Cabin readings were written over the REST API.
    SetTempHumidity { temperature: f32, humidity: f32 },
    /// Full state snapshot, sent once immediately after subscribing.
    Initial(DeviceState),
}

impl StateEvent {
    /// The wire name of this event's `type` tag, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StateEvent::Update { .. } => "update",
            StateEvent::Status { .. } => "status",
            StateEvent::TempHumidity { .. } => "tempHumidity",
            StateEvent::ModeChange { .. } => "modeChange",
            StateEvent::SpeedChange { .. } => "speedChange",
            StateEvent::SetSteering { .. } => "setSteering",
            StateEvent::SetRemote { .. } => "setRemote",
            StateEvent::ResetDistance { .. } => "resetDistance",
            StateEvent::HaltDistance { .. } => "haltDistance",
            StateEvent::ResumeDistance { .. } => "resumeDistance",
            StateEvent::GetDistance { .. } => "getDistance",
            StateEvent::GetStatus(_) => "getStatus",
            StateEvent::GetTempHumidity { .. } => "getTempHumidity",
            StateEvent::SetTempHumidity { .. } => "setTempHumidity",
            StateEvent::Initial(_) => "initial",
        }
    }
}

/// A request frame sent by a WebSocket client.
///
/// Clients may poll current values on demand; the service answers on the
/// device's channel with the matching [`StateEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "type", rename_all = "camelCase")
)]
pub enum WsRequest {
    /// Ask for the current total distance.
    GetDistance,
    /// Ask for the full state record.
    GetStatus,
    /// Ask for the latest cabin readings.
    GetTempHumidity,
}
