//! Core types for stroller device state and telemetry.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Driving mode of the stroller.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new modes
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum StrollerMode {
    /// Parent pushes; motors assist only.
    #[default]
    Manual,
    /// Fully autonomous driving.
    Auto,
    /// Autonomous driving paced to the walking parent.
    AutoStroll,
}

impl StrollerMode {
    /// Parse a mode from its canonical wire name.
    ///
    /// Matching is exact; the companion app sends the names verbatim.
    ///
    /// # Examples
    ///
    /// ```
    /// use stroller_types::StrollerMode;
    ///
    /// assert_eq!(StrollerMode::from_name("Manual"), Some(StrollerMode::Manual));
    /// assert_eq!(StrollerMode::from_name("AutoStroll"), Some(StrollerMode::AutoStroll));
    /// assert_eq!(StrollerMode::from_name("manual"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Manual" => Some(StrollerMode::Manual),
            "Auto" => Some(StrollerMode::Auto),
            "AutoStroll" => Some(StrollerMode::AutoStroll),
            _ => None,
        }
    }

    /// The canonical wire name of this mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StrollerMode::Manual => "Manual",
            StrollerMode::Auto => "Auto",
            StrollerMode::AutoStroll => "AutoStroll",
        }
    }
}

impl fmt::Display for StrollerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Motor speed preset, in km/h.
///
/// Only the four factory presets are valid; the firmware rejects anything
/// else, so the backend does too. Serialized as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "u8", into = "u8")
)]
#[repr(u8)]
pub enum Speed {
    /// Motors stopped.
    #[default]
    Stop = 0,
    /// Slow assist.
    Low = 7,
    /// Regular walking pace.
    Medium = 10,
    /// Brisk pace.
    High = 15,
}

impl Speed {
    /// The numeric value sent on the wire.
    #[must_use]
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Speed {
    type Error = ParseError;

    /// Convert a numeric speed to a preset.
    ///
    /// # Examples
    ///
    /// ```
    /// use stroller_types::Speed;
    ///
    /// assert_eq!(Speed::try_from(0), Ok(Speed::Stop));
    /// assert_eq!(Speed::try_from(10), Ok(Speed::Medium));
    /// assert!(Speed::try_from(12).is_err());
    /// ```
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Speed::Stop),
            7 => Ok(Speed::Low),
            10 => Ok(Speed::Medium),
            15 => Ok(Speed::High),
            _ => Err(ParseError::InvalidSpeed(value)),
        }
    }
}

impl From<Speed> for u8 {
    fn from(speed: Speed) -> Self {
        speed.value()
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Steering position as a percentage of full lock.
///
/// Negative values steer left, positive right; the valid range is
/// `[-100.0, 100.0]`. Serialized as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "f32", into = "f32")
)]
pub struct Steering(f32);

impl Steering {
    /// Create a steering value, rejecting non-finite or out-of-range input.
    ///
    /// # Examples
    ///
    /// ```
    /// use stroller_types::Steering;
    ///
    /// assert!(Steering::new(-20.0).is_ok());
    /// assert!(Steering::new(100.0).is_ok());
    /// assert!(Steering::new(150.0).is_err());
    /// assert!(Steering::new(f32::NAN).is_err());
    /// ```
    pub fn new(value: f32) -> Result<Self, ParseError> {
        if value.is_finite() && (-100.0..=100.0).contains(&value) {
            Ok(Steering(value))
        } else {
            Err(ParseError::InvalidSteering(value))
        }
    }

    /// The raw steering percentage.
    #[must_use]
    pub fn value(&self) -> f32 {
        self.0
    }
}

impl TryFrom<f32> for Steering {
    type Error = ParseError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Steering::new(value)
    }
}

impl From<Steering> for f32 {
    fn from(steering: Steering) -> Self {
        steering.0
    }
}

impl fmt::Display for Steering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which remote-control input currently drives the stroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
#[non_exhaustive]
pub enum RemoteControl {
    /// The companion phone app.
    #[default]
    Phone,
    /// The wearable ring controller.
    Ring,
}

impl RemoteControl {
    /// Parse a remote-control option from its wire name.
    ///
    /// # Examples
    ///
    /// ```
    /// use stroller_types::RemoteControl;
    ///
    /// assert_eq!(RemoteControl::from_name("phone"), Some(RemoteControl::Phone));
    /// assert_eq!(RemoteControl::from_name("ring"), Some(RemoteControl::Ring));
    /// assert_eq!(RemoteControl::from_name("watch"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "phone" => Some(RemoteControl::Phone),
            "ring" => Some(RemoteControl::Ring),
            _ => None,
        }
    }

    /// The canonical wire name of this option.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteControl::Phone => "phone",
            RemoteControl::Ring => "ring",
        }
    }
}

impl fmt::Display for RemoteControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Walk-detection state derived from the GPS fix stream.
///
/// Transitions are owned by the walk detector; this type only names the
/// states as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum WalkingState {
    /// No walk in progress.
    #[default]
    Idle,
    /// Sustained displacement observed; a walk is in progress.
    Moving,
    /// Mid-walk but stationary; the cooldown decides whether the walk ended.
    WaitingInPlace,
}

impl WalkingState {
    /// The wire name of this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WalkingState::Idle => "IDLE",
            WalkingState::Moving => "MOVING",
            WalkingState::WaitingInPlace => "WAITING_IN_PLACE",
        }
    }
}

impl fmt::Display for WalkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single GPS fix as retained in the device's recent history window.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct GpsFix {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// When the fix was captured.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub captured_at: OffsetDateTime,
}

impl GpsFix {
    /// Create a fix at the given coordinates and capture time.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, captured_at: OffsetDateTime) -> Self {
        GpsFix {
            latitude,
            longitude,
            captured_at,
        }
    }

    /// True when both coordinates are finite numbers.
    ///
    /// Ingestion rejects fixes that fail this check before they reach the
    /// walk detector, since haversine propagates NaN.
    #[must_use]
    pub fn has_finite_coordinates(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// The authoritative state record for one stroller.
///
/// This is what WebSocket clients receive as the `initial` event payload,
/// and what `GET /api/status` returns. All mutations flow through the
/// device registry, which serializes them per device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct DeviceState {
    /// Unique device identifier, assigned at provisioning time.
    pub device_id: String,
    /// Current driving mode.
    pub mode: StrollerMode,
    /// Current motor speed preset.
    pub speed: Speed,
    /// Steering position; null until the first steer command.
    pub steering: Option<Steering>,
    /// Active remote-control input.
    pub remote: RemoteControl,
    /// Free-form status string reported by the stroller.
    pub status: String,
    /// Last reported cabin temperature in °C, if any.
    pub temperature: Option<f32>,
    /// Last reported cabin humidity in %, if any.
    pub humidity: Option<f32>,
    /// Accumulated travel distance in meters. Monotonically increasing
    /// except for an explicit reset to zero.
    pub distance_meters: f64,
    /// Recent retained GPS fixes, most recent last, bounded by the
    /// configured history cap.
    pub gps_history: Vec<GpsFix>,
    /// Current walk-detection state.
    pub walking_state: WalkingState,
    /// Number of completed walks since provisioning (or the last reset of
    /// the backing record).
    pub walk_count: u32,
    /// When true, ingested GPS fixes are accepted but do not update
    /// distance, history, or walk detection.
    pub tracking_halted: bool,
}

impl DeviceState {
    /// Status string for a freshly initialized device.
    pub const DEFAULT_STATUS: &'static str = "All good";

    /// Create the initial state for a newly provisioned device.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        DeviceState {
            device_id: device_id.into(),
            mode: StrollerMode::Manual,
            speed: Speed::Stop,
            steering: None,
            remote: RemoteControl::Phone,
            status: Self::DEFAULT_STATUS.to_string(),
            temperature: None,
            humidity: None,
            distance_meters: 0.0,
            gps_history: Vec::new(),
            walking_state: WalkingState::Idle,
            walk_count: 0,
            tracking_halted: false,
        }
    }

    /// The most recent retained fix, if any.
    #[must_use]
    pub fn last_fix(&self) -> Option<&GpsFix> {
        self.gps_history.last()
    }
}
