//! Domain logic for the stroller telemetry backend.
//!
//! Transport-free building blocks used by the service:
//!
//! - [`geo`]: haversine distance between GPS fixes
//! - [`walk`]: the walk-detection state machine and its thresholds
//! - [`reconnect`]: backoff policy for the broker link
//!
//! # Example
//!
//! ```
//! use stroller_core::walk::{WalkDetector, WalkThresholds};
//! use stroller_types::{DeviceState, GpsFix};
//! use time::OffsetDateTime;
//!
//! let detector = WalkDetector::new(WalkThresholds::default());
//! let mut state = DeviceState::new("stroller-042");
//!
//! let fix = GpsFix::new(10.0, 10.0, OffsetDateTime::UNIX_EPOCH);
//! let outcome = detector.process_fix(&mut state, fix);
//! assert!(outcome.is_retained());
//! assert_eq!(state.gps_history.len(), 1);
//! ```

pub mod error;
pub mod geo;
pub mod reconnect;
pub mod walk;

pub use error::{Error, Result};
pub use reconnect::{ConnectionState, ReconnectOptions};
pub use walk::{FixOutcome, WalkDetector, WalkThresholds};
