//! Walk detection from the GPS fix stream.
//!
//! Each device's fixes feed a small state machine over
//! [`WalkingState`]: sustained displacement marks the device MOVING, a
//! stationary spell moves it to WAITING_IN_PLACE, and once the stationary
//! spell outlives the cooldown the walk is complete and counted. Jitter
//! below the configured threshold never reaches the history window, so a
//! stroller parked near a window's GPS noise floor accumulates neither
//! distance nor phantom walks.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use stroller_types::{DeviceState, GpsFix, WalkingState};

use crate::error::{Error, Result};
use crate::geo;

/// Thresholds steering the walk-detection state machine.
///
/// The defaults suit a stroller pushed at walking pace with a consumer GPS
/// module; deployments with better receivers can tighten `jitter_meters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkThresholds {
    /// Fixes closer than this to the previous retained fix are discarded
    /// as receiver noise (meters).
    pub jitter_meters: f64,
    /// Displacement over the lookback window that marks the device as
    /// MOVING (meters).
    pub motion_meters: f64,
    /// How far back to look when measuring displacement (seconds).
    pub lookback_secs: u64,
    /// How long the device must stay put before a walk is declared over
    /// (seconds).
    pub cooldown_secs: u64,
    /// Maximum number of retained fixes per device; the oldest is evicted.
    pub history_cap: usize,
}

impl Default for WalkThresholds {
    fn default() -> Self {
        Self {
            jitter_meters: 5.0,
            motion_meters: 100.0,
            lookback_secs: 60,
            cooldown_secs: 180,
            history_cap: 50,
        }
    }
}

impl WalkThresholds {
    /// Validate the thresholds and return an error if invalid.
    ///
    /// Checks that:
    /// - `jitter_meters` is > 0 and finite
    /// - `motion_meters` is > `jitter_meters` and finite
    /// - `lookback_secs` and `cooldown_secs` are > 0
    /// - `history_cap` is >= 1
    pub fn validate(&self) -> Result<()> {
        if !self.jitter_meters.is_finite() || self.jitter_meters <= 0.0 {
            return Err(Error::InvalidConfig(
                "jitter_meters must be > 0".to_string(),
            ));
        }
        if !self.motion_meters.is_finite() || self.motion_meters <= self.jitter_meters {
            return Err(Error::InvalidConfig(
                "motion_meters must be greater than jitter_meters".to_string(),
            ));
        }
        if self.lookback_secs == 0 {
            return Err(Error::InvalidConfig("lookback_secs must be > 0".to_string()));
        }
        if self.cooldown_secs == 0 {
            return Err(Error::InvalidConfig("cooldown_secs must be > 0".to_string()));
        }
        if self.history_cap == 0 {
            return Err(Error::InvalidConfig("history_cap must be >= 1".to_string()));
        }
        Ok(())
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.lookback_secs as i64)
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }
}

/// What happened to an ingested fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixOutcome {
    /// Tracking is halted for this device; the fix changed nothing.
    Halted,
    /// The fix was within the jitter threshold and was not retained.
    Jitter {
        /// True when the stationary spell outlived the cooldown and a walk
        /// was counted.
        walk_completed: bool,
    },
    /// The fix was appended to the history window.
    Retained {
        /// Distance accumulated from the previous retained fix, in meters.
        delta_meters: f64,
        /// True when a stale walk was closed out before this fix was
        /// counted toward new motion.
        walk_completed: bool,
    },
}

impl FixOutcome {
    /// True when the fix was appended to the history window.
    #[must_use]
    pub fn is_retained(&self) -> bool {
        matches!(self, FixOutcome::Retained { .. })
    }

    /// True when processing this fix completed a walk.
    #[must_use]
    pub fn walk_completed(&self) -> bool {
        match self {
            FixOutcome::Halted => false,
            FixOutcome::Jitter { walk_completed } => *walk_completed,
            FixOutcome::Retained { walk_completed, .. } => *walk_completed,
        }
    }
}

/// The walk-detection state machine.
///
/// Stateless apart from its thresholds: all per-device state lives in the
/// [`DeviceState`] record, so a single detector serves every device.
#[derive(Debug, Clone)]
pub struct WalkDetector {
    thresholds: WalkThresholds,
}

impl WalkDetector {
    /// Create a detector with the given thresholds.
    #[must_use]
    pub fn new(thresholds: WalkThresholds) -> Self {
        Self { thresholds }
    }

    /// The thresholds this detector runs with.
    #[must_use]
    pub fn thresholds(&self) -> &WalkThresholds {
        &self.thresholds
    }

    /// Feed one fix through the state machine, mutating `state` in place.
    ///
    /// The caller must have verified [`GpsFix::has_finite_coordinates`];
    /// haversine on non-finite input poisons the accumulated distance.
    pub fn process_fix(&self, state: &mut DeviceState, fix: GpsFix) -> FixOutcome {
        if state.tracking_halted {
            return FixOutcome::Halted;
        }

        let Some(last) = state.last_fix().copied() else {
            // First fix after initialization or a distance reset: retain it
            // as the anchor, no distance to accumulate yet.
            state.gps_history.push(fix);
            return FixOutcome::Retained {
                delta_meters: 0.0,
                walk_completed: false,
            };
        };

        let delta = geo::distance_between(&last, &fix);
        let since_last_retained = fix.captured_at - last.captured_at;

        if delta < self.thresholds.jitter_meters {
            let walk_completed = self.note_stationary(state, since_last_retained);
            return FixOutcome::Jitter { walk_completed };
        }

        // Qualifying displacement. If the device sat idle past the cooldown
        // before this fix arrived, the previous walk ended back then; close
        // it out before counting this fix toward new motion.
        let walk_completed = if since_last_retained > self.thresholds.cooldown() {
            self.complete_walk(state)
        } else {
            false
        };

        state.distance_meters += delta;
        state.gps_history.push(fix);
        if state.gps_history.len() > self.thresholds.history_cap {
            let overflow = state.gps_history.len() - self.thresholds.history_cap;
            state.gps_history.drain(..overflow);
        }

        self.evaluate_motion(state, &fix);

        FixOutcome::Retained {
            delta_meters: delta,
            walk_completed,
        }
    }

    /// Handle a jitter fix: no retention, but the passage of time may end
    /// a walk in progress.
    fn note_stationary(&self, state: &mut DeviceState, since_last_retained: Duration) -> bool {
        match state.walking_state {
            WalkingState::Idle => false,
            WalkingState::Moving | WalkingState::WaitingInPlace => {
                if since_last_retained > self.thresholds.cooldown() {
                    self.complete_walk(state)
                } else {
                    if state.walking_state == WalkingState::Moving {
                        state.walking_state = WalkingState::WaitingInPlace;
                        debug!(
                            device_id = %state.device_id,
                            "stationary mid-walk, waiting in place"
                        );
                    }
                    false
                }
            }
        }
    }

    /// Count a completed walk and return to IDLE.
    fn complete_walk(&self, state: &mut DeviceState) -> bool {
        match state.walking_state {
            WalkingState::Idle => false,
            WalkingState::Moving | WalkingState::WaitingInPlace => {
                state.walk_count += 1;
                state.walking_state = WalkingState::Idle;
                debug!(
                    device_id = %state.device_id,
                    walk_count = state.walk_count,
                    "walk completed"
                );
                true
            }
        }
    }

    /// Re-evaluate the walking state after a fix was retained.
    fn evaluate_motion(&self, state: &mut DeviceState, fix: &GpsFix) {
        match state.walking_state {
            WalkingState::Idle => {
                if let Some(reference) = self.lookback_reference(state, fix.captured_at) {
                    let displacement = geo::distance_between(&reference, fix);
                    if displacement > self.thresholds.motion_meters {
                        state.walking_state = WalkingState::Moving;
                        debug!(
                            device_id = %state.device_id,
                            displacement_meters = displacement,
                            "sustained displacement, walk started"
                        );
                    }
                }
            }
            // Real displacement while waiting means the walk never ended.
            WalkingState::WaitingInPlace => {
                state.walking_state = WalkingState::Moving;
            }
            WalkingState::Moving => {}
        }
    }

    /// The fix displacement is measured against: the most recent retained
    /// fix at least one lookback older than `at`, or the oldest retained
    /// fix while the window is younger than the lookback.
    ///
    /// Excludes the final history entry, which is the fix being evaluated.
    fn lookback_reference(&self, state: &DeviceState, at: OffsetDateTime) -> Option<GpsFix> {
        let earlier = &state.gps_history[..state.gps_history.len().saturating_sub(1)];
        let cutoff = at - self.thresholds.lookback();
        earlier
            .iter()
            .rev()
            .find(|f| f.captured_at <= cutoff)
            .or_else(|| earlier.first())
            .copied()
    }
}
