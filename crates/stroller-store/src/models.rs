//! Stored data models.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use stroller_types::{GpsFix, WalkingState};

/// A persisted GPS fix with its walk snapshot.
///
/// Rows are append-only: each qualifying ingestion writes one, and a walk
/// boundary writes one more with the incremented count. The live state
/// record is the source of truth for current values; this log exists for
/// history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredGpsFix {
    /// Database row ID.
    pub id: i64,
    /// The device this fix belongs to.
    pub device_id: String,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// When the fix was captured.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// The device's walk count at capture time.
    pub walk_count: u32,
    /// The device's walking state at capture time.
    pub walking_state: WalkingState,
}

impl StoredGpsFix {
    /// The coordinates as an in-memory fix.
    #[must_use]
    pub fn to_fix(&self) -> GpsFix {
        GpsFix::new(self.latitude, self.longitude, self.captured_at)
    }
}
