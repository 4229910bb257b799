//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use stroller_types::{
    DeviceState, GpsFix, RemoteControl, Speed, Steering, StrollerMode, WalkingState,
};

use crate::error::{Error, Result};
use crate::models::StoredGpsFix;
use crate::queries::FixQuery;
use crate::schema;

/// SQLite-based store for stroller device state and GPS fixes.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better performance
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        // Initialize schema
        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Device state operations ===

    /// Insert or replace the state record for a device.
    ///
    /// `created_at` is set on first insert and preserved on updates;
    /// `updated_at` always moves to now.
    pub fn upsert_device_state(&self, state: &DeviceState) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let history = serde_json::to_string(&state.gps_history)?;

        self.conn.execute(
            "INSERT INTO device_state (device_id, mode, speed, steering, remote, status,
                temperature, humidity, distance_meters, gps_history, walking_state,
                walk_count, tracking_halted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(device_id) DO UPDATE SET
                mode = ?2,
                speed = ?3,
                steering = ?4,
                remote = ?5,
                status = ?6,
                temperature = ?7,
                humidity = ?8,
                distance_meters = ?9,
                gps_history = ?10,
                walking_state = ?11,
                walk_count = ?12,
                tracking_halted = ?13,
                updated_at = ?14",
            rusqlite::params![
                state.device_id,
                state.mode.as_str(),
                state.speed.value(),
                state.steering.map(|s| s.value()),
                state.remote.as_str(),
                state.status,
                state.temperature,
                state.humidity,
                state.distance_meters,
                history,
                state.walking_state.as_str(),
                state.walk_count,
                state.tracking_halted,
                now,
            ],
        )?;

        Ok(())
    }

    /// Get the state record for a device.
    pub fn get_device_state(&self, device_id: &str) -> Result<Option<DeviceState>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, mode, speed, steering, remote, status, temperature,
                humidity, distance_meters, gps_history, walking_state, walk_count,
                tracking_halted
             FROM device_state WHERE device_id = ?",
        )?;

        let state = stmt.query_row([device_id], state_from_row).optional()?;

        Ok(state)
    }

    /// List all stored device states.
    pub fn list_device_states(&self) -> Result<Vec<DeviceState>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, mode, speed, steering, remote, status, temperature,
                humidity, distance_meters, gps_history, walking_state, walk_count,
                tracking_halted
             FROM device_state ORDER BY device_id ASC",
        )?;

        let states = stmt
            .query_map([], state_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(states)
    }

    /// Delete a device's state record and its fix log.
    ///
    /// Returns true if a record existed.
    pub fn delete_device_state(&self, device_id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM device_state WHERE device_id = ?", [device_id])?;

        Ok(deleted > 0)
    }
}

fn state_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceState> {
    Ok(DeviceState {
        device_id: row.get(0)?,
        mode: parse_mode(&row.get::<_, String>(1)?),
        speed: Speed::try_from(row.get::<_, i64>(2)? as u8).unwrap_or_default(),
        steering: row
            .get::<_, Option<f32>>(3)?
            .and_then(|v| Steering::new(v).ok()),
        remote: parse_remote(&row.get::<_, String>(4)?),
        status: row.get(5)?,
        temperature: row.get(6)?,
        humidity: row.get(7)?,
        distance_meters: row.get(8)?,
        gps_history: parse_history(&row.get::<_, String>(9)?),
        walking_state: parse_walking_state(&row.get::<_, String>(10)?),
        walk_count: row.get::<_, i64>(11)? as u32,
        tracking_halted: row.get(12)?,
    })
}

fn parse_mode(s: &str) -> StrollerMode {
    StrollerMode::from_name(s).unwrap_or_default()
}

fn parse_remote(s: &str) -> RemoteControl {
    RemoteControl::from_name(s).unwrap_or_default()
}

fn parse_walking_state(s: &str) -> WalkingState {
    match s {
        "MOVING" => WalkingState::Moving,
        "WAITING_IN_PLACE" => WalkingState::WaitingInPlace,
        _ => WalkingState::Idle,
    }
}

fn parse_history(s: &str) -> Vec<GpsFix> {
    serde_json::from_str(s).unwrap_or_default()
}

// Fix operations
impl Store {
    /// Append a fix to a device's log.
    ///
    /// The device must already have a state record; fixes never create
    /// devices on their own.
    pub fn insert_fix(
        &self,
        device_id: &str,
        fix: &GpsFix,
        walk_count: u32,
        walking_state: WalkingState,
    ) -> Result<i64> {
        let exists: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM device_state WHERE device_id = ?",
            [device_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(Error::DeviceNotFound(device_id.to_string()));
        }

        self.conn.execute(
            "INSERT INTO gps_fixes (device_id, latitude, longitude, captured_at,
                walk_count, walking_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                device_id,
                fix.latitude,
                fix.longitude,
                fix.captured_at.unix_timestamp(),
                walk_count,
                walking_state.as_str(),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Query fixes with filters.
    pub fn query_fixes(&self, query: &FixQuery) -> Result<Vec<StoredGpsFix>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut fixes = Vec::with_capacity(rows.len());
        for (id, device_id, latitude, longitude, ts, walk_count, walking_state) in rows {
            fixes.push(StoredGpsFix {
                id,
                device_id,
                latitude,
                longitude,
                captured_at: OffsetDateTime::from_unix_timestamp(ts)
                    .map_err(|_| Error::InvalidTimestamp(ts.to_string()))?,
                walk_count: walk_count as u32,
                walking_state: parse_walking_state(&walking_state),
            });
        }

        Ok(fixes)
    }

    /// Get the most recently captured fix for a device.
    pub fn latest_fix(&self, device_id: &str) -> Result<Option<StoredGpsFix>> {
        let query = FixQuery::new().device(device_id).limit(1);
        let mut fixes = self.query_fixes(&query)?;
        Ok(fixes.pop())
    }

    /// Count fixes for a device, or all fixes when no device is given.
    pub fn count_fixes(&self, device_id: Option<&str>) -> Result<u64> {
        let count: i64 = match device_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM gps_fixes WHERE device_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM gps_fixes", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }
}
