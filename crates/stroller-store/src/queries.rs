//! Query builder for the GPS fix log.
//!
//! [`FixQuery`] follows the builder pattern for filtering and paginating
//! persisted fixes.
//!
//! # Example
//!
//! ```
//! use stroller_store::{FixQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! // Query a device's recent fixes with pagination
//! let query = FixQuery::new()
//!     .device("stroller-17")
//!     .since(yesterday)
//!     .limit(50)
//!     .offset(0);
//!
//! let fixes = store.query_fixes(&query)?;
//! # Ok::<(), stroller_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Fluent query builder for persisted GPS fixes.
///
/// Use this to construct queries for [`Store::query_fixes`](crate::Store::query_fixes)
/// and [`Store::count_fixes`](crate::Store::count_fixes). All filter methods
/// are optional and can be chained in any order.
///
/// By default, queries return results ordered by `captured_at` descending
/// (newest first).
///
/// # Example
///
/// ```
/// use stroller_store::FixQuery;
/// use time::{Duration, OffsetDateTime};
///
/// let now = OffsetDateTime::now_utc();
///
/// // Query the last hour's fixes for a device
/// let query = FixQuery::new()
///     .device("stroller-17")
///     .since(now - Duration::hours(1))
///     .limit(100);
///
/// // Query oldest first (chronological order)
/// let chronological = FixQuery::new()
///     .device("stroller-17")
///     .oldest_first();
/// ```
#[derive(Debug, Default, Clone)]
pub struct FixQuery {
    /// Filter by device ID.
    pub device_id: Option<String>,
    /// Filter fixes captured at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Filter fixes captured at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by captured_at descending (newest first).
    pub newest_first: bool,
}

impl FixQuery {
    /// Create a new query with default settings.
    ///
    /// Default behavior:
    /// - No device filter (all devices)
    /// - No time range filter
    /// - No limit (all matching records)
    /// - Ordered by newest first
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter by device ID.
    ///
    /// Only include fixes from the specified device.
    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    /// Filter to fixes captured at or after this time.
    ///
    /// Useful for querying "last N hours" of movement.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to fixes captured at or before this time.
    ///
    /// Use with `since()` to query a specific time range.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    ///
    /// Use with `offset()` for pagination.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    ///
    /// Use with `limit()` for pagination. For example, to get page 2
    /// with 50 items per page: `.limit(50).offset(50)`.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results by oldest first (ascending by `captured_at`).
    ///
    /// By default, queries return newest first. Use this for chronological
    /// ordering when replaying or plotting a route.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device_id) = self.device_id {
            conditions.push("device_id = ?");
            params.push(Box::new(device_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(Box::new(until.unix_timestamp()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, device_id, latitude, longitude, captured_at, walk_count, walking_state \
             FROM gps_fixes {} ORDER BY captured_at {}",
            where_clause, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        } else if self.offset.is_some() {
            // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
            sql.push_str(" LIMIT -1");
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}
