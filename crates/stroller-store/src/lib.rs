//! Local data persistence for stroller device state and movement history.
//!
//! This crate provides SQLite-based storage for the stroller backend,
//! holding the authoritative state record per device plus an append-only
//! log of retained GPS fixes.
//!
//! # Features
//!
//! - Write-through device state records, restored on startup
//! - Append-only GPS fix log with walk snapshots
//! - Query by device, time range, with pagination
//!
//! # Example
//!
//! ```no_run
//! use stroller_store::{FixQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! // Query a device's recent movement
//! let query = FixQuery::new()
//!     .device("stroller-17")
//!     .limit(10);
//! let fixes = store.query_fixes(&query)?;
//! # Ok::<(), stroller_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredGpsFix;
pub use queries::FixQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/stroller/data.db`
/// - macOS: `~/Library/Application Support/stroller/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\stroller\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("stroller")
        .join("data.db")
}
