//! Error types for domain logic.
//!
//! Faults in this crate are configuration mistakes caught up front; runtime
//! fault handling lives where the I/O happens:
//!
//! | Class | Where handled | Strategy |
//! |-------|---------------|----------|
//! | Invalid thresholds / backoff options | here, at startup | refuse to start |
//! | Malformed telemetry | service ingest | drop and log, keep consuming |
//! | Broker connection loss | service bus loop | reconnect with [`crate::reconnect::ReconnectOptions`] |
//! | Persistence write failure | device registry | log, keep in-memory state |

use thiserror::Error;

/// Error that can occur in domain-logic configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// A configuration value is out of its valid range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for domain-logic operations.
pub type Result<T> = std::result::Result<T, Error>;
