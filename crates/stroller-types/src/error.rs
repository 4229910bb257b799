//! Error types for parsing wire values.

use thiserror::Error;

/// Error that can occur when parsing a wire value into a domain type.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The mode name is not one of the known modes.
    #[error("invalid mode: {0:?}")]
    InvalidMode(String),
    /// The speed is not one of the factory presets.
    #[error("invalid speed: {0}")]
    InvalidSpeed(u8),
    /// The steering value is non-finite or outside [-100, 100].
    #[error("invalid steering value: {0}")]
    InvalidSteering(f32),
    /// The remote-control option is not one of the known inputs.
    #[error("invalid remote control option: {0:?}")]
    InvalidRemote(String),
    /// The data is invalid or malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;
