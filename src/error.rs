//! Custom error types for the scale reader.
//!
//! `ScaleError` is the error returned across the control surface. It covers
//! everything a caller can act on: the port could not be opened, the line
//! failed mid-session, the configuration was rejected, or a command was sent
//! while no session was running.
//!
//! Malformed frames are a different matter. Line noise is an expected
//! operating condition, so [`FrameError`] never leaves the decode pipeline:
//! the offending frame is dropped, counted, and logged at `trace` level.
//!
//! ## Error Hierarchy
//!
//! - **`Open`**: the transport could not open the endpoint (port missing,
//!   permission denied, device absent). Reported once, never retried.
//! - **`Transport`**: a mid-session I/O failure. The session is left closed
//!   and degraded until an explicit stop followed by start.
//! - **`Config`**: wraps [`ConfigError`] from layered configuration loading.
//! - **`NotConnected`**: a command needed an active session and none exists.
//! - **`InvalidDecimalPlaces`**: a forced decimal count outside `0..=4`.

use thiserror::Error;

pub use crate::config::ConfigError;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, ScaleError>;

#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("Failed to open scale endpoint '{endpoint}': {source}")]
    Open {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error on '{endpoint}': {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scale not connected")]
    NotConnected,

    #[error("Decimal places must be between 0 and 4, got {0}")]
    InvalidDecimalPlaces(u8),

    #[error("Scale manager is no longer running")]
    ManagerUnavailable,

    #[error("Session for '{0}' ended before acknowledging the request")]
    SessionUnavailable(String),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a frame is rejected by a decoder.
///
/// These are dropped inside the pipeline and never propagated to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("frame has wrong length: {len} bytes, expected {expected}")]
    WrongLength { len: usize, expected: usize },

    #[error("non-digit byte 0x{byte:02X} at offset {offset} in digit span")]
    NonDigit { byte: u8, offset: usize },

    #[error("invalid sign byte 0x{0:02X}")]
    InvalidSign(u8),

    #[error("frame is missing its trailing marker")]
    MissingTerminator,

    #[error("invalid decimal-position code 0x{0:02X}")]
    InvalidDecimalCode(u8),

    #[error("digit span does not fit in a 64-bit magnitude")]
    MagnitudeOverflow,
}
