//! Error types for the DL-bus decoding core.
//!
//! Nothing inside the pipeline propagates errors out; frame rejections and
//! line violations are logged and recovered locally. The types here surface
//! at the seams: frame validation results and source setup failures.

use thiserror::Error;

/// Result type alias for DL-bus operations
pub type Result<T> = std::result::Result<T, DlbusError>;

/// Main error type for DL-bus operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DlbusError {
    /// Frame validation error
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Edge source error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// Errors while validating a raw frame against a device layout
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Raw frame length does not match the device layout
    #[error("Invalid frame size: expected {expected} bytes, got {actual}")]
    InvalidSize { expected: usize, actual: usize },

    /// First byte does not carry the expected device id
    #[error("Unsupported device id: 0x{0:02x}")]
    UnsupportedDevice(u8),

    /// A temperature channel decoded outside the plausible range
    #[error("Invalid temperature on channel {channel}: {value} degC")]
    InvalidTemperature { channel: u8, value: f64 },
}

/// Errors raised while setting up an edge source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Unknown line terminator name
    #[error("Invalid terminator {0:?} (expected pullup, pulldown or none)")]
    InvalidTerminator(String),

    /// The GPIO character device rejected the request
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// The reader thread could not be spawned
    #[error("Cannot start reader thread: {0}")]
    Thread(String),
}
