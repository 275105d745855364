use thiserror::Error;

use super::identity::DeviceIdentity;

// ---

#[derive(Debug, Error)]
pub enum LnsError {
    // ---
    /// A live session already exists for this device.  The caller must drop
    /// the uplink that triggered the registration, never overwrite.
    #[error("device {0} already has a live session")]
    Conflict(DeviceIdentity),

    /// Another uplink for this device is being processed right now.
    #[error("device {0} is busy with another uplink")]
    Busy(DeviceIdentity),

    #[error("resolver error: {0}")]
    Resolver(String),

    #[error("device connection error: {0}")]
    Connection(String),

    #[error("unsupported address width: expected {expected} bytes, got {actual}")]
    UnsupportedWidth { expected: usize, actual: usize },

    #[error("argument `{0}` must not be null")]
    NullArgument(&'static str),

    #[error("metric `{name}` is defined as a {actual}, not a {expected}")]
    MetricKindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

pub type Result<T> = std::result::Result<T, LnsError>;
