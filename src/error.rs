//! Unified error types for flexbridge
//!
//! Every control-path operation on the driver surface returns one of these
//! codes synchronously; nothing is ever raised across the real-time callback
//! boundary.

use thiserror::Error;

use crate::audio::Direction;

/// Main error type for driver operations
#[derive(Error, Debug)]
pub enum DriverError {
    /// Session negotiation attempted twice
    #[error("Session already initialized")]
    AlreadyInitialized,

    /// Malformed caller input
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Channel index beyond the resolved device's count
    #[error("{direction} channel {index} out of range (device has {count})")]
    ChannelOutOfRange {
        direction: Direction,
        index: usize,
        count: usize,
    },

    /// No usable backend or device could be found
    #[error("Audio backend unavailable: {0}")]
    BackendUnavailable(String),

    /// No backend API could be resolved
    #[error("Unable to resolve a backend API")]
    NoApi,

    /// Requested sample rate is unsupported
    #[error("Sample rate unsupported: {0}")]
    NoClock(String),

    /// Backend stream open/start/stop failed after negotiation succeeded
    #[error("Backend hardware failure: {0}")]
    HardwareFailure(String),

    /// Operation issued out of lifecycle order
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Queried resource or capability does not exist at this point
    #[error("Not present: {0}")]
    NotPresent(&'static str),
}

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

impl DriverError {
    /// Whether this error indicates a lifecycle-ordering violation by the
    /// host, as opposed to an environment failure
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            DriverError::AlreadyInitialized
                | DriverError::InvalidArguments(_)
                | DriverError::InvalidState(_)
                | DriverError::NotPresent(_)
        )
    }
}
