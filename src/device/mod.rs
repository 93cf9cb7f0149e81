//! Device and format resolution for the driver session

pub mod channels;
mod negotiator;

pub use negotiator::negotiate;

use crate::audio::Direction;

/// Resolved format for one direction of the profile
#[derive(Debug, Clone)]
pub struct DirectionProfile {
    /// Device name reported by the backend
    pub device_name: String,
    /// Channel count exposed on the driver surface
    pub channels: usize,
    /// Channel-position bitmask (0 = unknown layout)
    pub mask: u32,
    /// Backend-suggested low latency in seconds
    pub default_low_latency: f64,
}

/// Negotiated device/format profile, immutable until teardown
///
/// Produced once by [`negotiate`]; the sample rate may be overridden before
/// buffer allocation but is frozen afterward.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub input: Option<DirectionProfile>,
    pub output: Option<DirectionProfile>,
    /// Working sample rate in Hz, always positive
    pub sample_rate: f64,
}

impl DeviceProfile {
    /// Resolved profile for one direction, if a device was present
    pub fn direction(&self, direction: Direction) -> Option<&DirectionProfile> {
        match direction {
            Direction::Input => self.input.as_ref(),
            Direction::Output => self.output.as_ref(),
        }
    }

    /// Channel count for one direction (0 when absent)
    pub fn channels(&self, direction: Direction) -> usize {
        self.direction(direction).map_or(0, |d| d.channels)
    }

    /// Channel-position bitmask for one direction (0 when absent or unknown)
    pub fn mask(&self, direction: Direction) -> u32 {
        self.direction(direction).map_or(0, |d| d.mask)
    }
}
