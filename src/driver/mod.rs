//! The host-facing driver protocol surface

mod host;
mod session;

pub use host::HostInterface;
pub use session::DriverSession;

use crate::audio::SampleFormat;

/// Lifecycle state of a driver session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No negotiation has happened (or it failed)
    Uninitialized,
    /// Devices and formats are resolved
    Negotiated,
    /// A double-buffer set and a backend stream exist
    BuffersAllocated,
    /// The backend stream is running
    Streaming,
}

/// Metadata for one (direction, index) channel
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    /// Human-readable label: direction prefix, index, speaker position
    pub name: String,
    /// Whether the channel is currently bound to a buffer slot
    pub is_active: bool,
    /// Channel group (always 0 on this driver)
    pub group: i32,
    /// Sample format tag
    pub sample_format: SampleFormat,
}

/// Buffer-size policy exposed to the host, in frames
///
/// Fixed policy values; the streaming backend has no native notion of them.
#[derive(Debug, Clone, Copy)]
pub struct BufferSizeHints {
    pub min: usize,
    pub max: usize,
    pub preferred: usize,
    pub granularity: usize,
}

/// One entry of the clock-source enumeration
#[derive(Debug, Clone)]
pub struct ClockSource {
    pub index: u32,
    /// Channel this clock is tied to (-1 = none)
    pub associated_channel: i32,
    /// Channel group this clock is tied to (-1 = none)
    pub associated_group: i32,
    pub is_current: bool,
    pub name: &'static str,
}
