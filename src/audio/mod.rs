//! Sample storage, channel bindings, and the realtime transfer engine

mod buffers;
mod transfer;

pub use buffers::{BufferSet, BufferSlot, ChannelBinding};
pub use transfer::TransferEngine;

pub(crate) use transfer::EngineShared;

/// Sample type carried across the bridge (non-interleaved)
pub type Sample = f32;

/// Direction of an audio channel, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Captured from the device, delivered to the host
    Input,
    /// Produced by the host, delivered to the device
    Output,
}

impl Direction {
    /// Short uppercase prefix used in channel labels
    pub fn label_prefix(&self) -> &'static str {
        match self {
            Direction::Input => "IN",
            Direction::Output => "OUT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Sample format tag reported on the driver surface
///
/// The bridge always moves 32-bit float samples; the tag exists because the
/// driver protocol reports a format per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Float32,
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::Float32 => write!(f, "f32"),
        }
    }
}
