//! Narrow interface over the streaming audio backend
//!
//! The driver core consumes the backend exclusively through these traits:
//! query default devices and formats, open a stream with given parameters
//! and a realtime callback, start/stop it, and read realized latencies.
//! Everything behind the trait (device access, thread ownership, interleaving
//! conventions) is the backend's business.

pub mod cpal;
pub mod mock;

use crate::audio::Direction;
use crate::error::Result;

/// Generic descriptor for a backend default device
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: String,
    /// Maximum channel count in this direction
    pub max_channels: usize,
    /// Device default sample rate in Hz (0 = unknown)
    pub default_sample_rate: f64,
    /// Suggested low latency in seconds
    pub default_low_latency: f64,
}

/// Extended per-device default format, when the API exposes one
#[derive(Debug, Clone, Copy)]
pub struct DefaultFormat {
    /// True channel count of the device's default format
    pub channels: usize,
    /// Channel-position bitmask
    pub mask: u32,
}

/// Per-direction parameters for opening a stream
#[derive(Debug, Clone)]
pub struct DirectionParams {
    pub channels: usize,
    /// Suggested latency in seconds
    pub suggested_latency: f64,
    /// Channel-position bitmask to request (0 = let the backend choose)
    pub mask: u32,
}

/// Parameters for opening a backend stream
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub input: Option<DirectionParams>,
    pub output: Option<DirectionParams>,
    pub sample_rate: f64,
    /// Frames per period; `None` leaves the period unspecified (used when
    /// probing whether a sample rate is usable)
    pub period: Option<usize>,
}

/// Backend status flags passed into each period callback
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStatus {
    /// Input data was discarded before reaching the callback
    pub input_overflow: bool,
    /// Gaps were inserted in the input
    pub input_underflow: bool,
    /// Output data was discarded
    pub output_overflow: bool,
    /// Gaps were inserted in the output
    pub output_underflow: bool,
}

impl StreamStatus {
    pub fn any(&self) -> bool {
        self.input_overflow || self.input_underflow || self.output_overflow || self.output_underflow
    }
}

/// What the callback wants the backend to do after this period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Continue,
    Abort,
}

/// Realtime period callback invoked on the backend's audio thread
///
/// `input` holds one slice per input channel, `output` one mutable slice per
/// output channel, each `frames` samples long, non-interleaved.
pub trait StreamCallback: Send {
    fn on_period(
        &mut self,
        input: &[&[f32]],
        output: &mut [&mut [f32]],
        frames: usize,
        status: StreamStatus,
    ) -> StreamAction;
}

/// An open backend stream; closed on drop
pub trait BackendStream {
    fn start(&mut self) -> Result<()>;

    /// Stop the stream. Must not return until no further callback will fire.
    fn stop(&mut self) -> Result<()>;

    /// Realized stream latencies
    fn info(&self) -> StreamInfo;
}

/// Realized stream latencies in seconds
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamInfo {
    pub input_latency: f64,
    pub output_latency: f64,
}

/// The selected backend API, object-safe so the session can own any of them
pub trait AudioBackend {
    /// Name of the selected API (for diagnostics)
    fn api_name(&self) -> &str;

    /// Default device descriptor for one direction, if any
    fn default_device(&self, direction: Direction) -> Option<DeviceDescriptor>;

    /// Extended default format for one direction, when the API supports it
    fn default_format(&self, direction: Direction) -> Option<DefaultFormat>;

    /// Open a stream; the callback starts firing only after
    /// [`BackendStream::start`]
    fn open_stream(
        &self,
        params: &StreamParams,
        callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>>;
}
