//! Notification contract between the driver and its host
//!
//! The host implements this trait to receive buffer-half handoffs from the
//! realtime transfer engine and lifecycle requests from the session. All
//! methods must return promptly: `buffer_ready*` runs on the backend's audio
//! thread.

use crate::sync::ClockSample;

/// Callbacks into the host application
pub trait HostInterface: Send + Sync {
    /// Whether the host accepts extended timing information with each
    /// handoff. Queried exactly once, at `start()`.
    fn supports_timed_notifications(&self) -> bool {
        false
    }

    /// Whether the host accepts a request to reinitialize the session
    /// (required to change the sample rate while buffers exist)
    fn supports_reset_requests(&self) -> bool {
        false
    }

    /// Ask the host to tear the session down and negotiate again
    fn request_reset(&self) {}

    /// A buffer half has been filled/drained and now belongs to the host
    fn buffer_ready(&self, half: usize);

    /// Timed variant of [`buffer_ready`](Self::buffer_ready), sent when the
    /// host declared timed-notification support; carries the stream position
    /// at the start of the period and a fixed unity playback speed
    fn buffer_ready_timed(&self, half: usize, clock: ClockSample, sample_rate: f64, speed: f64) {
        let _ = (clock, sample_rate, speed);
        self.buffer_ready(half);
    }
}
