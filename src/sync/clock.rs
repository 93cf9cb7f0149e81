//! Monotonic (sample count, timestamp) tracking for the streaming position
//!
//! The transfer engine advances the pair once per period from the realtime
//! thread; the control thread reads it lock-free when the host asks for the
//! current sample position.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A (cumulative sample count, timestamp) pair in a single time base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Samples delivered since the last `reset()`
    pub samples: u64,
    /// Nanoseconds since the tracker's epoch, taken at the callback that
    /// produced `samples`
    pub timestamp_nanos: u64,
}

/// Lock-free streaming clock
///
/// `reset()` is called exactly once per stream start, from the control
/// thread, before the backend stream is running. `advance()` is called only
/// from the realtime callback, never concurrently with itself.
pub struct ClockTracker {
    samples: AtomicU64,
    timestamp_nanos: AtomicU64,
    epoch: Instant,
}

impl ClockTracker {
    pub fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            timestamp_nanos: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Zero the sample count and stamp the current wall-clock reading
    pub fn reset(&self) {
        self.samples.store(0, Ordering::Release);
        self.timestamp_nanos.store(self.now_nanos(), Ordering::Release);
    }

    /// Add `frames` to the sample count and restamp
    pub fn advance(&self, frames: u64) {
        self.samples.fetch_add(frames, Ordering::Release);
        self.timestamp_nanos.store(self.now_nanos(), Ordering::Release);
    }

    /// Read the current position pair
    ///
    /// The two fields are loaded separately; a reader racing the realtime
    /// thread can observe a count/timestamp pair one period apart, which the
    /// driver protocol tolerates.
    pub fn read(&self) -> ClockSample {
        ClockSample {
            samples: self.samples.load(Ordering::Acquire),
            timestamp_nanos: self.timestamp_nanos.load(Ordering::Acquire),
        }
    }
}

impl Default for ClockTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_zeroes_count() {
        let clock = ClockTracker::new();
        clock.advance(512);
        clock.reset();
        assert_eq!(clock.read().samples, 0);
    }

    #[test]
    fn test_advance_accumulates() {
        let clock = ClockTracker::new();
        clock.reset();
        for _ in 0..10 {
            clock.advance(256);
        }
        assert_eq!(clock.read().samples, 2560);
    }

    #[test]
    fn test_timestamp_moves_forward() {
        let clock = ClockTracker::new();
        clock.reset();
        let first = clock.read().timestamp_nanos;
        std::thread::sleep(std::time::Duration::from_millis(2));
        clock.advance(64);
        let second = clock.read().timestamp_nanos;
        assert!(second > first);
    }
}
