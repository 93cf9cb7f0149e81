//! Timing bookkeeping shared between the control and realtime threads

mod clock;

pub use clock::{ClockSample, ClockTracker};
