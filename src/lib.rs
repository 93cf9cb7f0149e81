//! flexbridge - Double-buffered audio driver bridge
//!
//! Bridges a legacy host-driven, double-buffered audio driver protocol
//! (negotiate, allocate buffers, start, stop) to the continuous streaming
//! callback of a cross-platform audio backend.

pub mod audio;
pub mod backend;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod sync;

pub use error::{DriverError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
