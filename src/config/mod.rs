//! CLI arguments and driver configuration file

mod args;
mod file;

pub use args::{Args, Command};
pub use file::{ConfigError, DriverConfig};
