//! CLI argument parsing using clap

use clap::{Parser, Subcommand};

/// flexbridge - Double-buffered audio driver bridge
///
/// Exercise the driver surface against the streaming backend
#[derive(Parser, Debug)]
#[command(name = "flexbridge")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Backend API to use (e.g. "jack", "alsa", "mock"; default: config
    /// file, then platform preference order)
    #[arg(short, long, global = true)]
    pub backend: Option<String>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Negotiate against the backend and list the resolved channels
    List,

    /// Probe whether a sample rate is usable
    Probe {
        /// Sample rate in Hz
        rate: f64,
    },

    /// Run a loopback session for a while
    Run {
        /// Period length in frames (default: the driver's preferred size)
        #[arg(short, long)]
        period: Option<usize>,

        /// How long to stream, in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        seconds: u64,
    },
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::List
    }
}
