//! flexbridge - Double-buffered audio driver bridge CLI

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flexbridge::audio::{BufferSlot, ChannelBinding, Direction};
use flexbridge::backend::cpal::CpalBackend;
use flexbridge::backend::mock::MockBackend;
use flexbridge::backend::AudioBackend;
use flexbridge::config::{Args, Command, DriverConfig};
use flexbridge::driver::{DriverSession, HostInterface};

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let mut config = DriverConfig::load_default()?;
    if args.backend.is_some() {
        config.backend = args.backend.clone();
    }

    // Execute command
    match args.command.unwrap_or_default() {
        Command::List => cmd_list(config),
        Command::Probe { rate } => cmd_probe(config, rate),
        Command::Run { period, seconds } => cmd_run(config, period, seconds),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(log_file) = &args.log {
        let file = std::fs::File::create(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

fn make_backend(config: &DriverConfig) -> Result<Box<dyn AudioBackend>> {
    match config.backend.as_deref() {
        Some("mock") => {
            let (backend, _control) = MockBackend::duplex(2, 2, 48000.0);
            Ok(Box::new(backend))
        }
        forced => Ok(Box::new(CpalBackend::with_preference(forced)?)),
    }
}

/// Negotiate against the backend and print the resolved configuration
fn cmd_list(config: DriverConfig) -> Result<()> {
    let mut session = DriverSession::new(make_backend(&config)?, config);
    session.initialize()?;

    let (inputs, outputs) = session.channel_counts()?;
    let rate = session.sample_rate()?;
    let hints = session.buffer_size_hints()?;

    println!("Negotiated configuration:\n");
    println!("  Sample rate: {} Hz", rate);
    println!(
        "  Buffer size: {}..{} frames, preferred {} (granularity {})",
        hints.min, hints.max, hints.preferred, hints.granularity
    );

    for (direction, count) in [(Direction::Input, inputs), (Direction::Output, outputs)] {
        println!("\n  {} channels ({}):", direction, count);
        for index in 0..count {
            let info = session.channel_info(direction, index)?;
            println!("    {}", info.name);
        }
    }

    println!();
    Ok(())
}

/// Probe whether the backend can stream at a given rate
fn cmd_probe(config: DriverConfig, rate: f64) -> Result<()> {
    let mut session = DriverSession::new(make_backend(&config)?, config);
    session.initialize()?;

    match session.can_sample_rate(rate) {
        Ok(()) => println!("{} Hz: supported", rate),
        Err(e) => println!("{} Hz: not supported ({})", rate, e),
    }
    Ok(())
}

/// Run a loopback streaming session
fn cmd_run(config: DriverConfig, period: Option<usize>, seconds: u64) -> Result<()> {
    println!("flexbridge - audio driver bridge\n");

    let mut session = DriverSession::new(make_backend(&config)?, config);
    session.initialize()?;

    let (inputs, outputs) = session.channel_counts()?;
    let rate = session.sample_rate()?;
    let period = period.unwrap_or(session.buffer_size_hints()?.preferred);

    let bindings: Vec<ChannelBinding> = (0..inputs)
        .map(ChannelBinding::input)
        .chain((0..outputs).map(ChannelBinding::output))
        .collect();

    let (reset_tx, reset_rx) = unbounded();
    let host = Arc::new(LoopbackHost::new(reset_tx, rate));
    let slots = session.create_buffers(&bindings, period, host.clone())?;
    host.install(slots);

    if let Ok((in_latency, out_latency)) = session.latencies() {
        println!(
            "Latency: {} samples in, {} samples out",
            in_latency, out_latency
        );
    }

    session.start()?;
    println!(
        "Streaming {} in / {} out at {} Hz, {} frames per period.",
        inputs, outputs, rate, period
    );
    if seconds == 0 {
        println!("Press Ctrl+C to stop.\n");
    }

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let _ = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    });

    let started = Instant::now();
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        if seconds > 0 && started.elapsed() >= Duration::from_secs(seconds) {
            break;
        }
        drain_reset_requests(&reset_rx);

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            match session.sample_position() {
                Ok(position) => println!(
                    "  position: {} samples ({} periods delivered)",
                    position.samples,
                    host.periods()
                ),
                Err(e) => warn!("Sample position unavailable: {}", e),
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    session.stop()?;
    session.dispose_buffers()?;
    println!("Stopped after {} periods.", host.periods());

    Ok(())
}

fn drain_reset_requests(reset_rx: &Receiver<()>) {
    // The demo host accepts reset requests but has nothing to reinitialize.
    while reset_rx.try_recv().is_ok() {
        info!("Host received a reset request");
    }
}

/// Pairs of slot handles the loopback host works with, split by direction
struct HostBuffers {
    inputs: Vec<BufferSlot>,
    outputs: Vec<BufferSlot>,
    scratch: Vec<f32>,
}

/// Demo host: copies captured input back out, or a sine tone when the
/// backend has no input channels
struct LoopbackHost {
    buffers: Mutex<Option<HostBuffers>>,
    periods: AtomicU64,
    reset_tx: Sender<()>,
    sample_rate: f64,
    phase: Mutex<f32>,
}

impl LoopbackHost {
    fn new(reset_tx: Sender<()>, sample_rate: f64) -> Self {
        Self {
            buffers: Mutex::new(None),
            periods: AtomicU64::new(0),
            reset_tx,
            sample_rate,
            phase: Mutex::new(0.0),
        }
    }

    /// Hand over the slot handles returned by create_buffers
    fn install(&self, slots: Vec<BufferSlot>) {
        let period = slots.first().map_or(0, |s| s.frames());
        let (inputs, outputs): (Vec<_>, Vec<_>) = slots
            .into_iter()
            .partition(|s| s.binding().direction == Direction::Input);
        *self.buffers.lock() = Some(HostBuffers {
            inputs,
            outputs,
            scratch: vec![0.0; period],
        });
    }

    fn periods(&self) -> u64 {
        self.periods.load(Ordering::Relaxed)
    }

    fn fill_sine(&self, scratch: &mut [f32]) {
        let mut phase = self.phase.lock();
        let step = 440.0 * std::f32::consts::TAU / self.sample_rate as f32;
        for sample in scratch.iter_mut() {
            *sample = 0.2 * phase.sin();
            *phase = (*phase + step) % std::f32::consts::TAU;
        }
    }
}

impl HostInterface for LoopbackHost {
    fn supports_reset_requests(&self) -> bool {
        true
    }

    fn request_reset(&self) {
        if self.reset_tx.send(()).is_err() {
            error!("Reset request dropped: control thread is gone");
        }
    }

    fn buffer_ready(&self, half: usize) {
        let mut guard = self.buffers.lock();
        let Some(buffers) = guard.as_mut() else {
            return;
        };
        self.periods.fetch_add(1, Ordering::Relaxed);

        if buffers.inputs.is_empty() {
            self.fill_sine(&mut buffers.scratch);
            for output in &buffers.outputs {
                output.write_half(half, &buffers.scratch);
            }
            return;
        }

        // Loopback: input slot i feeds output slot i (wrapping).
        for (index, output) in buffers.outputs.iter().enumerate() {
            let input = &buffers.inputs[index % buffers.inputs.len()];
            input.read_half(half, &mut buffers.scratch);
            output.write_half(half, &buffers.scratch);
        }
    }
}
