//! Driver session: the state machine orchestrating negotiation, buffers,
//! and the stream lifecycle
//!
//! The host drives the session from its control thread: initialize →
//! create_buffers → start → stop → dispose_buffers. Once started, the
//! backend's realtime thread runs the transfer engine; the session only
//! touches the shared atomic block at the start/stop synchronization points.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::audio::{BufferSet, BufferSlot, ChannelBinding, Direction, SampleFormat, TransferEngine};
use crate::audio::EngineShared;
use crate::backend::{AudioBackend, BackendStream, DirectionParams, StreamAction, StreamCallback, StreamParams, StreamStatus};
use crate::config::DriverConfig;
use crate::device::{channels, negotiate, DeviceProfile};
use crate::driver::{BufferSizeHints, ChannelInfo, ClockSource, HostInterface, SessionState};
use crate::error::{DriverError, Result};
use crate::sync::ClockSample;

/// Fallback when the host never set a rate before allocating buffers
const FALLBACK_SAMPLE_RATE: f64 = 44100.0;

/// Everything that exists between create_buffers and dispose_buffers
struct StreamBundle {
    buffers: BufferSet,
    stream: Box<dyn BackendStream>,
    host: Arc<dyn HostInterface>,
    shared: Arc<EngineShared>,
}

/// A driver session owning the backend for its whole lifetime
///
/// The backend handle is acquired before negotiation and released exactly
/// once when the session is dropped, regardless of how far the lifecycle
/// progressed.
pub struct DriverSession {
    backend: Box<dyn AudioBackend>,
    config: DriverConfig,
    profile: Option<DeviceProfile>,
    /// Working sample rate; 0.0 until negotiated or set by the host
    sample_rate: f64,
    bundle: Option<StreamBundle>,
    /// Retained diagnostic of the most recent control-path failure
    last_error: Option<String>,
}

impl DriverSession {
    /// Create an uninitialized session around a selected backend API
    pub fn new(backend: Box<dyn AudioBackend>, config: DriverConfig) -> Self {
        debug!("Session created on backend '{}'", backend.api_name());
        Self {
            backend,
            config,
            profile: None,
            sample_rate: 0.0,
            bundle: None,
            last_error: None,
        }
    }

    /// Current lifecycle state, derived from resource presence
    pub fn state(&self) -> SessionState {
        match (&self.profile, &self.bundle) {
            (None, _) => SessionState::Uninitialized,
            (Some(_), None) => SessionState::Negotiated,
            (Some(_), Some(bundle)) => {
                if bundle.shared.streaming.load(Ordering::Acquire) {
                    SessionState::Streaming
                } else {
                    SessionState::BuffersAllocated
                }
            }
        }
    }

    fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// The retained diagnostic from the most recent failure, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn fail(&mut self, error: DriverError) -> DriverError {
        self.last_error = Some(error.to_string());
        error
    }

    /// Negotiate devices and formats (Uninitialized → Negotiated)
    pub fn initialize(&mut self) -> Result<()> {
        if self.profile.is_some() {
            warn!("initialize() called twice");
            return Err(self.fail(DriverError::AlreadyInitialized));
        }

        let profile = match negotiate(self.backend.as_ref()) {
            Ok(profile) => profile,
            Err(error) => return Err(self.fail(error)),
        };
        self.sample_rate = self
            .config
            .sample_rate
            .filter(|rate| *rate > 0.0)
            .unwrap_or(profile.sample_rate);
        self.profile = Some(profile);
        info!("Session initialized at {} Hz", self.sample_rate);
        Ok(())
    }

    fn profile(&self) -> Result<&DeviceProfile> {
        self.profile
            .as_ref()
            .ok_or(DriverError::NotPresent("session is not initialized"))
    }

    /// Channel counts as (inputs, outputs)
    pub fn channel_counts(&self) -> Result<(usize, usize)> {
        let profile = self.profile()?;
        Ok((
            profile.channels(Direction::Input),
            profile.channels(Direction::Output),
        ))
    }

    /// Metadata for one channel: label, bound state, group, format
    pub fn channel_info(&self, direction: Direction, index: usize) -> Result<ChannelInfo> {
        let profile = self.profile()?;
        let count = profile.channels(direction);
        if index >= count {
            return Err(DriverError::ChannelOutOfRange {
                direction,
                index,
                count,
            });
        }

        let is_active = self
            .bundle
            .as_ref()
            .is_some_and(|bundle| bundle.buffers.is_bound(direction, index));

        Ok(ChannelInfo {
            name: channels::channel_label(direction, index, profile.mask(direction)),
            is_active,
            group: 0,
            sample_format: SampleFormat::Float32,
        })
    }

    /// Buffer-size constraints in frames: fixed policy values, with the
    /// preferred period optionally overridden by configuration
    pub fn buffer_size_hints(&self) -> Result<BufferSizeHints> {
        self.profile()?;
        Ok(BufferSizeHints {
            min: 48,
            max: 48000,
            preferred: self.config.preferred_period.unwrap_or(1024),
            granularity: 1,
        })
    }

    /// The working sample rate
    pub fn sample_rate(&self) -> Result<f64> {
        if self.sample_rate <= 0.0 {
            return Err(DriverError::NoClock("sample rate was never set".to_string()));
        }
        Ok(self.sample_rate)
    }

    /// Set the working sample rate
    ///
    /// With a buffer set in place the rate is frozen: a host that supports
    /// reset requests is asked to reinitialize instead (the rate is left
    /// unchanged); otherwise the call is rejected.
    pub fn set_sample_rate(&mut self, rate: f64) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(self.fail(DriverError::InvalidArguments(format!(
                "sample rate must be positive, got {rate}"
            ))));
        }

        if let Some(bundle) = &self.bundle {
            if bundle.host.supports_reset_requests() {
                info!("Requesting host reset to change sample rate to {} Hz", rate);
                bundle.host.request_reset();
                return Ok(());
            }
            warn!("Cannot change sample rate after create_buffers()");
            return Err(self.fail(DriverError::NotPresent(
                "host does not accept reset requests",
            )));
        }

        debug!("Sample rate set to {} Hz", rate);
        self.sample_rate = rate;
        Ok(())
    }

    /// Probe whether the backend can stream at `rate`
    pub fn can_sample_rate(&mut self, rate: f64) -> Result<()> {
        self.profile()?;
        let params = self.stream_params(rate, None)?;
        match self.backend.open_stream(&params, Box::new(ProbeCallback)) {
            Ok(stream) => {
                debug!("Sample rate {} Hz is available", rate);
                drop(stream);
                Ok(())
            }
            Err(error) => {
                let error = DriverError::NoClock(format!("cannot stream at {rate} Hz: {error}"));
                Err(self.fail(error))
            }
        }
    }

    fn stream_params(&self, sample_rate: f64, period: Option<usize>) -> Result<StreamParams> {
        let profile = self.profile()?;
        let direction_params = |direction: Direction| {
            profile.direction(direction).map(|d| DirectionParams {
                channels: d.channels,
                suggested_latency: d.default_low_latency,
                mask: d.mask,
            })
        };
        Ok(StreamParams {
            input: direction_params(Direction::Input),
            output: direction_params(Direction::Output),
            sample_rate,
            period,
        })
    }

    /// Allocate the double-buffer set and open the backend stream
    /// (Negotiated → BuffersAllocated)
    ///
    /// Returns one [`BufferSlot`] per binding, in binding order: the pair of
    /// half addresses the host works with from now on.
    pub fn create_buffers(
        &mut self,
        bindings: &[ChannelBinding],
        period: usize,
        host: Arc<dyn HostInterface>,
    ) -> Result<Vec<BufferSlot>> {
        info!("create_buffers({} bindings, {} frames)", bindings.len(), period);
        let Some(profile) = self.profile.clone() else {
            return Err(self.fail(DriverError::InvalidState(
                "create_buffers() before initialize()",
            )));
        };
        if self.bundle.is_some() {
            warn!("create_buffers() called twice");
            return Err(self.fail(DriverError::InvalidState(
                "buffers are already allocated",
            )));
        }

        if self.sample_rate <= 0.0 {
            self.sample_rate = FALLBACK_SAMPLE_RATE;
            warn!(
                "Sample rate was never specified, using {} Hz as fallback",
                self.sample_rate
            );
        }

        let (buffers, slots) = match BufferSet::allocate(&profile, bindings, period) {
            Ok(allocated) => allocated,
            Err(error) => return Err(self.fail(error)),
        };

        let shared = Arc::new(EngineShared::new());
        let engine = TransferEngine::new(
            shared.clone(),
            buffers.storage(),
            buffers.bindings().to_vec(),
            host.clone(),
            self.sample_rate,
        );

        let params = self.stream_params(self.sample_rate, Some(period))?;
        let stream = match self.backend.open_stream(&params, Box::new(engine)) {
            Ok(stream) => stream,
            Err(error) => {
                let error =
                    DriverError::HardwareFailure(format!("unable to open backend stream: {error}"));
                return Err(self.fail(error));
            }
        };

        self.bundle = Some(StreamBundle {
            buffers,
            stream,
            host,
            shared,
        });
        Ok(slots)
    }

    /// Close the stream and drop the buffer set (BuffersAllocated → Negotiated)
    pub fn dispose_buffers(&mut self) -> Result<()> {
        info!("dispose_buffers()");
        if self.bundle.is_none() {
            warn!("dispose_buffers() called before create_buffers()");
            return Err(self.fail(DriverError::InvalidState(
                "dispose_buffers() before create_buffers()",
            )));
        }
        if self.is_streaming() {
            warn!("dispose_buffers() called before stop()");
            return Err(self.fail(DriverError::InvalidState(
                "dispose_buffers() while streaming",
            )));
        }

        // Closes the backend stream together with the buffers.
        self.bundle = None;
        Ok(())
    }

    /// Realized (input, output) latency in samples
    pub fn latencies(&self) -> Result<(u64, u64)> {
        let bundle = self
            .bundle
            .as_ref()
            .ok_or(DriverError::NotPresent("latencies require a stream"))?;
        let info = bundle.stream.info();
        let input = (info.input_latency * self.sample_rate) as u64;
        let output = (info.output_latency * self.sample_rate) as u64;
        debug!(
            "Returning input latency of {} samples and output latency of {} samples",
            input, output
        );
        Ok((input, output))
    }

    /// Start streaming (BuffersAllocated → Streaming)
    ///
    /// Performs the one-time timed-notification capability query, resets the
    /// half-index and clock, then starts the backend stream.
    pub fn start(&mut self) -> Result<()> {
        info!("start()");
        let Some(bundle) = self.bundle.as_mut() else {
            warn!("start() called before create_buffers()");
            return Err(self.fail(DriverError::NotPresent(
                "start() before create_buffers()",
            )));
        };
        if bundle.shared.streaming.load(Ordering::Acquire) {
            warn!("start() called twice");
            return Err(self.fail(DriverError::NotPresent("already streaming")));
        }

        let timed = bundle.host.supports_timed_notifications();
        if timed {
            debug!("The host supports timed notifications");
        }
        bundle
            .shared
            .timed_notifications
            .store(timed, Ordering::Relaxed);
        bundle.shared.engine_half.store(0, Ordering::Release);
        bundle.shared.clock.reset();
        bundle.shared.streaming.store(true, Ordering::Release);

        if let Err(error) = bundle.stream.start() {
            bundle.shared.streaming.store(false, Ordering::Release);
            let error =
                DriverError::HardwareFailure(format!("unable to start backend stream: {error}"));
            return Err(self.fail(error));
        }
        info!("Streaming started");
        Ok(())
    }

    /// Stop streaming (Streaming → BuffersAllocated)
    ///
    /// The streaming flag is cleared before the backend is asked to quiesce;
    /// a callback racing the stop sees the flag and does nothing.
    pub fn stop(&mut self) -> Result<()> {
        info!("stop()");
        if !self.is_streaming() {
            warn!("stop() called before start()");
            return Err(self.fail(DriverError::NotPresent("not streaming")));
        }
        let Some(bundle) = self.bundle.as_mut() else {
            return Err(DriverError::NotPresent("not streaming"));
        };

        bundle.shared.streaming.store(false, Ordering::Release);
        if let Err(error) = bundle.stream.stop() {
            let error =
                DriverError::HardwareFailure(format!("unable to stop backend stream: {error}"));
            return Err(self.fail(error));
        }
        info!("Streaming stopped");
        Ok(())
    }

    /// Current stream position; only meaningful while streaming
    pub fn sample_position(&self) -> Result<ClockSample> {
        match &self.bundle {
            Some(bundle) if bundle.shared.streaming.load(Ordering::Acquire) => {
                Ok(bundle.shared.clock.read())
            }
            _ => Err(DriverError::NotPresent("sample position requires streaming")),
        }
    }

    /// The driver exposes exactly one clock source
    pub fn clock_sources(&self) -> Vec<ClockSource> {
        vec![ClockSource {
            index: 0,
            associated_channel: -1,
            associated_group: -1,
            is_current: true,
            name: "Internal",
        }]
    }

    /// Only the internal clock (index 0) can be selected
    pub fn set_clock_source(&mut self, index: u32) -> Result<()> {
        if index != 0 {
            warn!("set_clock_source({}) out of bounds", index);
            return Err(self.fail(DriverError::InvalidState("unknown clock source")));
        }
        Ok(())
    }
}

impl Drop for DriverSession {
    /// Teardown from any state: stop if streaming, dispose if allocated,
    /// release the backend. Failures are recorded, never propagated.
    fn drop(&mut self) {
        if self.is_streaming() {
            if let Err(e) = self.stop() {
                error!("Failed to stop stream during teardown: {}", e);
            }
        }
        if self.bundle.is_some() {
            self.bundle = None;
        }
        if self.profile.is_some() {
            debug!("Releasing backend '{}'", self.backend.api_name());
        }
    }
}

/// No-op callback installed on sample-rate probe streams
struct ProbeCallback;

impl StreamCallback for ProbeCallback {
    fn on_period(
        &mut self,
        _input: &[&[f32]],
        _output: &mut [&mut [f32]],
        _frames: usize,
        _status: StreamStatus,
    ) -> StreamAction {
        StreamAction::Continue
    }
}
