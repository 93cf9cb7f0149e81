//! Scripted in-process backend for tests and offline exercise
//!
//! Devices, extended formats, rejected sample rates, and open/start/stop
//! failures are all declared up front in a [`MockScript`]. The paired
//! [`MockController`] stands in for the backend's realtime thread: it pushes
//! synthetic periods through whichever stream is currently started and hands
//! the produced output back to the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::Direction;
use crate::backend::{
    AudioBackend, BackendStream, DefaultFormat, DeviceDescriptor, StreamAction, StreamCallback,
    StreamInfo, StreamParams, StreamStatus,
};
use crate::device::channels;
use crate::error::{DriverError, Result};

/// One scripted device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub name: String,
    pub channels: usize,
    pub sample_rate: f64,
    pub mask: u32,
    pub low_latency: f64,
}

/// Everything the mock backend will pretend to be
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    pub input: Option<MockDevice>,
    pub output: Option<MockDevice>,
    /// Whether `default_format` reports extended information
    pub extended_format: bool,
    /// Channel count reported by the extended format, when it differs from
    /// the device descriptor
    pub extended_channels: Option<usize>,
    /// Sample rates `open_stream` refuses
    pub rejected_rates: Vec<f64>,
    pub fail_open: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
}

struct StreamSlot {
    callback: Box<dyn StreamCallback>,
    params: StreamParams,
    started: bool,
    closed: bool,
}

struct MockState {
    script: MockScript,
    streams: Mutex<Vec<Arc<Mutex<StreamSlot>>>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Scripted backend implementing the full [`AudioBackend`] contract
pub struct MockBackend {
    state: Arc<MockState>,
}

/// Test-side handle driving and observing the mock backend
#[derive(Clone)]
pub struct MockController {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(script: MockScript) -> (Self, MockController) {
        let state = Arc::new(MockState {
            script,
            streams: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });
        (
            Self {
                state: state.clone(),
            },
            MockController { state },
        )
    }

    /// Convenience duplex script with standard-layout masks
    pub fn duplex(input_channels: usize, output_channels: usize, rate: f64) -> (Self, MockController) {
        let device = |name: &str, channels: usize| MockDevice {
            name: name.to_string(),
            channels,
            sample_rate: rate,
            mask: channels::standard_mask(channels),
            low_latency: 0.01,
        };
        Self::new(MockScript {
            input: Some(device("mock input", input_channels)),
            output: Some(device("mock output", output_channels)),
            ..MockScript::default()
        })
    }

    fn device(&self, direction: Direction) -> Option<&MockDevice> {
        match direction {
            Direction::Input => self.state.script.input.as_ref(),
            Direction::Output => self.state.script.output.as_ref(),
        }
    }
}

impl AudioBackend for MockBackend {
    fn api_name(&self) -> &str {
        "mock"
    }

    fn default_device(&self, direction: Direction) -> Option<DeviceDescriptor> {
        self.device(direction).map(|d| DeviceDescriptor {
            name: d.name.clone(),
            max_channels: d.channels,
            default_sample_rate: d.sample_rate,
            default_low_latency: d.low_latency,
        })
    }

    fn default_format(&self, direction: Direction) -> Option<DefaultFormat> {
        if !self.state.script.extended_format {
            return None;
        }
        self.device(direction).map(|d| DefaultFormat {
            channels: self.state.script.extended_channels.unwrap_or(d.channels),
            mask: d.mask,
        })
    }

    fn open_stream(
        &self,
        params: &StreamParams,
        callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>> {
        if self.state.script.fail_open {
            return Err(DriverError::HardwareFailure(
                "scripted open failure".to_string(),
            ));
        }
        if self
            .state
            .script
            .rejected_rates
            .iter()
            .any(|r| *r == params.sample_rate)
        {
            return Err(DriverError::HardwareFailure(format!(
                "scripted rate rejection: {}",
                params.sample_rate
            )));
        }

        let slot = Arc::new(Mutex::new(StreamSlot {
            callback,
            params: params.clone(),
            started: false,
            closed: false,
        }));
        self.state.streams.lock().push(slot.clone());
        self.state.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockStream {
            state: self.state.clone(),
            slot,
        }))
    }
}

struct MockStream {
    state: Arc<MockState>,
    slot: Arc<Mutex<StreamSlot>>,
}

impl BackendStream for MockStream {
    fn start(&mut self) -> Result<()> {
        if self.state.script.fail_start {
            return Err(DriverError::HardwareFailure(
                "scripted start failure".to_string(),
            ));
        }
        self.slot.lock().started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        // A failed stop still quiesces the stream; the scripted error only
        // exercises the caller's diagnostic path.
        self.slot.lock().started = false;
        if self.state.script.fail_stop {
            return Err(DriverError::HardwareFailure(
                "scripted stop failure".to_string(),
            ));
        }
        Ok(())
    }

    fn info(&self) -> StreamInfo {
        let slot = self.slot.lock();
        let period = slot.params.period.unwrap_or(0) as f64;
        let rate = slot.params.sample_rate.max(1.0);
        let latency = |p: &Option<crate::backend::DirectionParams>| {
            p.as_ref()
                .map_or(0.0, |d| d.suggested_latency + period / rate)
        };
        StreamInfo {
            input_latency: latency(&slot.params.input),
            output_latency: latency(&slot.params.output),
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        slot.started = false;
        slot.closed = true;
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Value pumped into output scratch so tests can tell "zeroed by the
/// callback" from "never touched"
pub const OUTPUT_SENTINEL: f32 = -99.0;

impl MockController {
    /// Streams opened so far
    pub fn open_count(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Streams closed so far
    pub fn closed_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Whether any open stream is currently started
    pub fn has_started_stream(&self) -> bool {
        self.state
            .streams
            .lock()
            .iter()
            .any(|slot| {
                let slot = slot.lock();
                slot.started && !slot.closed
            })
    }

    /// Drive one period through the started stream
    ///
    /// `input` must hold one channel's worth of samples per scripted input
    /// channel. Returns the output produced by the callback, one vector per
    /// output channel, pre-filled with [`OUTPUT_SENTINEL`].
    pub fn pump(&self, input: &[Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
        self.pump_with_status(input, frames, StreamStatus::default())
    }

    /// [`pump`](Self::pump) with explicit backend status flags
    pub fn pump_with_status(
        &self,
        input: &[Vec<f32>],
        frames: usize,
        status: StreamStatus,
    ) -> Vec<Vec<f32>> {
        let streams = self.state.streams.lock();
        let slot = streams
            .iter()
            .find(|slot| {
                let slot = slot.lock();
                slot.started && !slot.closed
            })
            .expect("no started stream to pump");
        let mut slot = slot.lock();

        let in_channels = slot.params.input.as_ref().map_or(0, |d| d.channels);
        let out_channels = slot.params.output.as_ref().map_or(0, |d| d.channels);
        assert_eq!(
            input.len(),
            in_channels,
            "input channel count does not match the stream"
        );
        for channel in input {
            assert_eq!(channel.len(), frames, "input channel length mismatch");
        }

        let in_refs: Vec<&[f32]> = input.iter().map(|c| c.as_slice()).collect();
        let mut output: Vec<Vec<f32>> = vec![vec![OUTPUT_SENTINEL; frames]; out_channels];
        let mut out_refs: Vec<&mut [f32]> = output.iter_mut().map(|c| c.as_mut_slice()).collect();

        let action = slot
            .callback
            .on_period(&in_refs, &mut out_refs, frames, status);
        assert_eq!(action, StreamAction::Continue);

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingCallback {
        periods: Arc<AtomicUsize>,
    }

    impl StreamCallback for CountingCallback {
        fn on_period(
            &mut self,
            _input: &[&[f32]],
            output: &mut [&mut [f32]],
            frames: usize,
            _status: StreamStatus,
        ) -> StreamAction {
            for channel in output.iter_mut() {
                channel[..frames].fill(0.25);
            }
            self.periods.fetch_add(1, Ordering::SeqCst);
            StreamAction::Continue
        }
    }

    fn open_started_stream(
        control: &MockController,
        backend: &MockBackend,
        periods: Arc<AtomicUsize>,
    ) -> Box<dyn BackendStream> {
        let params = StreamParams {
            input: Some(crate::backend::DirectionParams {
                channels: 1,
                suggested_latency: 0.01,
                mask: 0,
            }),
            output: Some(crate::backend::DirectionParams {
                channels: 2,
                suggested_latency: 0.01,
                mask: 0,
            }),
            sample_rate: 48000.0,
            period: Some(32),
        };
        let mut stream = backend
            .open_stream(&params, Box::new(CountingCallback { periods }))
            .unwrap();
        stream.start().unwrap();
        assert!(control.has_started_stream());
        stream
    }

    #[test]
    fn test_pump_invokes_callback() {
        let (backend, control) = MockBackend::duplex(1, 2, 48000.0);
        let periods = Arc::new(AtomicUsize::new(0));
        let _stream = open_started_stream(&control, &backend, periods.clone());

        let out = control.pump(&[vec![0.0; 32]], 32);
        assert_eq!(periods.load(Ordering::SeqCst), 1);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.iter().all(|&s| s == 0.25)));
    }

    #[test]
    fn test_stream_closed_on_drop() {
        let (backend, control) = MockBackend::duplex(1, 2, 48000.0);
        let periods = Arc::new(AtomicUsize::new(0));
        let stream = open_started_stream(&control, &backend, periods);
        drop(stream);
        assert_eq!(control.open_count(), 1);
        assert_eq!(control.closed_count(), 1);
        assert!(!control.has_started_stream());
    }

    #[test]
    fn test_rejected_rate() {
        let (backend, _control) = MockBackend::new(MockScript {
            output: Some(MockDevice {
                name: "out".to_string(),
                channels: 2,
                sample_rate: 48000.0,
                mask: 0,
                low_latency: 0.01,
            }),
            rejected_rates: vec![192000.0],
            ..MockScript::default()
        });
        let params = StreamParams {
            input: None,
            output: Some(crate::backend::DirectionParams {
                channels: 2,
                suggested_latency: 0.01,
                mask: 0,
            }),
            sample_rate: 192000.0,
            period: None,
        };
        struct Noop;
        impl StreamCallback for Noop {
            fn on_period(
                &mut self,
                _i: &[&[f32]],
                _o: &mut [&mut [f32]],
                _f: usize,
                _s: StreamStatus,
            ) -> StreamAction {
                StreamAction::Continue
            }
        }
        assert!(backend.open_stream(&params, Box::new(Noop)).is_err());
    }
}
