//! Production backend on top of cpal
//!
//! cpal streams are single-direction with interleaved buffers, while the
//! driver core wants one duplex, non-interleaved period callback. The
//! adapter drives the period callback from the output stream and feeds
//! captured input through an SPSC ring; de/re-interleaving goes through
//! scratch buffers sized when the stream is opened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use tracing::{debug, info, warn};

use crate::audio::Direction;
use crate::backend::{
    AudioBackend, BackendStream, DefaultFormat, DeviceDescriptor, DirectionParams, StreamCallback,
    StreamInfo, StreamParams, StreamStatus,
};
use crate::device::channels;
use crate::error::{DriverError, Result};

/// Preference order when no backend API is forced: low-latency,
/// exclusive-capable APIs first, then the platform mainstays
const API_PREFERENCE: &[&str] = &["ASIO", "JACK", "WASAPI", "CoreAudio"];

/// Nominal suggested latency when the device reports nothing usable
const DEFAULT_LOW_LATENCY: f64 = 0.010;

/// Scratch/ring sizing fallback for streams opened with an unspecified period
const DEFAULT_PERIOD: usize = 1024;

/// How many periods of input the duplex ring can hold
const RING_PERIODS: usize = 8;

/// The selected cpal host
pub struct CpalBackend {
    host: cpal::Host,
    api_name: String,
}

impl CpalBackend {
    /// Select a backend API
    ///
    /// A forced name must match an available host (`NoApi` otherwise); with
    /// no preference the fixed order in [`API_PREFERENCE`] is walked before
    /// falling back to the platform default host.
    pub fn with_preference(forced: Option<&str>) -> Result<Self> {
        let available = cpal::available_hosts();
        debug!(
            "Available backend APIs: {:?}",
            available.iter().map(|id| id.name()).collect::<Vec<_>>()
        );

        if let Some(name) = forced {
            let id = available
                .iter()
                .find(|id| id.name().eq_ignore_ascii_case(name))
                .copied()
                .ok_or(DriverError::NoApi)?;
            let host = cpal::host_from_id(id)
                .map_err(|e| DriverError::BackendUnavailable(e.to_string()))?;
            info!("Selected forced backend API '{}'", id.name());
            return Ok(Self {
                host,
                api_name: id.name().to_string(),
            });
        }

        for preferred in API_PREFERENCE {
            if let Some(id) = available
                .iter()
                .find(|id| id.name().eq_ignore_ascii_case(preferred))
            {
                if let Ok(host) = cpal::host_from_id(*id) {
                    info!("Selected preferred backend API '{}'", id.name());
                    return Ok(Self {
                        host,
                        api_name: id.name().to_string(),
                    });
                }
            }
        }

        let host = cpal::default_host();
        let api_name = host.id().name().to_string();
        info!("Selected default backend API '{}'", api_name);
        Ok(Self { host, api_name })
    }

    fn device(&self, direction: Direction) -> Option<cpal::Device> {
        match direction {
            Direction::Input => self.host.default_input_device(),
            Direction::Output => self.host.default_output_device(),
        }
    }

    fn default_config(
        device: &cpal::Device,
        direction: Direction,
    ) -> Option<cpal::SupportedStreamConfig> {
        match direction {
            Direction::Input => device.default_input_config().ok(),
            Direction::Output => device.default_output_config().ok(),
        }
    }

    fn stream_config(params: &DirectionParams, stream: &StreamParams) -> StreamConfig {
        StreamConfig {
            channels: params.channels as u16,
            sample_rate: SampleRate(stream.sample_rate as u32),
            buffer_size: match stream.period {
                Some(period) => BufferSize::Fixed(period as u32),
                None => BufferSize::Default,
            },
        }
    }

    fn stream_info(params: &StreamParams) -> StreamInfo {
        // cpal exposes no realized latency; report the requested period plus
        // the suggested latency per direction.
        let period_secs =
            params.period.unwrap_or(DEFAULT_PERIOD) as f64 / params.sample_rate.max(1.0);
        let latency = |p: &Option<DirectionParams>| {
            p.as_ref()
                .map_or(0.0, |d| d.suggested_latency + period_secs)
        };
        StreamInfo {
            input_latency: latency(&params.input),
            output_latency: latency(&params.output),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn api_name(&self) -> &str {
        &self.api_name
    }

    fn default_device(&self, direction: Direction) -> Option<DeviceDescriptor> {
        let device = self.device(direction)?;
        let config = Self::default_config(&device, direction)?;
        Some(DeviceDescriptor {
            name: device.name().unwrap_or_else(|_| "unknown".to_string()),
            max_channels: config.channels() as usize,
            default_sample_rate: config.sample_rate().0 as f64,
            default_low_latency: DEFAULT_LOW_LATENCY,
        })
    }

    fn default_format(&self, direction: Direction) -> Option<DefaultFormat> {
        // cpal reports no channel positions; synthesize the standard layout
        // for common channel counts and stay silent otherwise.
        let device = self.device(direction)?;
        let config = Self::default_config(&device, direction)?;
        let channel_count = config.channels() as usize;
        let mask = channels::standard_mask(channel_count);
        if mask == 0 {
            return None;
        }
        Some(DefaultFormat {
            channels: channel_count,
            mask,
        })
    }

    fn open_stream(
        &self,
        params: &StreamParams,
        callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>> {
        match (&params.input, &params.output) {
            (Some(input), Some(output)) => self.open_duplex(input, output, params, callback),
            (Some(input), None) => self.open_input_only(input, params, callback),
            (None, Some(output)) => self.open_output_only(output, params, callback),
            (None, None) => Err(DriverError::InvalidArguments(
                "stream needs at least one direction".to_string(),
            )),
        }
    }
}

impl CpalBackend {
    fn open_duplex(
        &self,
        input: &DirectionParams,
        output: &DirectionParams,
        params: &StreamParams,
        callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>> {
        let in_device = self
            .device(Direction::Input)
            .ok_or_else(|| DriverError::BackendUnavailable("no default input device".to_string()))?;
        let out_device = self
            .device(Direction::Output)
            .ok_or_else(|| DriverError::BackendUnavailable("no default output device".to_string()))?;

        let period = params.period.unwrap_or(DEFAULT_PERIOD);
        let capacity = period * input.channels * RING_PERIODS;
        let (mut producer, consumer) = rtrb::RingBuffer::<f32>::new(capacity);
        let overflow = Arc::new(AtomicBool::new(false));

        let overflow_in = overflow.clone();
        let in_stream = in_device
            .build_input_stream(
                &Self::stream_config(input, params),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        if producer.push(sample).is_err() {
                            overflow_in.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                },
                err_fn("input"),
                None::<Duration>,
            )
            .map_err(|e| DriverError::HardwareFailure(e.to_string()))?;

        let mut adapter = PeriodAdapter::new(
            callback,
            input.channels,
            output.channels,
            period,
            Some(consumer),
            Some(overflow),
        );
        let out_stream = out_device
            .build_output_stream(
                &Self::stream_config(output, params),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    adapter.run_output(data);
                },
                err_fn("output"),
                None::<Duration>,
            )
            .map_err(|e| DriverError::HardwareFailure(e.to_string()))?;

        Ok(Box::new(CpalStream {
            input: Some(in_stream),
            output: Some(out_stream),
            info: Self::stream_info(params),
        }))
    }

    fn open_input_only(
        &self,
        input: &DirectionParams,
        params: &StreamParams,
        callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>> {
        let device = self
            .device(Direction::Input)
            .ok_or_else(|| DriverError::BackendUnavailable("no default input device".to_string()))?;
        let period = params.period.unwrap_or(DEFAULT_PERIOD);
        let mut adapter = PeriodAdapter::new(callback, input.channels, 0, period, None, None);
        let stream = device
            .build_input_stream(
                &Self::stream_config(input, params),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    adapter.run_input(data);
                },
                err_fn("input"),
                None::<Duration>,
            )
            .map_err(|e| DriverError::HardwareFailure(e.to_string()))?;

        Ok(Box::new(CpalStream {
            input: Some(stream),
            output: None,
            info: Self::stream_info(params),
        }))
    }

    fn open_output_only(
        &self,
        output: &DirectionParams,
        params: &StreamParams,
        callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>> {
        let device = self
            .device(Direction::Output)
            .ok_or_else(|| DriverError::BackendUnavailable("no default output device".to_string()))?;
        let period = params.period.unwrap_or(DEFAULT_PERIOD);
        let mut adapter = PeriodAdapter::new(callback, 0, output.channels, period, None, None);
        let stream = device
            .build_output_stream(
                &Self::stream_config(output, params),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    adapter.run_output(data);
                },
                err_fn("output"),
                None::<Duration>,
            )
            .map_err(|e| DriverError::HardwareFailure(e.to_string()))?;

        Ok(Box::new(CpalStream {
            input: None,
            output: Some(stream),
            info: Self::stream_info(params),
        }))
    }
}

fn err_fn(tag: &'static str) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |e| warn!("cpal {} stream error: {}", tag, e)
}

/// Bridges one interleaved cpal callback to the non-interleaved duplex
/// period callback
struct PeriodAdapter {
    callback: Box<dyn StreamCallback>,
    in_channels: usize,
    out_channels: usize,
    in_scratch: Vec<Vec<f32>>,
    out_scratch: Vec<Vec<f32>>,
    consumer: Option<rtrb::Consumer<f32>>,
    input_overflow: Option<Arc<AtomicBool>>,
}

impl PeriodAdapter {
    fn new(
        callback: Box<dyn StreamCallback>,
        in_channels: usize,
        out_channels: usize,
        period: usize,
        consumer: Option<rtrb::Consumer<f32>>,
        input_overflow: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            callback,
            in_channels,
            out_channels,
            in_scratch: vec![vec![0.0; period]; in_channels],
            out_scratch: vec![vec![0.0; period]; out_channels],
            consumer,
            input_overflow,
        }
    }

    /// Grow scratch when the backend delivers a larger period than requested.
    /// Allocates, but only on the first oversized callback.
    fn ensure_capacity(&mut self, frames: usize) {
        for channel in self.in_scratch.iter_mut().chain(self.out_scratch.iter_mut()) {
            if channel.len() < frames {
                channel.resize(frames, 0.0);
            }
        }
    }

    fn fill_input(&mut self, frames: usize, status: &mut StreamStatus) {
        let Some(consumer) = &mut self.consumer else {
            return;
        };
        for frame in 0..frames {
            for channel in 0..self.in_channels {
                match consumer.pop() {
                    Ok(sample) => self.in_scratch[channel][frame] = sample,
                    Err(_) => {
                        status.input_underflow = true;
                        for ch in self.in_scratch.iter_mut() {
                            for slot in &mut ch[frame..frames] {
                                *slot = 0.0;
                            }
                        }
                        return;
                    }
                }
            }
        }
    }

    fn invoke(&mut self, frames: usize, status: StreamStatus) {
        let in_refs: Vec<&[f32]> = self.in_scratch.iter().map(|c| &c[..frames]).collect();
        let mut out_refs: Vec<&mut [f32]> = self
            .out_scratch
            .iter_mut()
            .map(|c| &mut c[..frames])
            .collect();
        let _ = self.callback.on_period(&in_refs, &mut out_refs, frames, status);
    }

    /// Output (or duplex) path: pull input from the ring, run the period
    /// callback, interleave the result back out
    fn run_output(&mut self, data: &mut [f32]) {
        let frames = data.len() / self.out_channels.max(1);
        self.ensure_capacity(frames);

        let mut status = StreamStatus::default();
        if let Some(flag) = &self.input_overflow {
            if flag.swap(false, Ordering::Relaxed) {
                status.input_overflow = true;
            }
        }
        self.fill_input(frames, &mut status);
        self.invoke(frames, status);

        for frame in 0..frames {
            for channel in 0..self.out_channels {
                data[frame * self.out_channels + channel] = self.out_scratch[channel][frame];
            }
        }
    }

    /// Input-only path: deinterleave and run the period callback with no
    /// output channels
    fn run_input(&mut self, data: &[f32]) {
        let frames = data.len() / self.in_channels.max(1);
        self.ensure_capacity(frames);
        for frame in 0..frames {
            for channel in 0..self.in_channels {
                self.in_scratch[channel][frame] = data[frame * self.in_channels + channel];
            }
        }
        self.invoke(frames, StreamStatus::default());
    }
}

/// An open cpal stream pair (either half may be absent)
struct CpalStream {
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
    info: StreamInfo,
}

impl BackendStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        if let Some(stream) = &self.input {
            stream
                .play()
                .map_err(|e| DriverError::HardwareFailure(e.to_string()))?;
        }
        if let Some(stream) = &self.output {
            stream
                .play()
                .map_err(|e| DriverError::HardwareFailure(e.to_string()))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        // cpal's pause does not promise quiescence on every platform; the
        // transfer engine's streaming-flag guard covers a late callback.
        if let Some(stream) = &self.output {
            stream
                .pause()
                .map_err(|e| DriverError::HardwareFailure(e.to_string()))?;
        }
        if let Some(stream) = &self.input {
            stream
                .pause()
                .map_err(|e| DriverError::HardwareFailure(e.to_string()))?;
        }
        Ok(())
    }

    fn info(&self) -> StreamInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_info_reports_period_and_latency() {
        let params = StreamParams {
            input: Some(DirectionParams {
                channels: 2,
                suggested_latency: 0.01,
                mask: 0,
            }),
            output: None,
            sample_rate: 48000.0,
            period: Some(480),
        };
        let info = CpalBackend::stream_info(&params);
        assert!((info.input_latency - 0.02).abs() < 1e-9);
        assert_eq!(info.output_latency, 0.0);
    }

    #[test]
    fn test_adapter_interleaving_roundtrip() {
        struct Passthrough;
        impl StreamCallback for Passthrough {
            fn on_period(
                &mut self,
                input: &[&[f32]],
                output: &mut [&mut [f32]],
                frames: usize,
                _status: StreamStatus,
            ) -> crate::backend::StreamAction {
                for (dst, src) in output.iter_mut().zip(input.iter()) {
                    dst[..frames].copy_from_slice(&src[..frames]);
                }
                crate::backend::StreamAction::Continue
            }
        }

        let (mut producer, consumer) = rtrb::RingBuffer::<f32>::new(64);
        // Two interleaved stereo frames: (1, 2), (3, 4)
        for sample in [1.0f32, 2.0, 3.0, 4.0] {
            producer.push(sample).unwrap();
        }
        let mut adapter =
            PeriodAdapter::new(Box::new(Passthrough), 2, 2, 2, Some(consumer), None);
        let mut data = [0.0f32; 4];
        adapter.run_output(&mut data);
        assert_eq!(data, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_adapter_flags_ring_underflow() {
        struct StatusProbe {
            underflow: Arc<AtomicBool>,
        }
        impl StreamCallback for StatusProbe {
            fn on_period(
                &mut self,
                input: &[&[f32]],
                _output: &mut [&mut [f32]],
                frames: usize,
                status: StreamStatus,
            ) -> crate::backend::StreamAction {
                self.underflow.store(status.input_underflow, Ordering::Relaxed);
                // The gap must be zero-filled.
                assert!(input[0][frames - 1] == 0.0);
                crate::backend::StreamAction::Continue
            }
        }

        let (mut producer, consumer) = rtrb::RingBuffer::<f32>::new(64);
        producer.push(0.5).unwrap();
        let underflow = Arc::new(AtomicBool::new(false));
        let mut adapter = PeriodAdapter::new(
            Box::new(StatusProbe {
                underflow: underflow.clone(),
            }),
            1,
            1,
            4,
            Some(consumer),
            None,
        );
        let mut data = [0.0f32; 4];
        adapter.run_output(&mut data);
        assert!(underflow.load(Ordering::Relaxed));
    }
}
