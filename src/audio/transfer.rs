//! Realtime transfer engine: the per-period bridge between the backend
//! callback and the host's buffer halves
//!
//! Runs entirely on the backend's audio thread. No allocation, no blocking,
//! no locks; the only external call is the host notification, which the host
//! contract guarantees returns promptly.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::audio::buffers::BufferStorage;
use crate::audio::{ChannelBinding, Direction};
use crate::backend::{StreamAction, StreamCallback, StreamStatus};
use crate::driver::HostInterface;
use crate::sync::ClockTracker;

/// Control state shared between the session (control thread) and the
/// transfer engine (realtime thread)
pub(crate) struct EngineShared {
    /// Set by `start()` before the stream runs, cleared by `stop()` before
    /// the stream is asked to quiesce
    pub(crate) streaming: AtomicBool,
    /// Half-index the engine owns this period; the host holds the other
    pub(crate) engine_half: AtomicUsize,
    /// Host capability negotiated at `start()`
    pub(crate) timed_notifications: AtomicBool,
    pub(crate) clock: ClockTracker,
}

impl EngineShared {
    pub(crate) fn new() -> Self {
        Self {
            streaming: AtomicBool::new(false),
            engine_half: AtomicUsize::new(0),
            timed_notifications: AtomicBool::new(false),
            clock: ClockTracker::new(),
        }
    }
}

/// The per-period callback installed on the backend stream
pub struct TransferEngine {
    shared: Arc<EngineShared>,
    storage: Arc<BufferStorage>,
    /// Bindings in slot order; slot i lives at offset i in each half
    bindings: Vec<ChannelBinding>,
    host: Arc<dyn HostInterface>,
    sample_rate: f64,
}

impl TransferEngine {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        storage: Arc<BufferStorage>,
        bindings: Vec<ChannelBinding>,
        host: Arc<dyn HostInterface>,
        sample_rate: f64,
    ) -> Self {
        Self {
            shared,
            storage,
            bindings,
            host,
            sample_rate,
        }
    }

    fn log_status(status: StreamStatus) {
        if status.input_overflow {
            warn!("Input overflow detected (some input data was discarded)");
        }
        if status.input_underflow {
            warn!("Input underflow detected (gaps were inserted in the input)");
        }
        if status.output_overflow {
            warn!("Output overflow detected (some output data was discarded)");
        }
        if status.output_underflow {
            warn!("Output underflow detected (gaps were inserted in the output)");
        }
    }
}

impl StreamCallback for TransferEngine {
    fn on_period(
        &mut self,
        input: &[&[f32]],
        output: &mut [&mut [f32]],
        frames: usize,
        status: StreamStatus,
    ) -> StreamAction {
        // The backend may fire once more after stop() has begun but before
        // the stream has quiesced.
        if !self.shared.streaming.load(Ordering::Acquire) {
            trace!("Ignoring callback while not streaming");
            return StreamAction::Continue;
        }

        // Defensive fallback against backend period-size drift: skip the
        // whole period, including the notification, flip, and clock advance.
        if frames != self.storage.period() {
            warn!(
                "Expected {} frames, got {}, skipping period",
                self.storage.period(),
                frames
            );
            return StreamAction::Continue;
        }

        if status.any() {
            Self::log_status(status);
        }

        // Unbound output channels stay silent.
        for channel in output.iter_mut() {
            channel[..frames].fill(0.0);
        }

        // The host is busy with the other half and is not touching this one.
        let half = self.shared.engine_half.load(Ordering::Relaxed);
        for (slot, binding) in self.bindings.iter().enumerate() {
            match binding.direction {
                Direction::Input => {
                    if let Some(src) = input.get(binding.index) {
                        self.storage.write_slot(half, slot, &src[..frames]);
                    }
                }
                Direction::Output => {
                    if let Some(dst) = output.get_mut(binding.index) {
                        self.storage.read_slot(half, slot, &mut dst[..frames]);
                    }
                }
            }
        }

        // Hand the filled half to the host, with timing when negotiated.
        if self.shared.timed_notifications.load(Ordering::Relaxed) {
            let clock = self.shared.clock.read();
            self.host
                .buffer_ready_timed(half, clock, self.sample_rate, 1.0);
        } else {
            self.host.buffer_ready(half);
        }

        // The half just handed off becomes host-owned; the other becomes
        // ours for the next period.
        self.shared.engine_half.store(half ^ 1, Ordering::Release);
        self.shared.clock.advance(frames as u64);

        StreamAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferSet;
    use crate::device::{DeviceProfile, DirectionProfile};
    use crate::sync::ClockSample;
    use parking_lot::Mutex;

    struct RecordingHost {
        halves: Mutex<Vec<usize>>,
        timed: Mutex<Vec<(usize, ClockSample)>>,
        supports_timed: bool,
    }

    impl RecordingHost {
        fn new(supports_timed: bool) -> Self {
            Self {
                halves: Mutex::new(Vec::new()),
                timed: Mutex::new(Vec::new()),
                supports_timed,
            }
        }
    }

    impl HostInterface for RecordingHost {
        fn supports_timed_notifications(&self) -> bool {
            self.supports_timed
        }

        fn buffer_ready(&self, half: usize) {
            self.halves.lock().push(half);
        }

        fn buffer_ready_timed(&self, half: usize, clock: ClockSample, _rate: f64, _speed: f64) {
            self.timed.lock().push((half, clock));
        }
    }

    fn duplex_profile() -> DeviceProfile {
        DeviceProfile {
            input: Some(DirectionProfile {
                device_name: "in".to_string(),
                channels: 2,
                mask: 0x3,
                default_low_latency: 0.01,
            }),
            output: Some(DirectionProfile {
                device_name: "out".to_string(),
                channels: 2,
                mask: 0x3,
                default_low_latency: 0.01,
            }),
            sample_rate: 48000.0,
        }
    }

    struct Rig {
        engine: TransferEngine,
        shared: Arc<EngineShared>,
        host: Arc<RecordingHost>,
    }

    fn rig(
        bindings: &[ChannelBinding],
        period: usize,
        timed: bool,
    ) -> (Rig, Vec<crate::audio::BufferSlot>) {
        let profile = duplex_profile();
        let (set, slots) = BufferSet::allocate(&profile, bindings, period).unwrap();
        let shared = Arc::new(EngineShared::new());
        let host = Arc::new(RecordingHost::new(timed));
        let engine = TransferEngine::new(
            shared.clone(),
            set.storage(),
            set.bindings().to_vec(),
            host.clone(),
            48000.0,
        );
        shared
            .timed_notifications
            .store(timed, Ordering::Relaxed);
        shared.clock.reset();
        shared.streaming.store(true, Ordering::Release);
        (
            Rig {
                engine,
                shared,
                host,
            },
            slots,
        )
    }

    fn pump(rig: &mut Rig, input: &[Vec<f32>], out_channels: usize, frames: usize) -> Vec<Vec<f32>> {
        let in_refs: Vec<&[f32]> = input.iter().map(|c| c.as_slice()).collect();
        let mut out: Vec<Vec<f32>> = vec![vec![-99.0; frames]; out_channels];
        let mut out_refs: Vec<&mut [f32]> = out.iter_mut().map(|c| c.as_mut_slice()).collect();
        let action = rig
            .engine
            .on_period(&in_refs, &mut out_refs, frames, StreamStatus::default());
        assert_eq!(action, StreamAction::Continue);
        out
    }

    #[test]
    fn test_half_index_alternates_from_zero() {
        let (mut rig, _slots) = rig(&[ChannelBinding::output(0)], 8, false);
        let input: Vec<Vec<f32>> = vec![vec![0.0; 8]; 2];
        for _ in 0..5 {
            pump(&mut rig, &input, 2, 8);
        }
        assert_eq!(*rig.host.halves.lock(), vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_unbound_outputs_are_silent() {
        let (mut rig, slots) = rig(&[ChannelBinding::output(1)], 4, false);
        slots[0].write_half(0, &[0.5, 0.5, 0.5, 0.5]);
        let input: Vec<Vec<f32>> = vec![vec![1.0; 4]; 2];
        let out = pump(&mut rig, &input, 2, 4);
        assert_eq!(out[0], vec![0.0; 4], "unbound output channel not silenced");
        assert_eq!(out[1], vec![0.5; 4]);
    }

    #[test]
    fn test_input_copied_into_engine_half() {
        let (mut rig, slots) = rig(&[ChannelBinding::input(1)], 4, false);
        let input = vec![vec![1.0; 4], vec![2.0, 3.0, 4.0, 5.0]];
        pump(&mut rig, &input, 2, 4);
        let mut got = [0.0f32; 4];
        // The engine filled half 0 and handed it off.
        slots[0].read_half(0, &mut got);
        assert_eq!(got, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_clock_advances_per_period() {
        let (mut rig, _slots) = rig(&[ChannelBinding::input(0)], 16, false);
        let input: Vec<Vec<f32>> = vec![vec![0.0; 16]; 2];
        for _ in 0..3 {
            pump(&mut rig, &input, 2, 16);
        }
        assert_eq!(rig.shared.clock.read().samples, 48);
    }

    #[test]
    fn test_frame_mismatch_skips_everything() {
        let (mut rig, _slots) = rig(&[ChannelBinding::input(0)], 16, false);
        let input: Vec<Vec<f32>> = vec![vec![0.0; 8]; 2];
        pump(&mut rig, &input, 2, 8);
        assert!(rig.host.halves.lock().is_empty(), "notification not skipped");
        assert_eq!(rig.shared.engine_half.load(Ordering::Relaxed), 0);
        assert_eq!(rig.shared.clock.read().samples, 0);
    }

    #[test]
    fn test_not_streaming_is_inert() {
        let (mut rig, _slots) = rig(&[ChannelBinding::input(0)], 8, false);
        rig.shared.streaming.store(false, Ordering::Release);
        let input: Vec<Vec<f32>> = vec![vec![0.0; 8]; 2];
        pump(&mut rig, &input, 2, 8);
        assert!(rig.host.halves.lock().is_empty());
        assert_eq!(rig.shared.clock.read().samples, 0);
    }

    #[test]
    fn test_timed_notification_carries_pre_advance_position() {
        let (mut rig, _slots) = rig(&[ChannelBinding::input(0)], 8, true);
        let input: Vec<Vec<f32>> = vec![vec![0.0; 8]; 2];
        pump(&mut rig, &input, 2, 8);
        pump(&mut rig, &input, 2, 8);
        let timed = rig.host.timed.lock();
        assert_eq!(timed.len(), 2);
        assert_eq!(timed[0].0, 0);
        assert_eq!(timed[0].1.samples, 0);
        assert_eq!(timed[1].0, 1);
        assert_eq!(timed[1].1.samples, 8);
        assert!(rig.host.halves.lock().is_empty());
    }
}
