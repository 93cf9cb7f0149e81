//! Double-buffered sample storage shared between host and transfer engine
//!
//! The storage is split into two halves of `period × bound-channel-count`
//! samples. Ownership alternates per period: the transfer engine fills and
//! drains exactly one half while the host holds the other, and the handoff
//! point is the single half-index flip inside the engine. The host contract
//! requires its processing of a handed-off half to complete before the next
//! handoff reaches that half again, so no lock is taken on either side.

use std::cell::UnsafeCell;
use std::sync::Arc;

use tracing::debug;

use crate::audio::{Direction, Sample};
use crate::device::DeviceProfile;
use crate::error::{DriverError, Result};

/// A (direction, channel-index) pair the host binds to a buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelBinding {
    pub direction: Direction,
    pub index: usize,
}

impl ChannelBinding {
    pub fn input(index: usize) -> Self {
        Self {
            direction: Direction::Input,
            index,
        }
    }

    pub fn output(index: usize) -> Self {
        Self {
            direction: Direction::Output,
            index,
        }
    }
}

/// Raw double-buffered storage for all bound channels
///
/// Samples live behind `UnsafeCell` because the host thread and the realtime
/// thread both reach into the storage without a lock; the alternation
/// invariant described in the module docs keeps them on disjoint halves.
#[derive(Debug)]
pub(crate) struct BufferStorage {
    halves: [Box<[UnsafeCell<Sample>]>; 2],
    period: usize,
}

// The baton-pass contract guarantees the two threads never touch the same
// half within a period; all cross-thread access goes through UnsafeCell.
unsafe impl Send for BufferStorage {}
unsafe impl Sync for BufferStorage {}

impl BufferStorage {
    fn half(slots: usize, period: usize) -> Box<[UnsafeCell<Sample>]> {
        (0..slots * period)
            .map(|_| UnsafeCell::new(0.0))
            .collect::<Vec<_>>()
            .into_boxed_slice()
    }

    fn new(slots: usize, period: usize) -> Self {
        Self {
            halves: [Self::half(slots, period), Self::half(slots, period)],
            period,
        }
    }

    pub(crate) fn period(&self) -> usize {
        self.period
    }

    fn cells(&self, half: usize, slot: usize, len: usize) -> &[UnsafeCell<Sample>] {
        let start = slot * self.period;
        &self.halves[half & 1][start..start + len]
    }

    /// Copy samples into one slot of one half
    pub(crate) fn write_slot(&self, half: usize, slot: usize, src: &[Sample]) {
        let len = src.len().min(self.period);
        for (cell, &sample) in self.cells(half, slot, len).iter().zip(src) {
            // SAFETY: the alternation invariant makes this half exclusive to
            // the caller for the duration of the period.
            unsafe { *cell.get() = sample };
        }
    }

    /// Copy samples out of one slot of one half
    pub(crate) fn read_slot(&self, half: usize, slot: usize, dst: &mut [Sample]) {
        let len = dst.len().min(self.period);
        for (sample, cell) in dst.iter_mut().zip(self.cells(half, slot, len)) {
            // SAFETY: as in `write_slot`.
            unsafe { *sample = *cell.get() };
        }
    }
}

/// Host-facing handle to one bound channel's pair of buffer-half slots
///
/// This is the "two addresses per binding" of the driver protocol: the host
/// reads captured input from, and writes output into, the half it currently
/// owns. The handle keeps the storage alive, so it stays valid across
/// disposal; it only goes stale.
#[derive(Debug)]
pub struct BufferSlot {
    storage: Arc<BufferStorage>,
    slot: usize,
    binding: ChannelBinding,
}

impl BufferSlot {
    pub fn binding(&self) -> ChannelBinding {
        self.binding
    }

    /// Frames per period in each half
    pub fn frames(&self) -> usize {
        self.storage.period()
    }

    /// Write host-produced samples into one half of this slot
    pub fn write_half(&self, half: usize, data: &[Sample]) {
        self.storage.write_slot(half, self.slot, data);
    }

    /// Read engine-delivered samples out of one half of this slot
    pub fn read_half(&self, half: usize, out: &mut [Sample]) {
        self.storage.read_slot(half, self.slot, out);
    }
}

/// The allocated double-buffer set: storage, period length, and bindings
///
/// Exactly one set exists per session at a time; it is created together with
/// the backend stream and disposed together with it.
#[derive(Debug)]
pub struct BufferSet {
    storage: Arc<BufferStorage>,
    bindings: Vec<ChannelBinding>,
}

impl BufferSet {
    /// Validate bindings against the profile and allocate zeroed storage
    ///
    /// Returns the set plus one host-facing [`BufferSlot`] per binding, in
    /// binding order.
    pub fn allocate(
        profile: &DeviceProfile,
        bindings: &[ChannelBinding],
        period: usize,
    ) -> Result<(Self, Vec<BufferSlot>)> {
        if bindings.is_empty() {
            return Err(DriverError::InvalidArguments(
                "at least one channel binding is required".to_string(),
            ));
        }
        if period < 1 {
            return Err(DriverError::InvalidArguments(
                "period length must be at least 1 frame".to_string(),
            ));
        }

        for binding in bindings {
            let count = profile.channels(binding.direction);
            if binding.index >= count {
                return Err(DriverError::ChannelOutOfRange {
                    direction: binding.direction,
                    index: binding.index,
                    count,
                });
            }
        }

        let storage = Arc::new(BufferStorage::new(bindings.len(), period));
        debug!(
            "Allocated double buffer: {} slots x {} frames per half",
            bindings.len(),
            period
        );

        let slots = bindings
            .iter()
            .enumerate()
            .map(|(slot, &binding)| BufferSlot {
                storage: storage.clone(),
                slot,
                binding,
            })
            .collect();

        Ok((
            Self {
                storage,
                bindings: bindings.to_vec(),
            },
            slots,
        ))
    }

    /// Frames per period
    pub fn period(&self) -> usize {
        self.storage.period()
    }

    /// Bindings in slot order
    pub fn bindings(&self) -> &[ChannelBinding] {
        &self.bindings
    }

    /// Whether a (direction, index) pair is bound to a slot
    pub fn is_bound(&self, direction: Direction, index: usize) -> bool {
        self.bindings
            .iter()
            .any(|b| b.direction == direction && b.index == index)
    }

    pub(crate) fn storage(&self) -> Arc<BufferStorage> {
        self.storage.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DirectionProfile;

    fn stereo_profile() -> DeviceProfile {
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

    #[test]
    fn test_allocate_zero_initialized() {
        let profile = stereo_profile();
        let (_set, slots) =
            BufferSet::allocate(&profile, &[ChannelBinding::output(0)], 64).unwrap();
        let mut out = [1.0f32; 64];
        slots[0].read_half(0, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        slots[0].read_half(1, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_halves_are_independent() {
        let profile = stereo_profile();
        let (_set, slots) = BufferSet::allocate(&profile, &[ChannelBinding::input(0)], 4).unwrap();
        slots[0].write_half(0, &[1.0, 2.0, 3.0, 4.0]);
        let mut other = [9.0f32; 4];
        slots[0].read_half(1, &mut other);
        assert_eq!(other, [0.0; 4]);
        let mut same = [0.0f32; 4];
        slots[0].read_half(0, &mut same);
        assert_eq!(same, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_out_of_range_binding_rejected() {
        let profile = stereo_profile();
        let err = BufferSet::allocate(&profile, &[ChannelBinding::input(2)], 64).unwrap_err();
        match err {
            DriverError::ChannelOutOfRange {
                direction, index, ..
            } => {
                assert_eq!(direction, Direction::Input);
                assert_eq!(index, 2);
            }
            other => panic!("expected ChannelOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn test_boundary_binding_accepted() {
        let profile = stereo_profile();
        assert!(BufferSet::allocate(&profile, &[ChannelBinding::input(1)], 64).is_ok());
    }

    #[test]
    fn test_empty_bindings_rejected() {
        let profile = stereo_profile();
        assert!(matches!(
            BufferSet::allocate(&profile, &[], 64),
            Err(DriverError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_zero_period_rejected() {
        let profile = stereo_profile();
        assert!(matches!(
            BufferSet::allocate(&profile, &[ChannelBinding::input(0)], 0),
            Err(DriverError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_is_bound() {
        let profile = stereo_profile();
        let (set, _slots) = BufferSet::allocate(
            &profile,
            &[ChannelBinding::input(0), ChannelBinding::output(1)],
            32,
        )
        .unwrap();
        assert!(set.is_bound(Direction::Input, 0));
        assert!(set.is_bound(Direction::Output, 1));
        assert!(!set.is_bound(Direction::Output, 0));
        assert!(!set.is_bound(Direction::Input, 1));
    }
}
