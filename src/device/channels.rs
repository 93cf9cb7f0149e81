//! Channel-position bitmask handling and label prettification
//!
//! The driver protocol describes a channel layout as a bit-per-speaker
//! bitmask ordered by significance: the n'th bound channel plays the role of
//! the n'th set bit, scanning upward from bit 0.

use tracing::debug;

use crate::audio::Direction;

/// Ordered speaker-position table: (mask bit, pretty label)
pub const SPEAKER_POSITIONS: &[(u32, &str)] = &[
    (0x0000_0001, "FL (Front Left)"),
    (0x0000_0002, "FR (Front Right)"),
    (0x0000_0004, "FC (Front Center)"),
    (0x0000_0008, "LFE (Low Frequency)"),
    (0x0000_0010, "BL (Back Left)"),
    (0x0000_0020, "BR (Back Right)"),
    (0x0000_0040, "FCL (Front Left Center)"),
    (0x0000_0080, "FCR (Front Right Center)"),
    (0x0000_0100, "BC (Back Center)"),
    (0x0000_0200, "SL (Side Left)"),
    (0x0000_0400, "SR (Side Right)"),
    (0x0000_0800, "TC (Top Center)"),
    (0x0000_1000, "TFL (Top Front Left)"),
    (0x0000_2000, "TFC (Top Front Center)"),
    (0x0000_4000, "TFR (Top Front Right)"),
    (0x0000_8000, "TBL (Top Back Left)"),
    (0x0001_0000, "TBC (Top Back Center)"),
    (0x0002_0000, "TBR (Top Back Right)"),
];

/// Find the mask bit corresponding to logical channel `index`
///
/// Scans the mask's set bits in ascending significance until the index'th
/// one is found. Returns `None` when the index falls outside all set bits.
pub fn position_bit(mask: u32, index: usize) -> Option<u32> {
    let mut seen = 0;
    for bit in 0..32 {
        let speaker = 1u32 << bit;
        if mask & speaker != 0 {
            if seen == index {
                return Some(speaker);
            }
            seen += 1;
        }
    }
    None
}

/// Pretty label for a single speaker-position bit
pub fn position_label(bit: u32) -> Option<&'static str> {
    SPEAKER_POSITIONS
        .iter()
        .find(|(speaker, _)| *speaker == bit)
        .map(|(_, label)| *label)
}

/// Human-readable label for a channel: direction prefix, index, and the
/// speaker position resolved from the mask when one exists
pub fn channel_label(direction: Direction, index: usize, mask: u32) -> String {
    let prefix = direction.label_prefix();
    match position_bit(mask, index) {
        Some(bit) => match position_label(bit) {
            Some(pretty) => format!("{} {} {}", prefix, index, pretty),
            None => {
                debug!("Speaker bit {:#x} is unknown", bit);
                format!("{} {}", prefix, index)
            }
        },
        None => {
            if mask != 0 {
                debug!("Channel {} is outside channel mask {:#x}", index, mask);
            }
            format!("{} {}", prefix, index)
        }
    }
}

/// Standard layout mask for a plain channel count, for backends that report
/// counts but no positions (mono, stereo, 5.1, 7.1)
pub fn standard_mask(channels: usize) -> u32 {
    match channels {
        1 => 0x4,           // FC
        2 => 0x3,           // FL FR
        6 => 0x3F,          // FL FR FC LFE BL BR
        8 => 0x63F,         // 5.1 + SL SR
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_bit_scans_ascending() {
        // Stereo mask: FL | FR
        assert_eq!(position_bit(0x3, 0), Some(0x1));
        assert_eq!(position_bit(0x3, 1), Some(0x2));
        assert_eq!(position_bit(0x3, 2), None);
    }

    #[test]
    fn test_position_bit_skips_cleared_bits() {
        // FC | SL: index 1 must land on SL, not on the gap
        assert_eq!(position_bit(0x204, 0), Some(0x4));
        assert_eq!(position_bit(0x204, 1), Some(0x200));
    }

    #[test]
    fn test_channel_label_with_position() {
        let label = channel_label(Direction::Input, 1, 0x3);
        assert_eq!(label, "IN 1 FR (Front Right)");
    }

    #[test]
    fn test_channel_label_outside_mask() {
        let label = channel_label(Direction::Output, 5, 0x3);
        assert_eq!(label, "OUT 5");
    }

    #[test]
    fn test_channel_label_unknown_mask() {
        let label = channel_label(Direction::Output, 0, 0);
        assert_eq!(label, "OUT 0");
    }

    #[test]
    fn test_standard_masks_cover_positions() {
        for &channels in &[1usize, 2, 6, 8] {
            let mask = standard_mask(channels);
            for index in 0..channels {
                assert!(position_bit(mask, index).is_some());
            }
            assert!(position_bit(mask, channels).is_none());
        }
        assert_eq!(standard_mask(3), 0);
    }
}
