//! Device and format negotiation against the selected backend API

use tracing::{debug, info, warn};

use crate::audio::Direction;
use crate::backend::AudioBackend;
use crate::device::{DeviceProfile, DirectionProfile};
use crate::error::{DriverError, Result};

/// Sample rate used when neither direction has a device-reported default
const FALLBACK_SAMPLE_RATE: f64 = 44100.0;

/// Resolve default devices, channel counts, masks, and a working sample rate
///
/// For each direction with a default device the generic descriptor supplies
/// name, channel count and default rate; when the backend exposes extended
/// default-format information (true channel count plus channel-position
/// bitmask) it supersedes the generic count. The working rate is the maximum
/// of the per-direction defaults, falling back to 44100 Hz.
pub fn negotiate(backend: &dyn AudioBackend) -> Result<DeviceProfile> {
    info!("Negotiating against backend API '{}'", backend.api_name());

    let input = resolve_direction(backend, Direction::Input);
    let output = resolve_direction(backend, Direction::Output);

    if input.is_none() && output.is_none() {
        warn!("No default input or output device on this backend");
        return Err(DriverError::BackendUnavailable(
            "no default input or output device".to_string(),
        ));
    }

    let mut sample_rate: f64 = 0.0;
    for direction in [&input, &output].into_iter().flatten() {
        sample_rate = sample_rate.max(direction.1);
    }
    if sample_rate <= 0.0 {
        sample_rate = FALLBACK_SAMPLE_RATE;
        debug!("No device-reported default rate, using {} Hz", sample_rate);
    }

    let profile = DeviceProfile {
        input: input.map(|(profile, _)| profile),
        output: output.map(|(profile, _)| profile),
        sample_rate,
    };

    info!(
        "Negotiated {} input / {} output channels at {} Hz",
        profile.channels(Direction::Input),
        profile.channels(Direction::Output),
        profile.sample_rate
    );
    Ok(profile)
}

/// Resolve one direction; returns the profile and the device's default rate
fn resolve_direction(
    backend: &dyn AudioBackend,
    direction: Direction,
) -> Option<(DirectionProfile, f64)> {
    let descriptor = match backend.default_device(direction) {
        Some(descriptor) => descriptor,
        None => {
            debug!("No default {} device", direction);
            return None;
        }
    };
    info!("Selected {} device: {}", direction, descriptor.name);

    let mut channels = descriptor.max_channels;
    let mut mask = 0;
    match backend.default_format(direction) {
        Some(format) => {
            channels = format.channels;
            mask = format.mask;
            debug!(
                "Extended {} format: {} channels, mask {:#x}",
                direction, channels, mask
            );
        }
        None => debug!("No extended default format for {} device", direction),
    }

    Some((
        DirectionProfile {
            device_name: descriptor.name,
            channels,
            mask,
            default_low_latency: descriptor.default_low_latency,
        },
        descriptor.default_sample_rate,
    ))
}
