//! Output device discovery and stream configuration on top of cpal.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// One output device as shown by `deck --list-devices`.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"));
    };

    host.output_devices()
        .context("enumerate output devices")?
        .find(|d| {
            d.description()
                .map(|desc| name_matches(&desc.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("no output device matched: {needle}"))
}

/// Output devices of the default host.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    list_devices(&cpal::default_host())
}

/// Enumerate output devices, flagging the host default.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|desc| desc.to_string());
    let devices = host.output_devices().context("enumerate output devices")?;

    let mut out = Vec::new();
    for (index, device) in devices.enumerate() {
        let name = match device.description() {
            Ok(desc) => desc.to_string(),
            Err(e) => {
                tracing::warn!(index, "skipping output device without a name: {e}");
                continue;
            }
        };
        out.push(DeviceInfo {
            index,
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        });
    }
    Ok(out)
}

/// Choose an output config for a source at `source_rate`.
///
/// The source rate is used when a range supports it, so no resampling is needed; otherwise
/// the closest supported rate not above it wins, then the lowest one above it. Ties go to
/// the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    source_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in device
        .supported_output_configs()
        .context("query supported output configs")?
    {
        let rate = rate_in_range(range.min_sample_rate(), range.max_sample_rate(), source_rate);
        let candidate = Candidate {
            at_or_below: rate <= source_rate,
            rate,
            format_rank: format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.beats(b)) {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }
    match best {
        Some((_, config)) => Ok(config),
        None => device
            .default_output_config()
            .context("no supported output configs"),
    }
}

/// Largest fixed buffer the device allows, capped to keep latency bounded.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> cpal::BufferSize {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min))
        }
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    at_or_below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.at_or_below != other.at_or_below {
            return self.at_or_below;
        }
        if self.rate != other.rate {
            // Below the source, closer means higher; above it, closer means lower.
            return if self.at_or_below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            };
        }
        self.format_rank < other.format_rank
    }
}

fn rate_in_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn name_matches(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(at_or_below: bool, rate: u32, format_rank: u8) -> Candidate {
        Candidate {
            at_or_below,
            rate,
            format_rank,
        }
    }

    #[test]
    fn name_matches_is_case_insensitive() {
        assert!(name_matches("USB DAC", "dac"));
        assert!(name_matches("usb dac", " USB "));
        assert!(!name_matches("USB DAC", "speaker"));
        assert!(!name_matches("USB DAC", "   "));
    }

    #[test]
    fn rate_in_range_clamps_to_supported() {
        assert_eq!(rate_in_range(44_100, 96_000, 48_000), 48_000);
        assert_eq!(rate_in_range(44_100, 96_000, 22_050), 44_100);
        assert_eq!(rate_in_range(44_100, 96_000, 192_000), 96_000);
        assert_eq!(rate_in_range(48_000, 48_000, 44_100), 48_000);
    }

    #[test]
    fn candidate_prefers_rates_at_or_below_source() {
        assert!(candidate(true, 44_100, 3).beats(&candidate(false, 48_000, 0)));
        assert!(!candidate(false, 48_000, 0).beats(&candidate(true, 22_050, 3)));
    }

    #[test]
    fn candidate_prefers_closest_rate() {
        assert!(candidate(true, 48_000, 2).beats(&candidate(true, 44_100, 2)));
        assert!(candidate(false, 88_200, 2).beats(&candidate(false, 96_000, 2)));
    }

    #[test]
    fn candidate_breaks_ties_on_format() {
        assert!(candidate(true, 48_000, 0).beats(&candidate(true, 48_000, 2)));
        assert!(!candidate(true, 48_000, 2).beats(&candidate(true, 48_000, 2)));
    }
}
