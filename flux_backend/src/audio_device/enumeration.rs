use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};

use super::sink::{SinkError, SinkResult};

// Rates reported when a device supports a continuous range
const COMMON_SAMPLE_RATES: [u32; 7] = [22_050, 32_000, 44_100, 48_000, 88_200, 96_000, 192_000];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub host: String,
    pub is_default: bool,
    pub default_sample_rate: u32,
    pub default_channels: u16,
    pub min_sample_rate: u32,
    pub max_sample_rate: u32,
    pub supported_sample_rates: Vec<u32>,
}

impl OutputDeviceInfo {
    pub fn supports_sample_rate(&self, rate: u32) -> bool {
        rate >= self.min_sample_rate && rate <= self.max_sample_rate
    }
}

impl fmt::Display for OutputDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}ch @ {}Hz, {}]{}",
            self.name,
            self.default_channels,
            self.default_sample_rate,
            self.host,
            if self.is_default { " (default)" } else { "" }
        )
    }
}

/// Output devices of every available host. Devices that cannot be queried
/// are skipped.
pub fn list_output_devices() -> SinkResult<Vec<OutputDeviceInfo>> {
    let default_host_id = cpal::default_host().id();
    let mut devices = Vec::new();

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        let Ok(outputs) = host.output_devices() else {
            continue;
        };

        for device in outputs {
            let is_default =
                host_id == default_host_id && device.name().ok() == default_name;
            match query_output_device(&device, host_id.name(), is_default) {
                Ok(info) => devices.push(info),
                Err(e) => tracing::debug!(error = %e, "skipping output device"),
            }
        }
    }

    if devices.is_empty() {
        return Err(SinkError::Device("no output devices found".to_string()));
    }
    Ok(devices)
}

/// The named output device of the default host (case-insensitive, exact match
/// first, then substring), or the default output device.
pub(crate) fn find_output_device(name: Option<&str>) -> SinkResult<cpal::Device> {
    let host = cpal::default_host();
    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| SinkError::Open("no default output device".to_string()));
    };

    let wanted = name.to_lowercase();
    let mut devices: Vec<(String, cpal::Device)> = host
        .output_devices()
        .map_err(|e| SinkError::Open(format!("failed to list output devices: {e}")))?
        .filter_map(|d| d.name().ok().map(|n| (n.to_lowercase(), d)))
        .collect();

    let index = devices
        .iter()
        .position(|(n, _)| *n == wanted)
        .or_else(|| devices.iter().position(|(n, _)| n.contains(&wanted)))
        .ok_or_else(|| SinkError::Open(format!("output device not found: {name}")))?;
    Ok(devices.swap_remove(index).1)
}

fn query_output_device(
    device: &cpal::Device,
    host: &str,
    is_default: bool,
) -> SinkResult<OutputDeviceInfo> {
    let name = device
        .name()
        .map_err(|e| SinkError::Device(format!("failed to get device name: {e}")))?;
    let default_config = device
        .default_output_config()
        .map_err(|e| SinkError::Device(format!("failed to get default config: {e}")))?;

    let mut min_sample_rate = u32::MAX;
    let mut max_sample_rate = 0;
    let mut supported_sample_rates = Vec::new();
    let configs = device
        .supported_output_configs()
        .map_err(|e| SinkError::Device(format!("failed to get supported configs: {e}")))?;
    for range in configs {
        let lo = range.min_sample_rate().0;
        let hi = range.max_sample_rate().0;
        min_sample_rate = min_sample_rate.min(lo);
        max_sample_rate = max_sample_rate.max(hi);
        supported_sample_rates.extend(COMMON_SAMPLE_RATES.iter().filter(|r| (lo..=hi).contains(*r)));
    }
    supported_sample_rates.sort_unstable();
    supported_sample_rates.dedup();

    Ok(OutputDeviceInfo {
        name,
        host: host.to_string(),
        is_default,
        default_sample_rate: default_config.sample_rate().0,
        default_channels: default_config.channels(),
        min_sample_rate,
        max_sample_rate,
        supported_sample_rates,
    })
}
