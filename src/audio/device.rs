//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;
use crate::protocol::AudioDeviceInfo;

/// Sample rates probed when reporting device capabilities
const COMMON_SAMPLE_RATES: [u32; 6] = [16_000, 22_050, 44_100, 48_000, 88_200, 96_000];

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// List all available audio devices on the default host
///
/// A device that can both record and play appears once with both channel
/// counts filled in.
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            let (channels, rates) = capabilities(&device, Direction::Input);
            devices.push(AudioDeviceInfo {
                id: name.clone(),
                is_default_input: default_input_name.as_ref() == Some(&name),
                is_default_output: false,
                name,
                input_channels: channels,
                output_channels: 0,
                sample_rates: rates,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            let (channels, rates) = capabilities(&device, Direction::Output);
            let is_default = default_output_name.as_ref() == Some(&name);

            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.output_channels = channels;
                existing.is_default_output = is_default;
                for rate in rates {
                    if !existing.sample_rates.contains(&rate) {
                        existing.sample_rates.push(rate);
                    }
                }
                existing.sample_rates.sort_unstable();
            } else {
                devices.push(AudioDeviceInfo {
                    id: name.clone(),
                    is_default_input: false,
                    is_default_output: is_default,
                    name,
                    input_channels: 0,
                    output_channels: channels,
                    sample_rates: rates,
                });
            }
        }
    }

    devices
}

/// Maximum channel count and supported common sample rates
fn capabilities(device: &cpal::Device, direction: Direction) -> (u16, Vec<u32>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
        Direction::Output => device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
    };

    let mut max_channels = 0u16;
    let mut rates = Vec::new();
    for config in &configs {
        max_channels = max_channels.max(config.channels());
        for rate in COMMON_SAMPLE_RATES {
            let sr = cpal::SampleRate(rate);
            if sr >= config.min_sample_rate() && sr <= config.max_sample_rate() && !rates.contains(&rate) {
                rates.push(rate);
            }
        }
    }
    rates.sort_unstable();

    (max_channels, rates)
}

/// Find a device by name, or the host default when `name` is `None`
pub fn find_device(name: Option<&str>, direction: Direction) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device.ok_or_else(|| {
            AudioError::DeviceNotFound(format!("no default {:?} device", direction).to_lowercase())
        });
    };

    let devices: Vec<cpal::Device> = match direction {
        Direction::Input => host.input_devices()?.collect(),
        Direction::Output => host.output_devices()?.collect(),
    };

    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}
