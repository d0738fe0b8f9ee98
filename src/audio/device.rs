//! Device enumeration and selection. Used only while setting up a session.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use tracing::debug;

use crate::error::{MixerError, MixerResult};

/// Device names tried, in order, when looking for a loopback capture source
pub const LOOPBACK_HINTS: [&str; 2] = ["CABLE Output", "Stereo Mix"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Position in the host's device list
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: Option<u32>,
}

impl DeviceInfo {
    pub fn marker(&self) -> &'static str {
        match (self.max_input_channels > 0, self.max_output_channels > 0) {
            (true, true) => " [IN/OUT]",
            (true, false) => " [INPUT]",
            (false, true) => " [OUTPUT]",
            (false, false) => "",
        }
    }

    pub fn is_stereo_input(&self) -> bool {
        self.max_input_channels >= 2
    }

    pub fn is_stereo_output(&self) -> bool {
        self.max_output_channels >= 2
    }
}

/// Enumerate every device the host exposes, with its default channel counts
pub fn list_devices(host: &Host) -> MixerResult<Vec<DeviceInfo>> {
    let devices = host
        .devices()
        .map_err(|e| MixerError::Devices(e.to_string()))?;

    let infos: Vec<DeviceInfo> = devices
        .enumerate()
        .map(|(index, device)| describe(index, &device))
        .collect();

    debug!("Enumerated {} audio devices", infos.len());
    Ok(infos)
}

fn describe(index: usize, device: &Device) -> DeviceInfo {
    let input = device.default_input_config().ok();
    let output = device.default_output_config().ok();
    DeviceInfo {
        index,
        name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
        max_input_channels: input.as_ref().map_or(0, |c| c.channels()),
        max_output_channels: output.as_ref().map_or(0, |c| c.channels()),
        default_sample_rate: output
            .as_ref()
            .or(input.as_ref())
            .map(|c| c.sample_rate().0),
    }
}

/// First stereo-capable device whose name matches a loopback hint, honoring
/// hint order
pub fn find_loopback_input(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    LOOPBACK_HINTS.iter().find_map(|hint| {
        devices
            .iter()
            .find(|d| d.is_stereo_input() && d.name.contains(hint))
    })
}

/// Devices offered in the numbered output menu
pub fn output_candidates(devices: &[DeviceInfo]) -> Vec<&DeviceInfo> {
    devices.iter().filter(|d| d.is_stereo_output()).collect()
}

/// Resolve a menu answer to an output device; anything unparseable or out of
/// range means "use the default"
pub fn choose_output<'a>(candidates: &[&'a DeviceInfo], answer: &str) -> Option<&'a DeviceInfo> {
    answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|choice| candidates.get(choice).copied())
}

pub fn find_input_device(host: &Host, name: &str) -> MixerResult<Device> {
    host.input_devices()
        .map_err(|e| MixerError::Devices(e.to_string()))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| MixerError::DeviceNotFound(name.to_string()))
}

pub fn find_output_device(host: &Host, name: &str) -> MixerResult<Device> {
    host.output_devices()
        .map_err(|e| MixerError::Devices(e.to_string()))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| MixerError::DeviceNotFound(name.to_string()))
}

pub fn default_input_device(host: &Host) -> MixerResult<Device> {
    host.default_input_device()
        .ok_or(MixerError::NoDevice("input"))
}

pub fn default_output_device(host: &Host) -> MixerResult<Device> {
    host.default_output_device()
        .ok_or(MixerError::NoDevice("output"))
}
