use crate::AudioCaptureError;
use cpal::{
    Device, SampleFormat, StreamConfig,
    traits::{DeviceTrait, HostTrait},
};

/// PCM layout a device delivers: interleaved f32 at this rate and channel
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub default_config: Option<StreamConfig>,
    pub supported_formats: Vec<SampleFormat>,
}

/// Enumerates the host's input devices. Loopback/monitor sources show up as
/// regular input devices and are selected by name like any other.
pub fn input_devices() -> Result<Vec<AudioDeviceInfo>, AudioCaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioCaptureError::Host(e.to_string()))?;

    let mut infos = Vec::new();
    for device in devices {
        if let Ok(info) = device_info(&device) {
            infos.push(info);
        }
    }

    Ok(infos)
}

pub(crate) fn find_device(name: &str) -> Result<Device, AudioCaptureError> {
    let host = cpal::default_host();
    host.input_devices()
        .map_err(|e| AudioCaptureError::Host(e.to_string()))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| AudioCaptureError::Device(format!("no found device `{name}`")))
}

/// Resolves the stream layout a named device will capture with.
pub fn device_spec(name: &str) -> Result<AudioSpec, AudioCaptureError> {
    let device = find_device(name)?;
    let config = device
        .default_input_config()
        .map_err(|e| AudioCaptureError::Device(e.to_string()))?
        .config();

    Ok(AudioSpec {
        sample_rate: config.sample_rate,
        channels: config.channels,
    })
}

fn device_info(device: &Device) -> Result<AudioDeviceInfo, AudioCaptureError> {
    let name = device
        .name()
        .map_err(|e| AudioCaptureError::Device(e.to_string()))?;

    let default_config = device
        .default_input_config()
        .map(|config| config.config())
        .ok();

    let supported_formats = device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.sample_format()).collect())
        .unwrap_or_default();

    Ok(AudioDeviceInfo {
        name,
        default_config,
        supported_formats,
    })
}
