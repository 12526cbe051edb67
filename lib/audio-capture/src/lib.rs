//! Audio device capture for the recording pipeline.
//!
//! Microphone and system (loopback/monitor) sources are both plain named
//! input devices here; each enabled device gets its own
//! [`AudioCaptureStage`] delivering blocks of interleaved f32 PCM over a
//! bounded channel.

mod device;
mod error;
mod stage;

pub use device::{AudioDeviceInfo, AudioSpec, device_spec, input_devices};
pub use error::AudioCaptureError;
pub use stage::AudioCaptureStage;
