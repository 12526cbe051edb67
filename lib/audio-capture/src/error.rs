#[derive(Debug, thiserror::Error)]
pub enum AudioCaptureError {
    #[error("Audio host error: {0}")]
    Host(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),
}
