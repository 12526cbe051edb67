#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Screen capture failed: {0}")]
    Capture(#[from] wayland_capture::CaptureError),

    #[error("Audio device failed: {0}")]
    AudioDevice(#[from] audio_capture::AudioCaptureError),

    #[error("Audio stream configuration invalid: {0}")]
    AudioStreamConfig(String),

    #[error("Audio FIFO overflow: {0}")]
    AudioOverflow(String),

    #[error("Video encoding failed: {0}")]
    VideoEncoding(String),

    #[error("Audio encoding failed: {0}")]
    AudioEncoding(String),

    #[error("Container writing failed: {0}")]
    Mux(String),

    #[error("Invalid configuration parameters: {0}")]
    InvalidConfig(String),

    #[error("File operation failed: {0}")]
    FileOperation(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl RecorderError {
    /// Faults that tear the whole pipeline down, as opposed to per-channel
    /// failures the recording survives.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Mux(_) | Self::FileOperation(_))
    }
}
