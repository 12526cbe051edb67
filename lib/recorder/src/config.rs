use derive_setters::Setters;
use ffmpeg_next::codec;
use std::path::{Path, PathBuf};

/// Output container, selected by the file extension of the output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    Mkv,
}

impl ContainerFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("mkv") => Self::Mkv,
            _ => Self::Mp4,
        }
    }
}

/// Pixels removed from each edge of the canvas before scaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropOffsets {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Configuration for one recording session.
///
/// Built with [`RecorderConfig::new`] and customised through the `with_`
/// setters:
///
/// ```no_run
/// use recorder::RecorderConfig;
///
/// let config = RecorderConfig::new("capture.mkv")
///     .with_fps(30)
///     .with_mic_device(Some("default".to_string()))
///     .with_sys_device(Some("monitor".to_string()));
/// ```
#[derive(Clone, Setters)]
#[setters(prefix = "with_")]
pub struct RecorderConfig {
    #[setters(skip)]
    pub output_path: PathBuf,

    /// Target frame rate of the produced video
    pub fps: u32,

    pub video_codec: codec::Id,
    pub audio_codec: codec::Id,

    /// Video bitrate in bits per second
    pub video_bitrate: usize,

    /// Audio bitrate in bits per second, per encoded stream
    pub audio_bitrate: usize,

    /// Keyframe interval in frames
    pub gop: u32,

    /// Microphone device name; `None` disables the channel
    pub mic_device: Option<String>,

    /// System/loopback device name; `None` disables the channel
    pub sys_device: Option<String>,

    /// Mix microphone and system audio into a single stream when both
    /// devices are open
    pub mix_audio: bool,

    pub include_cursor: bool,

    pub crop: CropOffsets,
}

impl RecorderConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            fps: 25,
            video_codec: codec::Id::H264,
            audio_codec: codec::Id::AAC,
            video_bitrate: 4_000_000,
            audio_bitrate: 128_000,
            gop: 25,
            mic_device: None,
            sys_device: None,
            mix_audio: true,
            include_cursor: true,
            crop: CropOffsets::default(),
        }
    }

    pub fn container(&self) -> ContainerFormat {
        ContainerFormat::from_path(&self.output_path)
    }

    /// Pacing period of the video producer thread.
    pub fn frame_interval_ms(&self) -> u64 {
        1000 / u64::from(self.fps.max(1)) + 1
    }

    pub fn validate(&self) -> Result<(), crate::RecorderError> {
        if self.fps == 0 || self.fps > 240 {
            return Err(crate::RecorderError::InvalidConfig(format!(
                "fps {} out of range",
                self.fps
            )));
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(crate::RecorderError::InvalidConfig(
                "output path is empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_from_extension() {
        assert_eq!(
            ContainerFormat::from_path(Path::new("out.mp4")),
            ContainerFormat::Mp4
        );
        assert_eq!(
            ContainerFormat::from_path(Path::new("out.MKV")),
            ContainerFormat::Mkv
        );
        // Unknown extensions fall back to MP4.
        assert_eq!(
            ContainerFormat::from_path(Path::new("out")),
            ContainerFormat::Mp4
        );
    }

    #[test]
    fn test_frame_interval() {
        let config = RecorderConfig::new("out.mp4").with_fps(25);
        assert_eq!(config.frame_interval_ms(), 41);

        let config = config.with_fps(60);
        assert_eq!(config.frame_interval_ms(), 17);
    }

    #[test]
    fn test_validate_rejects_zero_fps() {
        let config = RecorderConfig::new("out.mp4").with_fps(0);
        assert!(config.validate().is_err());
    }
}
