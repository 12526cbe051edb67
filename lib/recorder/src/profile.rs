use crate::RecorderError;
use ffmpeg_next::{ChannelLayout, Dictionary, Rational, codec, encoder, format};

/// AAC consumes a fixed number of samples per compressed frame.
pub const AAC_FRAME_SIZE: usize = 1024;

/// Immutable description of the video stream, established at pipeline open.
#[derive(Debug, Clone)]
pub struct VideoProfile {
    pub codec: codec::Id,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: usize,
    pub gop: u32,
}

/// Immutable description of one encoded audio stream.
#[derive(Debug, Clone)]
pub struct AudioProfile {
    pub codec: codec::Id,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: usize,
    pub frame_size: usize,
}

impl AudioProfile {
    pub fn channel_layout(&self) -> ChannelLayout {
        match self.channels {
            1 => ChannelLayout::MONO,
            _ => ChannelLayout::STEREO,
        }
    }
}

/// Opens the video encoder described by the profile.
///
/// The software H.264 encoder is preferred by name, with a generic fallback
/// for builds that carry another implementation of the codec id.
pub fn open_video_encoder(profile: &VideoProfile) -> Result<encoder::Video, RecorderError> {
    ffmpeg_next::init()
        .map_err(|e| RecorderError::VideoEncoding(format!("ffmpeg init failed: {e}")))?;

    let codec = encoder::find_by_name("libx264")
        .filter(|_| profile.codec == codec::Id::H264)
        .or_else(|| encoder::find(profile.codec))
        .ok_or_else(|| {
            RecorderError::VideoEncoding(format!("encoder for {:?} not found", profile.codec))
        })?;

    let mut video = codec::Context::new_with_codec(codec)
        .encoder()
        .video()
        .map_err(|e| RecorderError::VideoEncoding(format!("encoder context failed: {e}")))?;

    video.set_width(profile.width);
    video.set_height(profile.height);
    video.set_format(format::Pixel::YUV420P);
    video.set_frame_rate(Some(Rational::new(profile.fps as i32, 1)));
    video.set_time_base(Rational::new(1, profile.fps as i32));
    video.set_bit_rate(profile.bitrate);
    video.set_gop(profile.gop);
    // The container carries the parameter sets, not the packets.
    video.set_flags(codec::Flags::GLOBAL_HEADER);

    let mut opts = Dictionary::new();
    opts.set("preset", "superfast");
    opts.set("tune", "zerolatency");

    video
        .open_with(opts)
        .map_err(|e| RecorderError::VideoEncoding(format!("encoder open failed: {e}")))
}

/// Opens one audio encoder: planar f32 input at the profile's rate and
/// layout.
pub fn open_audio_encoder(profile: &AudioProfile) -> Result<encoder::Audio, RecorderError> {
    ffmpeg_next::init()
        .map_err(|e| RecorderError::AudioEncoding(format!("ffmpeg init failed: {e}")))?;

    let codec = encoder::find(profile.codec).ok_or_else(|| {
        RecorderError::AudioEncoding(format!("encoder for {:?} not found", profile.codec))
    })?;

    let mut audio = codec::Context::new_with_codec(codec)
        .encoder()
        .audio()
        .map_err(|e| RecorderError::AudioEncoding(format!("encoder context failed: {e}")))?;

    audio.set_rate(profile.sample_rate as i32);
    audio.set_format(format::Sample::F32(format::sample::Type::Planar));
    audio.set_channel_layout(profile.channel_layout());
    audio.set_bit_rate(profile.bitrate);
    audio.set_time_base(Rational::new(1, profile.sample_rate as i32));
    audio.set_flags(codec::Flags::GLOBAL_HEADER);

    let opened = audio
        .open()
        .map_err(|e| RecorderError::AudioEncoding(format!("encoder open failed: {e}")))?;

    if opened.frame_size() as usize != profile.frame_size && opened.frame_size() != 0 {
        log::warn!(
            "encoder frame size {} differs from profile {}",
            opened.frame_size(),
            profile.frame_size
        );
    }

    Ok(opened)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_layout_by_count() {
        let mut profile = AudioProfile {
            codec: codec::Id::AAC,
            sample_rate: 48_000,
            channels: 1,
            bitrate: 128_000,
            frame_size: AAC_FRAME_SIZE,
        };
        assert_eq!(profile.channel_layout(), ChannelLayout::MONO);

        profile.channels = 2;
        assert_eq!(profile.channel_layout(), ChannelLayout::STEREO);
    }
}
