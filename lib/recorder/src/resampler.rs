use crate::RecorderError;
use audio_capture::AudioSpec;
use ffmpeg_next::{
    ChannelLayout,
    format::{Sample, sample::Type},
    frame,
    software::resampling,
};

/// Per-device conversion from the capture layout to the encoder layout.
///
/// Only the sample format and channel layout may differ; source and sink
/// sample rates must already match, a mismatch is a configuration error for
/// that channel.
pub struct AudioResampler {
    ctx: resampling::Context,
    src_channels: usize,
    src_rate: u32,
    dst_channels: usize,
    dst_layout: ChannelLayout,
}

impl AudioResampler {
    pub fn new(
        src: AudioSpec,
        dst_rate: u32,
        dst_channels: u16,
    ) -> Result<Self, RecorderError> {
        if src.sample_rate != dst_rate {
            return Err(RecorderError::AudioStreamConfig(format!(
                "device rate {} Hz does not match encoder rate {} Hz",
                src.sample_rate, dst_rate
            )));
        }

        let src_layout = ChannelLayout::default(i32::from(src.channels));
        let dst_layout = ChannelLayout::default(i32::from(dst_channels));

        let ctx = resampling::Context::get(
            Sample::F32(Type::Packed),
            src_layout,
            src.sample_rate,
            Sample::F32(Type::Packed),
            dst_layout,
            dst_rate,
        )
        .map_err(|e| RecorderError::AudioStreamConfig(format!("resampler setup failed: {e}")))?;

        Ok(Self {
            ctx,
            src_channels: usize::from(src.channels),
            src_rate: src.sample_rate,
            dst_channels: usize::from(dst_channels),
            dst_layout,
        })
    }

    /// Converts one interleaved block into the encoder layout, still
    /// interleaved f32.
    pub fn convert(&mut self, block: &[f32]) -> Result<Vec<f32>, RecorderError> {
        let samples = block.len() / self.src_channels;
        if samples == 0 {
            return Ok(Vec::new());
        }

        let mut input = frame::Audio::new(
            Sample::F32(Type::Packed),
            samples,
            ChannelLayout::default(self.src_channels as i32),
        );
        input.set_rate(self.src_rate);
        write_packed_f32(&mut input, &block[..samples * self.src_channels]);

        let mut output = frame::Audio::new(Sample::F32(Type::Packed), samples, self.dst_layout);
        output.set_rate(self.src_rate);

        self.ctx
            .run(&input, &mut output)
            .map_err(|e| RecorderError::AudioStreamConfig(format!("conversion failed: {e}")))?;

        Ok(read_packed_f32(&output, samples * self.dst_channels))
    }

    pub fn dst_channels(&self) -> usize {
        self.dst_channels
    }
}

/// Fills a packed-f32 frame's single data plane from an interleaved slice.
pub(crate) fn write_packed_f32(frame: &mut frame::Audio, values: &[f32]) {
    let data = frame.data_mut(0);
    for (i, value) in values.iter().enumerate() {
        data[i * 4..i * 4 + 4].copy_from_slice(&value.to_ne_bytes());
    }
}

/// Reads `count` interleaved f32 values out of a packed frame.
pub(crate) fn read_packed_f32(frame: &frame::Audio, count: usize) -> Vec<f32> {
    frame.data(0)[..count * 4]
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Builds a planar-f32 frame from interleaved values, the layout the audio
/// encoders consume.
pub(crate) fn planar_frame(
    interleaved: &[f32],
    samples: usize,
    channels: usize,
    layout: ChannelLayout,
    rate: u32,
) -> frame::Audio {
    let mut frame = frame::Audio::new(Sample::F32(Type::Planar), samples, layout);
    frame.set_rate(rate);

    for ch in 0..channels {
        let plane = frame.data_mut(ch);
        for i in 0..samples {
            let value = interleaved[i * channels + ch];
            plane[i * 4..i * 4 + 4].copy_from_slice(&value.to_ne_bytes());
        }
    }

    frame
}
