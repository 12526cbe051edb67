use crate::{
    AudioFifo, CropOffsets, MuxWriter, RecorderError, VideoRing, clock::video_packet_pts,
    profile::VideoProfile, video_ring::CanvasFrame,
};
use ffmpeg_next::{Packet, encoder, format::Pixel, frame, software::scaling};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

const IDLE_WAIT: Duration = Duration::from_millis(10);
const MAX_IDLE_ITERATIONS: u32 = 1000;
const MAX_ENCODE_FAILURES: u32 = 10;

/// Everything the video consumer needs, passed at construction.
pub struct VideoStage {
    pub ring: Arc<VideoRing>,
    pub mux: Arc<MuxWriter>,
    pub stream_index: usize,
    pub capture_active: Arc<AtomicBool>,
    pub mic_fifo: Option<Arc<AudioFifo>>,
    pub sys_fifo: Option<Arc<AudioFifo>>,
    pub profile: VideoProfile,
    pub crop: CropOffsets,
    pub encoder: encoder::Video,
}

/// Video consumer loop: pop a frame from the ring, crop, scale to the
/// encoder's YUV 4:2:0 target, encode and submit.
///
/// Runs while capture is active or the ring or an audio FIFO still holds
/// data, then flushes the encoder. The scale context is built lazily on the
/// first frame and rebuilt when a hot-plug changes the canvas size.
pub fn run_video_stage(mut stage: VideoStage) -> Result<(), RecorderError> {
    let time_base = stage.mux.stream_time_base(stage.stream_index);
    let tb_den = time_base.denominator();

    let mut scaler: Option<(u32, u32, scaling::Context)> = None;
    let mut first_timestamp_us: Option<i64> = None;
    let mut frame_index: i64 = 0;
    let mut pending_pts: VecDeque<i64> = VecDeque::new();
    let mut idle: u32 = 0;
    let mut failures: u32 = 0;
    let mut encoded: u64 = 0;

    loop {
        let Some(canvas) = stage.ring.pop() else {
            let audio_pending = stage
                .mic_fifo
                .as_deref()
                .is_some_and(|fifo| !fifo.is_empty())
                || stage
                    .sys_fifo
                    .as_deref()
                    .is_some_and(|fifo| !fifo.is_empty());

            if !stage.capture_active.load(Ordering::Relaxed)
                && stage.ring.is_empty()
                && !audio_pending
            {
                break;
            }

            idle += 1;
            if idle >= MAX_IDLE_ITERATIONS {
                idle = 0;
                log::debug!("video stage idle, ring empty");
            }
            thread::sleep(IDLE_WAIT);
            continue;
        };
        idle = 0;

        let rgba = match crop_to_frame(&canvas, stage.crop) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("dropping frame {}: {e}", canvas.index);
                stage.ring.recycle(canvas);
                continue;
            }
        };

        // (Re)build the scaler when the source geometry changes.
        let (src_w, src_h) = (rgba.width(), rgba.height());
        if !matches!(&scaler, Some((w, h, _)) if *w == src_w && *h == src_h) {
            let ctx = scaling::Context::get(
                Pixel::RGBA,
                src_w,
                src_h,
                Pixel::YUV420P,
                stage.profile.width,
                stage.profile.height,
                scaling::Flags::BICUBIC,
            )
            .map_err(|e| RecorderError::VideoEncoding(format!("scaler setup: {e}")))?;
            scaler = Some((src_w, src_h, ctx));
        }
        let (_, _, ctx) = scaler.as_mut().expect("scaler was just built");

        let mut yuv = frame::Video::new(Pixel::YUV420P, stage.profile.width, stage.profile.height);
        if let Err(e) = ctx.run(&rgba, &mut yuv) {
            log::warn!("scaling frame {} failed: {e}", canvas.index);
            stage.ring.recycle(canvas);
            continue;
        }

        let t0 = *first_timestamp_us.get_or_insert(canvas.timestamp_us);
        pending_pts.push_back(video_packet_pts(canvas.timestamp_us, t0, tb_den));

        yuv.set_pts(Some(frame_index));
        frame_index += 1;

        stage.ring.recycle(canvas);

        match stage.encoder.send_frame(&yuv) {
            Ok(()) => failures = 0,
            Err(e) => {
                pending_pts.pop_back();
                failures += 1;
                log::warn!("video frame rejected by encoder: {e}");
                if failures >= MAX_ENCODE_FAILURES {
                    return Err(RecorderError::VideoEncoding(format!(
                        "encoder failed {failures} times in a row: {e}"
                    )));
                }
                continue;
            }
        }

        encoded += drain_packets(
            &mut stage.encoder,
            &stage.mux,
            stage.stream_index,
            stage.profile.fps,
            &mut pending_pts,
            tb_den,
        )?;
    }

    if let Err(e) = stage.encoder.send_eof() {
        log::warn!("video encoder eof failed: {e}");
    }
    encoded += drain_packets(
        &mut stage.encoder,
        &stage.mux,
        stage.stream_index,
        stage.profile.fps,
        &mut pending_pts,
        tb_den,
    )?;

    let stats = stage.ring.stats();
    log::info!(
        "video stage exit: {encoded} packets, {} frames appended, {} dropped",
        stats.appended,
        stats.dropped
    );

    Ok(())
}

fn drain_packets(
    encoder: &mut encoder::Video,
    mux: &MuxWriter,
    stream_index: usize,
    fps: u32,
    pending_pts: &mut VecDeque<i64>,
    tb_den: i32,
) -> Result<u64, RecorderError> {
    let mut written = 0;

    loop {
        let mut packet = Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                // Packets come out in submission order (no B-frames), so the
                // queued stream timestamps apply one to one.
                let pts = pending_pts.pop_front().unwrap_or_default();

                packet.set_stream(stream_index);
                packet.set_pts(Some(pts));
                packet.set_dts(Some(pts));
                packet.set_duration(i64::from(tb_den) / i64::from(fps.max(1)));

                mux.write_packet(&mut packet)?;
                written += 1;
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == 11 => break,
            Err(ffmpeg_next::Error::Eof) => break,
            Err(e) => {
                return Err(RecorderError::VideoEncoding(format!(
                    "receive video packet: {e}"
                )));
            }
        }
    }

    Ok(written)
}

/// Copies the cropped region of a canvas frame into an RGBA frame, honouring
/// the canvas stride and the destination's own line padding.
fn crop_to_frame(canvas: &CanvasFrame, crop: CropOffsets) -> Result<frame::Video, RecorderError> {
    let width = canvas
        .width
        .checked_sub(crop.left + crop.right)
        .filter(|w| *w > 0)
        .ok_or_else(|| {
            RecorderError::InvalidConfig(format!(
                "crop {crop:?} leaves no width of {}",
                canvas.width
            ))
        })?;
    let height = canvas
        .height
        .checked_sub(crop.top + crop.bottom)
        .filter(|h| *h > 0)
        .ok_or_else(|| {
            RecorderError::InvalidConfig(format!(
                "crop {crop:?} leaves no height of {}",
                canvas.height
            ))
        })?;

    let mut rgba = frame::Video::new(Pixel::RGBA, width, height);
    let dst_stride = rgba.stride(0);
    let src_stride = canvas.stride as usize;
    let row_bytes = width as usize * 4;
    let left_bytes = crop.left as usize * 4;
    let data = canvas.data();

    let dst = rgba.data_mut(0);
    for row in 0..height as usize {
        let src_offset = (row + crop.top as usize) * src_stride + left_bytes;
        dst[row * dst_stride..row * dst_stride + row_bytes]
            .copy_from_slice(&data[src_offset..src_offset + row_bytes]);
    }

    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(width: u32, height: u32) -> CanvasFrame {
        let ring = VideoRing::with_capacity(1, (width * height * 4) as usize);
        let mut bytes = Vec::new();
        for y in 0..height {
            for x in 0..width {
                bytes.extend_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
        ring.append(&bytes, width, height, width * 4, 0);
        ring.pop().unwrap()
    }

    #[test]
    fn test_crop_offsets_select_region() {
        let frame = canvas(8, 6);
        let crop = CropOffsets {
            left: 2,
            top: 1,
            right: 3,
            bottom: 2,
        };

        let rgba = crop_to_frame(&frame, crop).unwrap();
        assert_eq!((rgba.width(), rgba.height()), (3, 3));

        // Top-left pixel of the crop is canvas pixel (2, 1).
        let stride = rgba.stride(0);
        assert_eq!(rgba.data(0)[0], 2);
        assert_eq!(rgba.data(0)[1], 1);
        // Bottom-right is canvas pixel (4, 3).
        let last = 2 * stride + 2 * 4;
        assert_eq!(rgba.data(0)[last], 4);
        assert_eq!(rgba.data(0)[last + 1], 3);
    }

    #[test]
    fn test_overlarge_crop_is_rejected() {
        let frame = canvas(4, 4);
        let crop = CropOffsets {
            left: 2,
            top: 0,
            right: 2,
            bottom: 0,
        };
        assert!(crop_to_frame(&frame, crop).is_err());
    }
}
