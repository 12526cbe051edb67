use crate::{
    AudioClock, AudioFifo, ContainerFormat, MuxWriter, RecorderError, audio_packet_pts,
    profile::AudioProfile,
    resampler::{AudioResampler, planar_frame},
};
use audio_capture::AudioCaptureStage;
use crossbeam::channel::RecvTimeoutError;
use ffmpeg_next::{Packet, encoder};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

const RECV_WAIT: Duration = Duration::from_millis(10);
const IDLE_WAIT: Duration = Duration::from_millis(10);
const MAX_IDLE_ITERATIONS: u32 = 1000;
const MAX_ENCODE_FAILURES: u32 = 10;

/// Producer half of one audio channel: device blocks → resampler → FIFO.
///
/// Carries the conversion parameters rather than the converter itself; the
/// ffmpeg context is built on the intake thread and never crosses it.
pub struct AudioIntake {
    pub stage: AudioCaptureStage,
    pub dst_rate: u32,
    pub dst_channels: u16,
    pub fifo: Arc<AudioFifo>,
    pub clock: Arc<Mutex<AudioClock>>,
    pub capture_active: Arc<AtomicBool>,
    pub start: Instant,
}

/// Runs one device intake loop until capture stops and the channel drains.
///
/// Each block is converted to the encoder layout and appended to the FIFO in
/// pieces no larger than the writable space, so the bounded policy drops the
/// excess instead of stalling. The channel clock is updated per append with
/// the backlog that was queued in front of it.
pub fn run_audio_intake(mut intake: AudioIntake) -> Result<(), RecorderError> {
    let mut resampler =
        AudioResampler::new(intake.stage.spec(), intake.dst_rate, intake.dst_channels)?;
    let receiver = intake.stage.receiver();

    let result = loop {
        if !intake.capture_active.load(Ordering::Relaxed) {
            intake.stage.stop();
            // Drain whatever the device delivered before the stop.
            while let Ok(block) = receiver.try_recv() {
                let converted = resampler.convert(&block)?;
                write_in_pieces(&intake.fifo, &converted)?;
            }
            break Ok(());
        }

        match receiver.recv_timeout(RECV_WAIT) {
            Ok(block) => {
                let converted = resampler.convert(&block)?;
                if converted.is_empty() {
                    continue;
                }

                let elapsed_us = intake.start.elapsed().as_micros() as i64;
                {
                    let mut clock = intake.clock.lock().unwrap();
                    clock.note_append(elapsed_us, intake.fifo.size());
                }

                if let Err(e) = write_in_pieces(&intake.fifo, &converted) {
                    // FIFO arithmetic overflow is fatal for this channel.
                    break Err(e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    log::info!("audio intake exit");
    result
}

fn write_in_pieces(fifo: &AudioFifo, converted: &[f32]) -> Result<(), RecorderError> {
    let channels = fifo.channels();
    let mut offset = 0;

    while offset < converted.len() {
        let space_values = fifo.space() * channels;
        if space_values == 0 {
            // Bounded FIFO is full; the rest of the block is dropped by
            // policy.
            return Ok(());
        }

        let take = space_values.min(converted.len() - offset);
        fifo.write(&converted[offset..offset + take])?;
        offset += take;
    }

    Ok(())
}

/// Consumer loop of one separately-encoded audio channel.
pub struct AudioEncoderStage {
    pub fifo: Arc<AudioFifo>,
    pub clock: Arc<Mutex<AudioClock>>,
    pub mux: Arc<MuxWriter>,
    pub stream_index: usize,
    pub capture_active: Arc<AtomicBool>,
    pub profile: AudioProfile,
    pub container: ContainerFormat,
    pub encoder: encoder::Audio,
}

/// Pulls encoder-frame-sized chunks from the FIFO, encodes them and submits
/// packets whose timestamps run on the container-specific sample counter.
/// Exits once capture stopped and the FIFO is empty; a partial tail frame is
/// padded with silence.
pub fn run_audio_encoder(mut stage: AudioEncoderStage) -> Result<(), RecorderError> {
    let frame_size = stage.profile.frame_size;
    let rate = stage.profile.sample_rate;
    let channels = usize::from(stage.profile.channels);
    let layout = stage.profile.channel_layout();

    let mut count: u64 = 0;
    let mut idle: u32 = 0;
    let mut failures: u32 = 0;

    loop {
        let active = stage.capture_active.load(Ordering::Relaxed);
        let queued = stage.fifo.size();

        let samples = if queued >= frame_size {
            stage.fifo.read(frame_size)
        } else if !active && queued > 0 {
            // Tail shorter than one frame: pad with silence.
            stage.fifo.read(queued).map(|mut samples| {
                samples.resize(frame_size * channels, 0.0);
                samples
            })
        } else if !active {
            break;
        } else {
            idle += 1;
            if idle >= MAX_IDLE_ITERATIONS {
                idle = 0;
                log::debug!("audio encoder idle: {queued} samples queued");
            }
            thread::sleep(IDLE_WAIT);
            continue;
        };
        idle = 0;

        let Some(samples) = samples else { continue };

        let mut frame = planar_frame(&samples, frame_size, channels, layout, rate);
        {
            let mut clock = stage.clock.lock().unwrap();
            frame.set_pts(Some(clock.pts_in(rate as i32)));
            clock.advance(frame_size);
        }

        match stage.encoder.send_frame(&frame) {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                log::warn!("audio frame rejected by encoder: {e}");
                if failures >= MAX_ENCODE_FAILURES {
                    return Err(RecorderError::AudioEncoding(format!(
                        "encoder failed {failures} times in a row: {e}"
                    )));
                }
                continue;
            }
        }

        drain_packets(
            &mut stage.encoder,
            &stage.mux,
            stage.stream_index,
            stage.container,
            frame_size,
            rate,
            &mut count,
        )?;
    }

    if let Err(e) = stage.encoder.send_eof() {
        log::warn!("audio encoder eof failed: {e}");
    }
    drain_packets(
        &mut stage.encoder,
        &stage.mux,
        stage.stream_index,
        stage.container,
        frame_size,
        rate,
        &mut count,
    )?;

    log::info!("audio encoder exit after {count} frames");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn drain_packets(
    encoder: &mut encoder::Audio,
    mux: &MuxWriter,
    stream_index: usize,
    container: ContainerFormat,
    frame_size: usize,
    rate: u32,
    count: &mut u64,
) -> Result<(), RecorderError> {
    loop {
        let mut packet = Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let pts = audio_packet_pts(container, *count, frame_size, rate);
                let duration = audio_packet_pts(container, *count + 1, frame_size, rate) - pts;

                packet.set_stream(stream_index);
                packet.set_pts(Some(pts));
                packet.set_dts(Some(pts));
                packet.set_duration(duration);

                mux.write_packet(&mut packet)?;
                *count += 1;
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == 11 => break,
            Err(ffmpeg_next::Error::Eof) => break,
            Err(e) => {
                return Err(RecorderError::AudioEncoding(format!(
                    "receive audio packet: {e}"
                )));
            }
        }
    }

    Ok(())
}
