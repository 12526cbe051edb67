use crate::{
    AudioClock, AudioFifo, ContainerFormat, MuxWriter, RecorderError, audio_packet_pts,
    profile::AudioProfile, resampler::planar_frame,
};
use ffmpeg_next::{
    Packet, encoder, filter,
    format::{Sample, sample::Type},
    frame,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

const IDLE_WAIT: Duration = Duration::from_millis(10);
const MAX_IDLE_ITERATIONS: u32 = 1000;
const MAX_ENCODE_FAILURES: u32 = 10;

/// Which source feeds which input pad of the graph.
#[derive(Debug, Clone, Copy)]
pub enum MixInput {
    Mic,
    Sys,
}

impl MixInput {
    fn pad(self) -> &'static str {
        match self {
            Self::Mic => "in0",
            Self::Sys => "in1",
        }
    }
}

/// Two-input mixing graph producing one output frame stream:
///
/// ```text
///   mic ──► abuffer[in0] ─┐
///                         amix(inputs=2) ─► abuffersink[out]
///   sys ──► abuffer[in1] ─┘
/// ```
pub struct AudioMixer {
    graph: filter::Graph,
}

impl AudioMixer {
    pub fn new(profile: &AudioProfile) -> Result<Self, RecorderError> {
        ffmpeg_next::init()
            .map_err(|e| RecorderError::AudioEncoding(format!("ffmpeg init failed: {e}")))?;

        let layout_name = if profile.channels == 1 { "mono" } else { "stereo" };
        let rate = profile.sample_rate;
        let args = format!(
            "time_base=1/{rate}:sample_rate={rate}:sample_fmt=fltp:channel_layout={layout_name}"
        );

        let mut graph = filter::Graph::new();

        let abuffer = filter::find("abuffer")
            .ok_or_else(|| RecorderError::AudioEncoding("abuffer filter missing".to_string()))?;
        let abuffersink = filter::find("abuffersink").ok_or_else(|| {
            RecorderError::AudioEncoding("abuffersink filter missing".to_string())
        })?;

        graph
            .add(&abuffer, "in0", &args)
            .map_err(|e| RecorderError::AudioEncoding(format!("abuffer in0: {e}")))?;
        graph
            .add(&abuffer, "in1", &args)
            .map_err(|e| RecorderError::AudioEncoding(format!("abuffer in1: {e}")))?;
        graph
            .add(&abuffersink, "out", "")
            .map_err(|e| RecorderError::AudioEncoding(format!("abuffersink: {e}")))?;

        {
            let mut out = graph.get("out").expect("sink was just added");
            out.set_sample_format(Sample::F32(Type::Planar));
            out.set_sample_rate(rate);
            out.set_channel_layout(profile.channel_layout());
        }

        graph
            .output("in0", 0)
            .and_then(|p| p.output("in1", 0))
            .and_then(|p| p.input("out", 0))
            .and_then(|p| p.parse("[in0][in1]amix=inputs=2[out]"))
            .map_err(|e| RecorderError::AudioEncoding(format!("graph parse: {e}")))?;

        graph
            .validate()
            .map_err(|e| RecorderError::AudioEncoding(format!("graph validate: {e}")))?;

        Ok(Self { graph })
    }

    pub fn push(&mut self, input: MixInput, frame: &frame::Audio) -> Result<(), RecorderError> {
        self.graph
            .get(input.pad())
            .expect("graph holds both sources")
            .source()
            .add(frame)
            .map_err(|e| RecorderError::AudioEncoding(format!("mix input: {e}")))
    }

    /// Drains one mixed frame, or `None` when the graph needs more input.
    pub fn pull(&mut self) -> Option<frame::Audio> {
        let mut mixed = frame::Audio::empty();
        match self
            .graph
            .get("out")
            .expect("graph holds the sink")
            .sink()
            .frame(&mut mixed)
        {
            Ok(()) => Some(mixed),
            Err(_) => None,
        }
    }

    /// Signals end of stream on both inputs so the tail drains.
    pub fn flush(&mut self) {
        for pad in ["in0", "in1"] {
            if let Some(mut ctx) = self.graph.get(pad)
                && let Err(e) = ctx.source().flush()
            {
                log::warn!("mixer flush on {pad} failed: {e}");
            }
        }
    }
}

/// Everything the mixer thread needs, passed by reference at construction.
pub struct MixerStage {
    pub mic_fifo: Arc<AudioFifo>,
    pub sys_fifo: Arc<AudioFifo>,
    pub mux: Arc<MuxWriter>,
    pub stream_index: usize,
    pub capture_active: Arc<AtomicBool>,
    pub profile: AudioProfile,
    pub container: ContainerFormat,
    pub start: Instant,
    pub encoder: encoder::Audio,
}

/// Consumer loop of the mixed-audio path.
///
/// Each cycle waits until both FIFOs hold at least one encoder frame of
/// samples, reads one frame from each with timestamps from a shared mixer
/// clock, feeds the graph and encodes every produced output frame. After
/// stop the loop keeps draining while either FIFO is non-empty, padding the
/// other side with silence so tail audio reaches the file.
pub fn run_mixer(mut stage: MixerStage) -> Result<(), RecorderError> {
    let mut mixer = AudioMixer::new(&stage.profile)?;

    let frame_size = stage.profile.frame_size;
    let rate = stage.profile.sample_rate;
    let channels = usize::from(stage.profile.channels);
    let layout = stage.profile.channel_layout();

    let mut clock = AudioClock::new(rate);
    let mut mix_count: u64 = 0;
    let mut idle: u32 = 0;
    let mut failures: u32 = 0;

    loop {
        let active = stage.capture_active.load(Ordering::Relaxed);
        let mic_queued = stage.mic_fifo.size();
        let sys_queued = stage.sys_fifo.size();

        let both_ready = mic_queued >= frame_size && sys_queued >= frame_size;
        let anything_left = mic_queued > 0 || sys_queued > 0;

        if !both_ready && !anything_left && !active {
            break;
        }

        // While capture runs, wait for full frames on both sides; after
        // stop, pad whatever is missing so the tail still mixes.
        if !both_ready && active {
            idle += 1;
            if idle >= MAX_IDLE_ITERATIONS {
                idle = 0;
                log::debug!("mixer idle: mic {mic_queued}, sys {sys_queued} samples");
            }
            thread::sleep(IDLE_WAIT);
            continue;
        }
        idle = 0;

        let mic = read_padded(&stage.mic_fifo, frame_size, channels);
        let sys = read_padded(&stage.sys_fifo, frame_size, channels);

        // The shift is one mixing frame, not the FIFO backlog.
        let elapsed_us = stage.start.elapsed().as_micros() as i64;
        clock.note_append(elapsed_us, frame_size);
        let frame_pts = clock.pts_in(rate as i32);

        let mut mic_frame = planar_frame(&mic, frame_size, channels, layout, rate);
        let mut sys_frame = planar_frame(&sys, frame_size, channels, layout, rate);
        mic_frame.set_pts(Some(frame_pts));
        sys_frame.set_pts(Some(frame_pts));

        mixer.push(MixInput::Mic, &mic_frame)?;
        mixer.push(MixInput::Sys, &sys_frame)?;
        clock.advance(frame_size);

        while let Some(mixed) = mixer.pull() {
            encode_mixed(&mut stage, &mixed, &mut mix_count, &mut failures)?;
        }
    }

    // Graph tail, then encoder tail.
    mixer.flush();
    while let Some(mixed) = mixer.pull() {
        encode_mixed(&mut stage, &mixed, &mut mix_count, &mut failures)?;
    }

    if let Err(e) = stage.encoder.send_eof() {
        log::warn!("mixed audio encoder eof failed: {e}");
    }
    drain_packets(&mut stage, &mut mix_count)?;

    log::info!("mixer exit after {mix_count} mixed frames");
    Ok(())
}

fn read_padded(fifo: &AudioFifo, frame_size: usize, channels: usize) -> Vec<f32> {
    match fifo.read(frame_size) {
        Some(samples) => samples,
        None => {
            // Partial tail: take what is queued, silence the rest.
            let queued = fifo.size();
            let mut samples = fifo.read(queued).unwrap_or_default();
            samples.resize(frame_size * channels, 0.0);
            samples
        }
    }
}

fn encode_mixed(
    stage: &mut MixerStage,
    mixed: &frame::Audio,
    mix_count: &mut u64,
    failures: &mut u32,
) -> Result<(), RecorderError> {
    if let Err(e) = stage.encoder.send_frame(mixed) {
        *failures += 1;
        log::warn!("mixed frame rejected by encoder: {e}");
        if *failures >= MAX_ENCODE_FAILURES {
            return Err(RecorderError::AudioEncoding(format!(
                "encoder failed {failures} times in a row: {e}"
            )));
        }
        return Ok(());
    }
    *failures = 0;

    drain_packets(stage, mix_count)
}

fn drain_packets(stage: &mut MixerStage, mix_count: &mut u64) -> Result<(), RecorderError> {
    let frame_size = stage.profile.frame_size;
    let rate = stage.profile.sample_rate;

    loop {
        let mut packet = Packet::empty();
        match stage.encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let pts = audio_packet_pts(stage.container, *mix_count, frame_size, rate);
                let duration =
                    audio_packet_pts(stage.container, *mix_count + 1, frame_size, rate) - pts;

                packet.set_stream(stage.stream_index);
                packet.set_pts(Some(pts));
                packet.set_dts(Some(pts));
                packet.set_duration(duration);

                stage.mux.write_packet(&mut packet)?;
                *mix_count += 1;
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == 11 => break,
            Err(ffmpeg_next::Error::Eof) => break,
            Err(e) => {
                return Err(RecorderError::AudioEncoding(format!(
                    "receive mixed packet: {e}"
                )));
            }
        }
    }

    Ok(())
}
