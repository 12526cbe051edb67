use crate::{
    AudioClock, AudioFifo, ContainerFormat, FifoPolicy, MuxWriter, RecorderConfig, RecorderError,
    VideoRing,
    audio_stage::{AudioEncoderStage, AudioIntake, run_audio_encoder, run_audio_intake},
    mixer::{MixerStage, run_mixer},
    profile::{AAC_FRAME_SIZE, AudioProfile, VideoProfile, open_audio_encoder, open_video_encoder},
    video_stage::{VideoStage, run_video_stage},
};
use audio_capture::{AudioCaptureStage, AudioSpec};
use crossbeam::channel::{Receiver, RecvTimeoutError, bounded};
use ffmpeg_next::encoder;
use image::RgbaImage;
use spin_sleep::SpinSleeper;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use wayland_capture::{CaptureError, CaptureStreamConfig, ProductClass, capture_stream};

/// Lifecycle of one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Configured,
    Running,
    Draining,
    Closed,
    Faulted,
}

/// Which audio channels actually opened. A requested device that failed to
/// open leaves its flag false while the recording continues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioChannelMask {
    pub mic: bool,
    pub sys: bool,
}

/// Counters and final state reported after the pipeline closed.
#[derive(Debug, Clone, Copy)]
pub struct RecordingSummary {
    pub frames_appended: u64,
    pub frames_dropped: u64,
    pub channels: AudioChannelMask,
    pub state: PipelineState,
}

/// Cloneable handle that requests shutdown from any thread.
#[derive(Clone)]
pub struct StopHandle {
    capture_active: Arc<AtomicBool>,
    cancel_sig: Arc<AtomicBool>,
    state: Arc<Mutex<PipelineState>>,
}

impl StopHandle {
    /// Stops producer admission and lets the consumers drain. Calling this
    /// more than once has no further effect.
    pub fn stop(&self) {
        self.capture_active.store(false, Ordering::Relaxed);
        self.cancel_sig.store(true, Ordering::Relaxed);

        let mut state = self.state.lock().unwrap();
        if *state == PipelineState::Running {
            *state = PipelineState::Draining;
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.capture_active.load(Ordering::Relaxed)
    }
}

/// One separately-encoded audio channel, wired and waiting for its threads.
struct SeparateChannel {
    intake: AudioIntake,
    encoder: encoder::Audio,
    profile: AudioProfile,
    fifo: Arc<AudioFifo>,
    stream_index: usize,
}

/// Both channels feeding the two-input mixer.
struct MixedChannels {
    mic_intake: AudioIntake,
    sys_intake: AudioIntake,
    encoder: encoder::Audio,
    profile: AudioProfile,
    mic_fifo: Arc<AudioFifo>,
    sys_fifo: Arc<AudioFifo>,
    stream_index: usize,
}

enum AudioPlan {
    Silent,
    Separate(Vec<SeparateChannel>),
    Mixed(MixedChannels),
}

impl AudioPlan {
    fn fifos(&self) -> (Option<Arc<AudioFifo>>, Option<Arc<AudioFifo>>) {
        match self {
            Self::Silent => (None, None),
            Self::Mixed(mixed) => (Some(mixed.mic_fifo.clone()), Some(mixed.sys_fifo.clone())),
            Self::Separate(channels) => {
                let mut iter = channels.iter().map(|c| c.fifo.clone());
                (iter.next(), iter.next())
            }
        }
    }
}

/// Owns every stage of the pipeline and drives the lifecycle
/// Idle → Configured → Running → Draining → Closed, with Faulted reachable
/// from anywhere on a fatal I/O error.
///
/// ```no_run
/// use recorder::{PipelineController, RecorderConfig};
///
/// let config = RecorderConfig::new("capture.mp4")
///     .with_mic_device(Some("default".to_string()));
///
/// let mut controller = PipelineController::new(config);
/// controller.init().unwrap();
/// controller.start().unwrap();
///
/// let stop = controller.stop_handle();
/// std::thread::spawn(move || {
///     std::thread::sleep(std::time::Duration::from_secs(5));
///     stop.stop();
/// });
///
/// let summary = controller.wait().unwrap();
/// println!("recorded {} frames", summary.frames_appended);
/// ```
pub struct PipelineController {
    config: RecorderConfig,
    state: Arc<Mutex<PipelineState>>,
    capture_active: Arc<AtomicBool>,
    cancel_sig: Arc<AtomicBool>,
    product_class: Option<ProductClass>,

    latest_frame: Arc<Mutex<Option<RgbaImage>>>,
    first_frame: Option<Receiver<(u32, u32)>>,
    capture_worker: Option<JoinHandle<()>>,
    capture_fault: Arc<Mutex<Option<CaptureError>>>,

    mic_stage: Option<AudioCaptureStage>,
    sys_stage: Option<AudioCaptureStage>,
    channels: AudioChannelMask,
}

impl PipelineController {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(PipelineState::Idle)),
            capture_active: Arc::new(AtomicBool::new(false)),
            cancel_sig: Arc::new(AtomicBool::new(false)),
            product_class: None,
            latest_frame: Arc::new(Mutex::new(None)),
            first_frame: None,
            capture_worker: None,
            capture_fault: Arc::new(Mutex::new(None)),
            mic_stage: None,
            sys_stage: None,
            channels: AudioChannelMask::default(),
        }
    }

    /// Validates the configuration and resolves the buffer adapter variant
    /// for the running hardware.
    pub fn init(&mut self) -> Result<(), RecorderError> {
        self.init_with(ProductClass::detect())
    }

    /// Like [`PipelineController::init`] with an explicit hardware class.
    pub fn init_with(&mut self, product_class: ProductClass) -> Result<(), RecorderError> {
        let mut state = self.state.lock().unwrap();
        if *state != PipelineState::Idle {
            return Err(RecorderError::Other(format!(
                "init called in state {:?}",
                *state
            )));
        }

        self.config.validate()?;
        self.product_class = Some(product_class);
        *state = PipelineState::Configured;

        Ok(())
    }

    /// Starts the producers: the compositor capture thread and the audio
    /// device stages. A requested audio device that cannot be opened is
    /// logged and skipped; the recording proceeds without that channel.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        {
            let state = self.state.lock().unwrap();
            if *state != PipelineState::Configured {
                return Err(RecorderError::Other(format!(
                    "start called in state {:?}",
                    *state
                )));
            }
        }

        self.capture_active.store(true, Ordering::Relaxed);
        self.cancel_sig.store(false, Ordering::Relaxed);

        let (first_sender, first_receiver) = bounded(1);
        self.first_frame = Some(first_receiver);

        let stream_config = CaptureStreamConfig {
            include_cursor: self.config.include_cursor,
            product_class: self.product_class.expect("set by init"),
            cancel_sig: self.cancel_sig.clone(),
        };
        let latest_frame = self.latest_frame.clone();
        let capture_active = self.capture_active.clone();
        let capture_fault = self.capture_fault.clone();

        let worker = thread::spawn(move || {
            let result = capture_stream(stream_config, move |canvas| {
                _ = first_sender.try_send(canvas.dimensions());
                *latest_frame.lock().unwrap() = Some(canvas);
            });

            if let Err(e) = result {
                log::warn!("capture thread exit with error: {e}");
                *capture_fault.lock().unwrap() = Some(e);
            }

            // The producer is gone either way. Clearing the flag stops the
            // pacing thread and lets every consumer drain to the trailer.
            capture_active.store(false, Ordering::Relaxed);
        });
        self.capture_worker = Some(worker);

        self.mic_stage = Self::open_audio_device(self.config.mic_device.as_deref(), "microphone");
        self.sys_stage = Self::open_audio_device(self.config.sys_device.as_deref(), "system");
        self.channels = AudioChannelMask {
            mic: self.mic_stage.is_some(),
            sys: self.sys_stage.is_some(),
        };

        Ok(())
    }

    fn open_audio_device(name: Option<&str>, kind: &str) -> Option<AudioCaptureStage> {
        let name = name?;
        match AudioCaptureStage::open(name) {
            Ok(stage) => Some(stage),
            Err(e) => {
                // Deliberate degradation: the recording continues with the
                // channel disabled instead of failing the session.
                log::warn!("{kind} device `{name}` unavailable, continuing without it: {e}");
                None
            }
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            capture_active: self.capture_active.clone(),
            cancel_sig: self.cancel_sig.clone(),
            state: self.state.clone(),
        }
    }

    /// Idempotent shutdown request; consumers keep running until their
    /// queues drain.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    /// The channels that are actually recording, known once
    /// [`PipelineController::start`] returned.
    pub fn audio_channels(&self) -> AudioChannelMask {
        self.channels
    }

    /// Runs the consumer side to completion: waits for the first composed
    /// frame, writes the container header, spawns the encoder stages and
    /// joins everything. The trailer is written on every exit path.
    pub fn wait(mut self) -> Result<RecordingSummary, RecorderError> {
        let first_frame = self
            .wait_first_frame()
            .map_err(|e| self.fail_closed(e))?;

        let Some((canvas_width, canvas_height)) = first_frame else {
            // Stopped before the compositor delivered anything.
            self.join_producers();
            *self.state.lock().unwrap() = PipelineState::Closed;
            return Ok(RecordingSummary {
                frames_appended: 0,
                frames_dropped: 0,
                channels: self.channels,
                state: PipelineState::Closed,
            });
        };

        *self.state.lock().unwrap() = PipelineState::Running;
        let start = Instant::now();
        let container = self.config.container();

        let video_profile = self
            .video_profile(canvas_width, canvas_height)
            .map_err(|e| self.fail_closed(e))?;
        let ring = Arc::new(VideoRing::with_capacity(
            VideoRing::default_capacity(self.product_class.expect("set by init")),
            canvas_width as usize * canvas_height as usize * 4,
        ));

        let mux = MuxWriter::create(&self.config.output_path)
            .map(Arc::new)
            .map_err(|e| self.fail_closed(e))?;

        // Encoders open up front: the container needs every stream's
        // parameters before the header is written.
        let video_encoder = open_video_encoder(&video_profile).map_err(|e| self.fail_closed(e))?;
        let video_stream = mux
            .add_video_stream(&video_encoder, video_profile.fps)
            .map_err(|e| self.fail_closed(e))?;

        let audio_plan = self
            .plan_audio(&mux, container, start)
            .map_err(|e| self.fail_closed(e))?;

        if let Err(e) = mux.write_header() {
            return Err(self.fail_closed(e));
        }

        let fatal = self.run_stages(
            start,
            container,
            &mux,
            &ring,
            video_profile,
            video_encoder,
            video_stream,
            audio_plan,
        );

        // The trailer runs on the fault path too, so a crash mid-recording
        // still leaves a playable file.
        if let Err(e) = mux.write_trailer() {
            log::warn!("trailer failed: {e}");
        }

        let stats = ring.stats();
        log::info!(
            "recording finished: {} frames appended, {} dropped ({:.2}%)",
            stats.appended,
            stats.dropped,
            stats.dropped as f64 * 100.0 / stats.appended.max(1) as f64,
        );

        let final_state = if fatal.is_some() {
            PipelineState::Faulted
        } else {
            PipelineState::Closed
        };
        *self.state.lock().unwrap() = final_state;

        match fatal {
            Some(e) => Err(e),
            None => Ok(RecordingSummary {
                frames_appended: stats.appended,
                frames_dropped: stats.dropped,
                channels: self.channels,
                state: final_state,
            }),
        }
    }

    /// Blocks until the compositor delivers the first composed frame, the
    /// pipeline is stopped, or the capture thread dies.
    fn wait_first_frame(&mut self) -> Result<Option<(u32, u32)>, RecorderError> {
        let receiver = self
            .first_frame
            .take()
            .ok_or_else(|| RecorderError::Other("wait called before start".to_string()))?;

        loop {
            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(dimensions) => return Ok(Some(dimensions)),
                Err(RecvTimeoutError::Timeout) => {
                    // A dead capture thread clears the flag too, so both
                    // conditions mean the producer side is over.
                    let stopped = !self.capture_active.load(Ordering::Relaxed);
                    let ended = self
                        .capture_worker
                        .as_ref()
                        .is_some_and(|worker| worker.is_finished());
                    if !stopped && !ended {
                        continue;
                    }

                    // Join before deciding: the worker stores its error
                    // right before exiting.
                    self.join_producers();
                    return match self.take_capture_fault() {
                        Some(e) => Err(e),
                        None if stopped => Ok(None),
                        None => Err(RecorderError::Other(
                            "capture thread ended before the first frame".to_string(),
                        )),
                    };
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.join_producers();
                    return match self.take_capture_fault() {
                        Some(e) => Err(e),
                        None => Ok(None),
                    };
                }
            }
        }
    }

    fn take_capture_fault(&self) -> Option<RecorderError> {
        self.capture_fault
            .lock()
            .unwrap()
            .take()
            .map(RecorderError::Capture)
    }

    fn video_profile(
        &self,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Result<VideoProfile, RecorderError> {
        let crop = self.config.crop;
        let width = canvas_width
            .checked_sub(crop.left + crop.right)
            .filter(|w| *w >= 2)
            .ok_or_else(|| {
                RecorderError::InvalidConfig(format!(
                    "crop {crop:?} exceeds canvas width {canvas_width}"
                ))
            })?;
        let height = canvas_height
            .checked_sub(crop.top + crop.bottom)
            .filter(|h| *h >= 2)
            .ok_or_else(|| {
                RecorderError::InvalidConfig(format!(
                    "crop {crop:?} exceeds canvas height {canvas_height}"
                ))
            })?;

        Ok(VideoProfile {
            codec: self.config.video_codec,
            // 4:2:0 output needs even dimensions.
            width: width & !1,
            height: height & !1,
            fps: self.config.fps,
            bitrate: self.config.video_bitrate,
            gop: self.config.gop,
        })
    }

    fn audio_profile(&self, spec: AudioSpec, channels: u16) -> AudioProfile {
        AudioProfile {
            codec: self.config.audio_codec,
            sample_rate: spec.sample_rate,
            channels: channels.min(2),
            bitrate: self.config.audio_bitrate,
            frame_size: AAC_FRAME_SIZE,
        }
    }

    fn fifo_for(&self, profile: &AudioProfile, container: ContainerFormat) -> Arc<AudioFifo> {
        // MP4 grows freely; MKV keeps the buffer bounded so the sample
        // counter stays aligned with the clock.
        let (initial, policy) = match container {
            ContainerFormat::Mp4 => (20 * profile.frame_size, FifoPolicy::Grow),
            ContainerFormat::Mkv => (profile.frame_size, FifoPolicy::Bounded),
        };
        Arc::new(AudioFifo::new(profile.channels, initial, policy))
    }

    /// Decides between mixed and separate audio, opens the encoders and
    /// registers their streams. Channel-level failures disable the channel;
    /// only mux failures propagate.
    fn plan_audio(
        &mut self,
        mux: &Arc<MuxWriter>,
        container: ContainerFormat,
        start: Instant,
    ) -> Result<AudioPlan, RecorderError> {
        let mic_stage = self.mic_stage.take();
        let sys_stage = self.sys_stage.take();

        let mixing = self.config.mix_audio
            && match (&mic_stage, &sys_stage) {
                (Some(mic), Some(sys)) => {
                    let rates_match = mic.spec().sample_rate == sys.spec().sample_rate;
                    if !rates_match {
                        log::warn!(
                            "mic ({} Hz) and system ({} Hz) rates differ, writing separate streams",
                            mic.spec().sample_rate,
                            sys.spec().sample_rate
                        );
                    }
                    rates_match
                }
                _ => false,
            };

        if mixing {
            let mic = mic_stage.expect("mixing requires both stages");
            let sys = sys_stage.expect("mixing requires both stages");

            let channels = mic.spec().channels.max(sys.spec().channels);
            let profile = self.audio_profile(mic.spec(), channels);

            let encoder = match open_audio_encoder(&profile) {
                Ok(encoder) => encoder,
                Err(e) => {
                    log::warn!("mixed audio unavailable, recording silent: {e}");
                    self.channels = AudioChannelMask::default();
                    return Ok(AudioPlan::Silent);
                }
            };
            let stream_index = mux.add_audio_stream(&encoder, profile.sample_rate)?;

            let mic_fifo = self.fifo_for(&profile, container);
            let sys_fifo = self.fifo_for(&profile, container);

            let mic_intake =
                self.intake_for(mic, &profile, mic_fifo.clone(), start, "microphone");
            let sys_intake = self.intake_for(sys, &profile, sys_fifo.clone(), start, "system");

            match (mic_intake, sys_intake) {
                (Some(mic_intake), Some(sys_intake)) => Ok(AudioPlan::Mixed(MixedChannels {
                    mic_intake,
                    sys_intake,
                    encoder,
                    profile,
                    mic_fifo,
                    sys_fifo,
                    stream_index,
                })),
                _ => {
                    log::warn!("mixer inputs unavailable, recording silent");
                    self.channels = AudioChannelMask::default();
                    Ok(AudioPlan::Silent)
                }
            }
        } else {
            let mut channels = Vec::new();

            for (stage, kind) in [(mic_stage, "microphone"), (sys_stage, "system")] {
                let Some(stage) = stage else { continue };

                let profile = self.audio_profile(stage.spec(), stage.spec().channels);
                let encoder = match open_audio_encoder(&profile) {
                    Ok(encoder) => encoder,
                    Err(e) => {
                        log::warn!("{kind} encoder unavailable, channel disabled: {e}");
                        self.disable_channel(kind);
                        continue;
                    }
                };
                let stream_index = mux.add_audio_stream(&encoder, profile.sample_rate)?;

                let fifo = self.fifo_for(&profile, container);
                if let Some(intake) = self.intake_for(stage, &profile, fifo.clone(), start, kind)
                {
                    channels.push(SeparateChannel {
                        intake,
                        encoder,
                        profile,
                        fifo,
                        stream_index,
                    });
                }
            }

            if channels.is_empty() {
                Ok(AudioPlan::Silent)
            } else {
                Ok(AudioPlan::Separate(channels))
            }
        }
    }

    fn intake_for(
        &mut self,
        stage: AudioCaptureStage,
        profile: &AudioProfile,
        fifo: Arc<AudioFifo>,
        start: Instant,
        kind: &str,
    ) -> Option<AudioIntake> {
        // Rate mismatch is fatal for this channel only; the converter never
        // changes the rate.
        if stage.spec().sample_rate != profile.sample_rate {
            log::warn!(
                "{kind} channel disabled: device rate {} Hz does not match encoder rate {} Hz",
                stage.spec().sample_rate,
                profile.sample_rate
            );
            self.disable_channel(kind);
            return None;
        }

        Some(AudioIntake {
            stage,
            dst_rate: profile.sample_rate,
            dst_channels: profile.channels,
            fifo,
            clock: Arc::new(Mutex::new(AudioClock::new(profile.sample_rate))),
            capture_active: self.capture_active.clone(),
            start,
        })
    }

    fn disable_channel(&mut self, kind: &str) {
        match kind {
            "microphone" => self.channels.mic = false,
            _ => self.channels.sys = false,
        }
    }

    /// Spawns the pacing thread and every consumer stage, joins them all and
    /// reports the first error worth surfacing.
    #[allow(clippy::too_many_arguments)]
    fn run_stages(
        &mut self,
        start: Instant,
        container: ContainerFormat,
        mux: &Arc<MuxWriter>,
        ring: &Arc<VideoRing>,
        video_profile: VideoProfile,
        video_encoder: encoder::Video,
        video_stream: usize,
        audio_plan: AudioPlan,
    ) -> Option<RecorderError> {
        let mut workers: Vec<(&'static str, JoinHandle<Result<(), RecorderError>>)> = Vec::new();

        // Producer pacing: sample the latest composed frame at the target
        // FPS and feed the ring, decoupling compositor delivery from fps.
        let pacing = {
            let ring = ring.clone();
            let latest_frame = self.latest_frame.clone();
            let capture_active = self.capture_active.clone();
            let interval = Duration::from_millis(self.config.frame_interval_ms());

            thread::spawn(move || {
                let sleeper = SpinSleeper::default();
                while capture_active.load(Ordering::Relaxed) {
                    let canvas = latest_frame.lock().unwrap().clone();
                    if let Some(canvas) = canvas {
                        let (width, height) = canvas.dimensions();
                        ring.append(
                            canvas.as_raw(),
                            width,
                            height,
                            width * 4,
                            start.elapsed().as_micros() as i64,
                        );
                    }
                    sleeper.sleep(interval);
                }
                log::info!("video producer pacing thread exit");
            })
        };

        let (mic_fifo, sys_fifo) = audio_plan.fifos();
        workers.push((
            "video encoder",
            thread::spawn({
                let stage = VideoStage {
                    ring: ring.clone(),
                    mux: mux.clone(),
                    stream_index: video_stream,
                    capture_active: self.capture_active.clone(),
                    mic_fifo,
                    sys_fifo,
                    profile: video_profile,
                    crop: self.config.crop,
                    encoder: video_encoder,
                };
                move || run_video_stage(stage)
            }),
        ));

        match audio_plan {
            AudioPlan::Silent => {}
            AudioPlan::Mixed(mixed) => {
                let MixedChannels {
                    mic_intake,
                    sys_intake,
                    encoder,
                    profile,
                    mic_fifo,
                    sys_fifo,
                    stream_index,
                } = mixed;

                workers.push((
                    "microphone intake",
                    thread::spawn(move || run_audio_intake(mic_intake)),
                ));
                workers.push((
                    "system intake",
                    thread::spawn(move || run_audio_intake(sys_intake)),
                ));

                let stage = MixerStage {
                    mic_fifo,
                    sys_fifo,
                    mux: mux.clone(),
                    stream_index,
                    capture_active: self.capture_active.clone(),
                    profile,
                    container,
                    start,
                    encoder,
                };
                workers.push(("audio mixer", thread::spawn(move || run_mixer(stage))));
            }
            AudioPlan::Separate(channels) => {
                for channel in channels {
                    let SeparateChannel {
                        intake,
                        encoder,
                        profile,
                        fifo,
                        stream_index,
                    } = channel;
                    let clock = intake.clock.clone();

                    workers.push((
                        "audio intake",
                        thread::spawn(move || run_audio_intake(intake)),
                    ));

                    let stage = AudioEncoderStage {
                        fifo,
                        clock,
                        mux: mux.clone(),
                        stream_index,
                        capture_active: self.capture_active.clone(),
                        profile,
                        container,
                        encoder,
                    };
                    workers.push((
                        "audio encoder",
                        thread::spawn(move || run_audio_encoder(stage)),
                    ));
                }
            }
        }

        if let Err(e) = pacing.join() {
            log::warn!("join pacing thread failed: {e:?}");
        }
        self.join_producers();

        let mut fatal: Option<RecorderError> = None;
        for (name, handle) in workers {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("{name} stage failed: {e}");
                    if fatal.is_none() || e.is_fatal() {
                        fatal = Some(e);
                    }
                }
                Err(e) => log::warn!("join {name} stage failed: {e:?}"),
            }
        }

        // A capture thread that died mid-recording already stopped the
        // producers; report it once the consumers have drained.
        if fatal.is_none()
            && let Some(e) = self.take_capture_fault()
        {
            fatal = Some(e);
        }

        fatal
    }

    /// Tears the producers down after a setup failure and marks the
    /// pipeline faulted.
    fn fail_closed(&mut self, e: RecorderError) -> RecorderError {
        self.stop();
        self.join_producers();
        *self.state.lock().unwrap() = PipelineState::Faulted;
        e
    }

    fn join_producers(&mut self) {
        self.cancel_sig.store(true, Ordering::Relaxed);
        if let Some(worker) = self.capture_worker.take()
            && let Err(e) = worker.join()
        {
            log::warn!("join capture thread failed: {e:?}");
        }

        // Dropping an audio stage stops its device stream.
        self.mic_stage.take();
        self.sys_stage.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> PipelineController {
        PipelineController::new(RecorderConfig::new("out.mp4"))
    }

    #[test]
    fn test_init_moves_idle_to_configured() {
        let mut controller = controller();
        assert_eq!(controller.state(), PipelineState::Idle);

        controller.init_with(ProductClass::Standard).unwrap();
        assert_eq!(controller.state(), PipelineState::Configured);
    }

    #[test]
    fn test_init_twice_is_rejected() {
        let mut controller = controller();
        controller.init_with(ProductClass::Standard).unwrap();
        assert!(controller.init_with(ProductClass::Standard).is_err());
    }

    #[test]
    fn test_invalid_config_stays_idle() {
        let mut controller = PipelineController::new(RecorderConfig::new("out.mp4").with_fps(0));
        assert!(controller.init_with(ProductClass::Standard).is_err());
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[test]
    fn test_start_requires_configured() {
        let mut controller = controller();
        assert!(controller.start().is_err());
    }

    #[test]
    fn test_stop_twice_equals_stop_once() {
        let controller = controller();
        let handle = controller.stop_handle();

        handle.stop();
        let state_after_first = controller.state();
        handle.stop();

        assert_eq!(controller.state(), state_after_first);
        assert!(handle.is_stopped());
    }
}
