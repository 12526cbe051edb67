use crate::{ContainerFormat, RecorderError};
use ffmpeg_next::{Dictionary, Packet, Rational, encoder, format};
use std::{path::Path, sync::Mutex};

struct MuxState {
    octx: format::context::Output,
    header_written: bool,
    trailer_written: bool,
}

/// Thread-safe writer over the output container.
///
/// Streams are added before the header; afterwards any number of encoder
/// threads submit packets concurrently. One mutex serialises every
/// header/packet/trailer operation, and the muxer interleaves streams by
/// timestamp on its own.
pub struct MuxWriter {
    state: Mutex<MuxState>,
    container: ContainerFormat,
}

// The AVFormatContext is only ever touched under the mutex.
unsafe impl Send for MuxWriter {}
unsafe impl Sync for MuxWriter {}

impl MuxWriter {
    pub fn create(path: &Path) -> Result<Self, RecorderError> {
        let container = ContainerFormat::from_path(path);
        let octx = format::output(&path)
            .map_err(|e| RecorderError::Mux(format!("open output `{}`: {e}", path.display())))?;

        Ok(Self {
            state: Mutex::new(MuxState {
                octx,
                header_written: false,
                trailer_written: false,
            }),
            container,
        })
    }

    pub fn container(&self) -> ContainerFormat {
        self.container
    }

    /// Adds a stream carrying the video encoder's parameters; returns its
    /// index. The requested time base is `1/fps`, though the muxer may
    /// substitute its own at header time.
    pub fn add_video_stream(
        &self,
        video: &encoder::Video,
        fps: u32,
    ) -> Result<usize, RecorderError> {
        let mut state = self.state.lock().unwrap();
        if state.header_written {
            return Err(RecorderError::Mux(
                "stream added after the header was written".to_string(),
            ));
        }

        let mut stream = state
            .octx
            .add_stream(video.codec())
            .map_err(|e| RecorderError::Mux(format!("add video stream: {e}")))?;
        stream.set_time_base(Rational::new(1, fps as i32));
        stream.set_parameters(video);

        Ok(stream.index())
    }

    pub fn add_audio_stream(
        &self,
        audio: &encoder::Audio,
        sample_rate: u32,
    ) -> Result<usize, RecorderError> {
        let mut state = self.state.lock().unwrap();
        if state.header_written {
            return Err(RecorderError::Mux(
                "stream added after the header was written".to_string(),
            ));
        }

        let mut stream = state
            .octx
            .add_stream(audio.codec())
            .map_err(|e| RecorderError::Mux(format!("add audio stream: {e}")))?;
        stream.set_time_base(Rational::new(1, sample_rate as i32));
        stream.set_parameters(audio);

        Ok(stream.index())
    }

    /// Writes the container header. Must run exactly once, before any
    /// packet.
    pub fn write_header(&self) -> Result<(), RecorderError> {
        let mut state = self.state.lock().unwrap();
        if state.header_written {
            return Err(RecorderError::Mux("header already written".to_string()));
        }

        match self.container {
            ContainerFormat::Mp4 => {
                // Fragmented layout keeps the file playable even when the
                // process dies before the trailer.
                let mut opts = Dictionary::new();
                opts.set("movflags", "frag_keyframe+empty_moov");
                state
                    .octx
                    .write_header_with(opts)
                    .map(|_| ())
                    .map_err(|e| RecorderError::Mux(format!("write header: {e}")))?;
            }
            ContainerFormat::Mkv => {
                state
                    .octx
                    .write_header()
                    .map_err(|e| RecorderError::Mux(format!("write header: {e}")))?;
            }
        }

        state.header_written = true;
        Ok(())
    }

    pub fn header_written(&self) -> bool {
        self.state.lock().unwrap().header_written
    }

    /// The time base the muxer settled on for a stream; only meaningful
    /// after the header.
    pub fn stream_time_base(&self, index: usize) -> Rational {
        let state = self.state.lock().unwrap();
        state
            .octx
            .stream(index)
            .map(|s| s.time_base())
            .unwrap_or_else(|| Rational::new(1, 1000))
    }

    /// Submits one packet; safe from any number of threads.
    pub fn write_packet(&self, packet: &mut Packet) -> Result<(), RecorderError> {
        let mut state = self.state.lock().unwrap();
        if !state.header_written {
            return Err(RecorderError::Mux(
                "packet submitted before the header".to_string(),
            ));
        }
        if state.trailer_written {
            return Err(RecorderError::Mux(
                "packet submitted after the trailer".to_string(),
            ));
        }

        packet
            .write_interleaved(&mut state.octx)
            .map_err(|e| RecorderError::Mux(format!("write packet: {e}")))
    }

    /// Writes the trailer once all stages drained. Runs on every shutdown
    /// path, including faults; extra calls are no-ops so the file ends with
    /// exactly one trailer.
    pub fn write_trailer(&self) -> Result<(), RecorderError> {
        let mut state = self.state.lock().unwrap();
        if state.trailer_written {
            return Ok(());
        }
        if !state.header_written {
            // Nothing was ever recorded; an empty container without a
            // header cannot take a trailer.
            log::warn!("skipping trailer: header was never written");
            return Ok(());
        }

        state
            .octx
            .write_trailer()
            .map_err(|e| RecorderError::Mux(format!("write trailer: {e}")))?;
        state.trailer_written = true;

        Ok(())
    }
}
