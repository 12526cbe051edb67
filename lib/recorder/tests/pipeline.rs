use recorder::{
    AudioFifo, ContainerFormat, FifoPolicy, MuxWriter, PipelineController, PipelineState,
    RecorderConfig, VideoRing, audio_packet_pts, video_packet_pts,
};

const AAC_FRAME: usize = 1024;

/// Mic-only capture at 48 kHz for one second: one padded tail frame on top
/// of the 46 full ones, timestamps advancing by exactly one frame.
#[test]
fn mic_only_second_produces_expected_frame_count() {
    let fifo = AudioFifo::new(1, 20 * AAC_FRAME, FifoPolicy::Grow);

    // The device delivers in ~480-sample blocks.
    let mut remaining = 48_000usize;
    while remaining > 0 {
        let block = remaining.min(480);
        fifo.write(&vec![0.1f32; block]).unwrap();
        remaining -= block;
    }

    let mut frames = 0u64;
    loop {
        let queued = fifo.size();
        if queued >= AAC_FRAME {
            fifo.read(AAC_FRAME).unwrap();
        } else if queued > 0 {
            // Tail shorter than one frame is padded with silence.
            fifo.read(queued).unwrap();
        } else {
            break;
        }
        frames += 1;
    }

    assert_eq!(frames, 48_000u64.div_ceil(AAC_FRAME as u64));
    assert_eq!(frames, 47);
}

#[test]
fn separate_audio_pts_increase_by_frame_size() {
    let mut last = None;
    for count in 0..47 {
        let pts = audio_packet_pts(ContainerFormat::Mp4, count, AAC_FRAME, 48_000);
        if let Some(previous) = last {
            assert_eq!(pts - previous, AAC_FRAME as i64);
        } else {
            assert_eq!(pts, 0);
        }
        last = Some(pts);
    }
}

/// Mix capture for 500 ms at 48 kHz: the number of amix output frames is
/// bounded by the shorter input.
#[test]
fn mix_cycle_count_matches_half_second_of_samples() {
    let samples = 24_000usize;
    let full_frames = samples / AAC_FRAME;
    assert_eq!(full_frames, 23);

    // MP4 and MKV disagree on the time base of the same mix count.
    assert_eq!(
        audio_packet_pts(ContainerFormat::Mp4, 23, AAC_FRAME, 48_000),
        23 * 1024
    );
    assert_eq!(
        audio_packet_pts(ContainerFormat::Mkv, 23, AAC_FRAME, 48_000),
        23 * 1024 * 1000 / 48_000
    );
}

/// Backpressure: a 60 fps producer against a 10 fps consumer never blocks
/// and sheds the oldest frames while the slot accounting holds.
#[test]
fn backpressure_drops_oldest_without_blocking() {
    let capacity = 8;
    let ring = VideoRing::with_capacity(capacity, 16);
    let mut popped = 0u64;

    for tick in 0..60 {
        ring.append(&[tick as u8; 16], 2, 2, 8, i64::from(tick) * 16_667);

        // Every sixth producer tick the consumer takes one frame.
        if tick % 6 == 5
            && let Some(frame) = ring.pop()
        {
            popped += 1;
            ring.recycle(frame);
        }

        assert_eq!(ring.len() + ring.free_len(), capacity);
    }

    let stats = ring.stats();
    assert_eq!(stats.appended, 60);
    assert!(stats.dropped >= stats.appended - popped - capacity as u64);

    // Ordering survives the shedding: indices strictly increase.
    let mut last_index = None;
    while let Some(frame) = ring.pop() {
        if let Some(last) = last_index {
            assert!(frame.index > last);
        }
        last_index = Some(frame.index);
        ring.recycle(frame);
    }
}

/// MKV keeps the FIFO bounded: a full buffer swallows writes without
/// growing, so the sample counter cannot drift from the clock.
#[test]
fn bounded_fifo_holds_capacity_under_pressure() {
    let fifo = AudioFifo::new(2, AAC_FRAME, FifoPolicy::Bounded);

    for _ in 0..100 {
        let _ = fifo.write(&vec![0.5f32; 480 * 2]).unwrap();
    }

    assert!(fifo.size() <= AAC_FRAME);
    assert_eq!(fifo.space(), AAC_FRAME - fifo.size());
}

/// Consecutive video frames at 25 fps land one tick apart in a 1/25 time
/// base and 40 ms apart in the MKV millisecond base.
#[test]
fn video_pts_tracks_capture_interval() {
    let t0 = 1_000_000i64;
    for n in 0..50 {
        let ts = t0 + n * 40_000;
        assert_eq!(video_packet_pts(ts, t0, 25), n);
        assert_eq!(video_packet_pts(ts, t0, 1000), n * 40);
    }
}

/// A packet can never precede the header, and a file that never got a
/// header also never gets a trailer.
#[test]
fn mux_writer_enforces_header_packet_trailer_order() {
    let dir = tempfile::tempdir().unwrap();
    let mux = MuxWriter::create(&dir.path().join("out.mkv")).unwrap();

    assert_eq!(mux.container(), ContainerFormat::Mkv);
    assert!(!mux.header_written());

    let mut packet = ffmpeg_next::Packet::empty();
    assert!(mux.write_packet(&mut packet).is_err());

    // No header was written, so the trailer is skipped; repeating the call
    // stays a no-op.
    mux.write_trailer().unwrap();
    mux.write_trailer().unwrap();
}

#[test]
fn container_follows_output_extension() {
    let dir = tempfile::tempdir().unwrap();
    let mp4 = MuxWriter::create(&dir.path().join("capture.mp4")).unwrap();
    assert_eq!(mp4.container(), ContainerFormat::Mp4);

    let mkv = MuxWriter::create(&dir.path().join("capture.mkv")).unwrap();
    assert_eq!(mkv.container(), ContainerFormat::Mkv);
}

#[test]
fn wait_before_start_is_an_error() {
    let mut controller = PipelineController::new(RecorderConfig::new("out.mp4"));
    controller
        .init_with(recorder::ProductClass::Standard)
        .unwrap();
    assert_eq!(controller.state(), PipelineState::Configured);

    assert!(controller.wait().is_err());
}
