use crate::ContainerFormat;

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Per-encoded-stream timing state.
///
/// Appends pull the clock towards wall time shifted back by whatever is
/// still queued in front of the new data, and the clock never regresses, so
/// presentation timestamps derived from it are non-decreasing even when the
/// device delivers in bursts.
#[derive(Debug)]
pub struct AudioClock {
    sample_rate: u32,
    last_pts_us: i64,
    sample_count: u64,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        assert!(sample_rate > 0);
        Self {
            sample_rate,
            last_pts_us: 0,
            sample_count: 0,
        }
    }

    /// Called when samples are queued: `elapsed_us` is wall time since the
    /// stream started, `queued_samples` how many samples were already
    /// waiting before this append.
    pub fn note_append(&mut self, elapsed_us: i64, queued_samples: usize) {
        let shift = queued_samples as i64 * MICROS_PER_SECOND / i64::from(self.sample_rate);
        let candidate = elapsed_us - shift;
        if candidate > self.last_pts_us {
            self.last_pts_us = candidate;
        }
    }

    /// Advances the clock by one emitted chunk.
    pub fn advance(&mut self, samples: usize) {
        self.last_pts_us += samples as i64 * MICROS_PER_SECOND / i64::from(self.sample_rate);
        self.sample_count += samples as u64;
    }

    pub fn last_pts_us(&self) -> i64 {
        self.last_pts_us
    }

    /// The current timestamp expressed in a `1/den` time base.
    pub fn pts_in(&self, den: i32) -> i64 {
        self.last_pts_us * i64::from(den) / MICROS_PER_SECOND
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

/// Video packet timestamp: capture time relative to the first encoded
/// frame, rescaled from microseconds into the stream's `1/den` time base.
pub fn video_packet_pts(timestamp_us: i64, first_timestamp_us: i64, time_base_den: i32) -> i64 {
    (timestamp_us - first_timestamp_us) * i64::from(time_base_den) / MICROS_PER_SECOND
}

/// Audio packet timestamp for frame number `count`.
///
/// MP4 streams run on a `1/sample_rate` time base, MKV streams on `1/1000`;
/// the two formulas are kept distinct deliberately.
pub fn audio_packet_pts(
    container: ContainerFormat,
    count: u64,
    frame_size: usize,
    sample_rate: u32,
) -> i64 {
    match container {
        ContainerFormat::Mp4 => count as i64 * frame_size as i64,
        ContainerFormat::Mkv => {
            count as i64 * frame_size as i64 * 1000 / i64::from(sample_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_tracks_wall_time_minus_backlog() {
        let mut clock = AudioClock::new(48_000);

        // 1024 samples queued at t=50ms: shift is 1024/48k ≈ 21333us.
        clock.note_append(50_000, 1024);
        assert_eq!(clock.last_pts_us(), 50_000 - 21_333);
    }

    #[test]
    fn test_clock_never_regresses() {
        let mut clock = AudioClock::new(48_000);
        clock.note_append(100_000, 0);
        assert_eq!(clock.last_pts_us(), 100_000);

        // A delayed append with a large backlog would move time backwards.
        clock.note_append(90_000, 4096);
        assert_eq!(clock.last_pts_us(), 100_000);
    }

    #[test]
    fn test_advance_accumulates_samples() {
        let mut clock = AudioClock::new(48_000);
        clock.advance(1024);
        clock.advance(1024);

        assert_eq!(clock.sample_count(), 2048);
        assert_eq!(clock.last_pts_us(), 2 * (1024 * 1_000_000 / 48_000));
    }

    #[test]
    fn test_video_pts_starts_at_zero() {
        assert_eq!(video_packet_pts(1_234_567, 1_234_567, 25), 0);
    }

    #[test]
    fn test_video_pts_scaling() {
        // One second after the first frame at 25 fps is 25 ticks.
        assert_eq!(video_packet_pts(2_000_000, 1_000_000, 25), 25);
        // MKV rescales the same instant into milliseconds.
        assert_eq!(video_packet_pts(2_000_000, 1_000_000, 1000), 1000);
    }

    #[test]
    fn test_audio_pts_mp4_counts_samples() {
        assert_eq!(audio_packet_pts(ContainerFormat::Mp4, 0, 1024, 48_000), 0);
        assert_eq!(
            audio_packet_pts(ContainerFormat::Mp4, 47, 1024, 48_000),
            47 * 1024
        );
    }

    #[test]
    fn test_audio_pts_mkv_counts_milliseconds() {
        assert_eq!(
            audio_packet_pts(ContainerFormat::Mkv, 47, 1024, 48_000),
            47 * 1024 * 1000 / 48_000
        );
    }

    #[test]
    fn test_audio_pts_strictly_increasing() {
        for container in [ContainerFormat::Mp4, ContainerFormat::Mkv] {
            let mut last = -1;
            for count in 0..100 {
                let pts = audio_packet_pts(container, count, 1024, 48_000);
                assert!(pts > last, "{container:?} count {count}");
                last = pts;
            }
        }
    }
}
