use crate::RecorderError;
use std::{collections::VecDeque, sync::Mutex};

/// Hard ceiling on the sample capacity; growth past this point means the
/// consumer died and the arithmetic would soon overflow.
const MAX_FIFO_SAMPLES: usize = (i32::MAX / 2) as usize;

/// What happens when a write does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoPolicy {
    /// Enlarge the FIFO to `size + requested` (MP4 output).
    Grow,
    /// Refuse the write with no effect (MKV output, keeps the sample count
    /// aligned with the clock).
    Bounded,
}

#[derive(Debug)]
struct FifoState {
    /// Interleaved f32 values
    values: VecDeque<f32>,
    /// Capacity in samples (one sample spans all channels)
    capacity: usize,
}

/// Growable FIFO of interleaved f32 PCM, counted in samples.
///
/// One sample is one value per channel; all operations take the same
/// per-FIFO mutex. Samples come out in insertion order.
#[derive(Debug)]
pub struct AudioFifo {
    state: Mutex<FifoState>,
    policy: FifoPolicy,
    channels: usize,
}

impl AudioFifo {
    pub fn new(channels: u16, initial_samples: usize, policy: FifoPolicy) -> Self {
        assert!(channels > 0);

        Self {
            state: Mutex::new(FifoState {
                values: VecDeque::with_capacity(initial_samples * channels as usize),
                capacity: initial_samples,
            }),
            policy,
            channels: channels as usize,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Appends interleaved values. Returns the number of samples written:
    /// all of them, or zero when the bounded policy refuses the write.
    pub fn write(&self, interleaved: &[f32]) -> Result<usize, RecorderError> {
        let requested = interleaved.len() / self.channels;
        if requested == 0 {
            return Ok(0);
        }

        let mut state = self.state.lock().unwrap();
        let size = state.values.len() / self.channels;
        let writable = state.capacity - size;

        if requested > writable {
            match self.policy {
                FifoPolicy::Grow => {
                    let grown = size + requested;
                    if grown > MAX_FIFO_SAMPLES {
                        return Err(RecorderError::AudioOverflow(format!(
                            "fifo growth to {grown} samples exceeds the arithmetic limit"
                        )));
                    }
                    state.capacity = grown;
                }
                FifoPolicy::Bounded => return Ok(0),
            }
        }

        state
            .values
            .extend(interleaved[..requested * self.channels].iter().copied());

        Ok(requested)
    }

    /// Removes exactly `samples` samples, or nothing when fewer are queued.
    pub fn read(&self, samples: usize) -> Option<Vec<f32>> {
        let mut state = self.state.lock().unwrap();
        if state.values.len() < samples * self.channels {
            return None;
        }

        Some(state.values.drain(..samples * self.channels).collect())
    }

    /// Readable sample count.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().values.len() / self.channels
    }

    /// Writable sample count under the current capacity.
    pub fn space(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.capacity - state.values.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_matches_writes_minus_reads() {
        let fifo = AudioFifo::new(2, 8, FifoPolicy::Grow);
        fifo.write(&[0.0; 8]).unwrap(); // 4 samples
        fifo.write(&[0.0; 4]).unwrap(); // 2 samples
        assert_eq!(fifo.size(), 6);

        fifo.read(5).unwrap();
        assert_eq!(fifo.size(), 1);
    }

    #[test]
    fn test_fifo_order() {
        let fifo = AudioFifo::new(1, 4, FifoPolicy::Grow);
        fifo.write(&[1.0, 2.0, 3.0]).unwrap();

        assert_eq!(fifo.read(2), Some(vec![1.0, 2.0]));
        assert_eq!(fifo.read(1), Some(vec![3.0]));
        assert_eq!(fifo.read(1), None);
    }

    #[test]
    fn test_grow_policy_extends_capacity() {
        let fifo = AudioFifo::new(1, 2, FifoPolicy::Grow);
        assert_eq!(fifo.space(), 2);

        assert_eq!(fifo.write(&[0.0; 10]).unwrap(), 10);
        assert_eq!(fifo.size(), 10);
    }

    #[test]
    fn test_bounded_policy_refuses_oversize_write() {
        let fifo = AudioFifo::new(1, 4, FifoPolicy::Bounded);
        assert_eq!(fifo.write(&[0.0; 3]).unwrap(), 3);

        // Write would exceed the capacity: success with no effect.
        assert_eq!(fifo.write(&[0.0; 2]).unwrap(), 0);
        assert_eq!(fifo.size(), 3);

        // A fitting write still lands.
        assert_eq!(fifo.write(&[0.0; 1]).unwrap(), 1);
        assert_eq!(fifo.size(), 4);
    }

    #[test]
    fn test_read_more_than_available_has_no_effect() {
        let fifo = AudioFifo::new(2, 4, FifoPolicy::Grow);
        fifo.write(&[0.5; 6]).unwrap();

        assert_eq!(fifo.read(4), None);
        assert_eq!(fifo.size(), 3);
    }
}
