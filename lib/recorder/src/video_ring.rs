use std::{collections::VecDeque, sync::Mutex};
use wayland_capture::ProductClass;

/// One composed canvas frame in RGBA8888.
///
/// The pixel buffer is allocated when the ring is constructed and reused
/// across cycles; its contents are overwritten on every append and the
/// allocation is only dropped at pipeline teardown.
#[derive(Debug)]
pub struct CanvasFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,

    /// Capture timestamp in microseconds, monotonic, origin = stage start
    pub timestamp_us: i64,

    /// Monotonically increasing frame number
    pub index: u64,
}

impl CanvasFrame {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, Default)]
struct RingState {
    filled: VecDeque<CanvasFrame>,
    free: Vec<Vec<u8>>,
    next_index: u64,
    appended: u64,
    dropped: u64,
}

/// Counters accumulated over the lifetime of the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub appended: u64,
    pub dropped: u64,
}

/// Bounded ring of reusable frame slots.
///
/// Every slot is either in the filled queue or on the free list; producers
/// append to the tail and the single consumer pops from the head. A full
/// ring overwrites its oldest filled frame in place (drop-oldest), so
/// [`VideoRing::append`] never blocks and stays O(1) plus the pixel copy.
///
/// Both queues sit behind one mutex; `append`, `pop` and `recycle` all take
/// the same exclusion.
#[derive(Debug)]
pub struct VideoRing {
    state: Mutex<RingState>,
    capacity: usize,
}

impl VideoRing {
    /// Ring depth for the running architecture and hardware class.
    ///
    /// Memory-constrained targets hold fewer frames; an ARM system whose
    /// board is not in the GPU-readback allow-list keeps the full ring.
    pub fn default_capacity(product_class: ProductClass) -> usize {
        if cfg!(any(target_arch = "arm", target_arch = "aarch64")) {
            match product_class {
                ProductClass::GpuReadback => 60,
                ProductClass::Standard => 200,
            }
        } else if cfg!(any(target_arch = "mips64", target_arch = "loongarch64")) {
            60
        } else {
            200
        }
    }

    /// Creates the ring with `capacity` slots of `slot_bytes` each,
    /// allocated up front.
    pub fn with_capacity(capacity: usize, slot_bytes: usize) -> Self {
        assert!(capacity > 0);

        let state = RingState {
            filled: VecDeque::with_capacity(capacity),
            free: (0..capacity).map(|_| vec![0u8; slot_bytes]).collect(),
            ..Default::default()
        };

        Self {
            state: Mutex::new(state),
            capacity,
        }
    }

    /// Copies one frame into the ring. When no free slot is left the oldest
    /// filled frame is overwritten and counted as dropped.
    pub fn append(&self, bytes: &[u8], width: u32, height: u32, stride: u32, timestamp_us: i64) {
        let mut state = self.state.lock().unwrap();

        let mut buffer = if let Some(buffer) = state.free.pop() {
            buffer
        } else {
            let oldest = state
                .filled
                .pop_front()
                .expect("ring has neither free nor filled slots");
            state.dropped += 1;
            oldest.data
        };

        buffer.resize(bytes.len(), 0);
        buffer.copy_from_slice(bytes);

        let index = state.next_index;
        state.next_index += 1;
        state.appended += 1;

        state.filled.push_back(CanvasFrame {
            data: buffer,
            width,
            height,
            stride,
            timestamp_us,
            index,
        });
    }

    /// Takes the oldest filled frame. The caller owns it until handing the
    /// buffer back through [`VideoRing::recycle`].
    pub fn pop(&self) -> Option<CanvasFrame> {
        self.state.lock().unwrap().filled.pop_front()
    }

    /// Returns a popped frame's buffer to the free list.
    pub fn recycle(&self, frame: CanvasFrame) {
        self.state.lock().unwrap().free.push(frame.data);
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().filled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().filled.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_len(&self) -> usize {
        self.state.lock().unwrap().free.len()
    }

    pub fn stats(&self) -> RingStats {
        let state = self.state.lock().unwrap();
        RingStats {
            appended: state.appended,
            dropped: state.dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(tag: u8) -> Vec<u8> {
        vec![tag; 16]
    }

    #[test]
    fn test_default_capacity_never_shrinks_standard_boards() {
        let standard = VideoRing::default_capacity(ProductClass::Standard);
        let readback = VideoRing::default_capacity(ProductClass::GpuReadback);

        assert!(matches!(standard, 60 | 200));
        assert!(matches!(readback, 60 | 200));
        // The GPU-readback boards are the memory-constrained ones.
        assert!(readback <= standard);
    }

    #[test]
    fn test_slot_accounting_invariant() {
        let ring = VideoRing::with_capacity(4, 16);
        assert_eq!(ring.len() + ring.free_len(), 4);

        for i in 0..3 {
            ring.append(&frame_bytes(i), 2, 2, 8, i as i64);
            assert_eq!(ring.len() + ring.free_len(), 4);
        }

        let frame = ring.pop().unwrap();
        ring.recycle(frame);
        assert_eq!(ring.len() + ring.free_len(), 4);
    }

    #[test]
    fn test_pop_preserves_insertion_order() {
        let ring = VideoRing::with_capacity(4, 16);
        for i in 0..4u8 {
            ring.append(&frame_bytes(i), 2, 2, 8, i as i64);
        }

        for i in 0..4u8 {
            let frame = ring.pop().unwrap();
            assert_eq!(frame.data()[0], i);
            assert_eq!(frame.index, u64::from(i));
            ring.recycle(frame);
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn test_full_ring_drops_oldest() {
        let ring = VideoRing::with_capacity(2, 16);
        ring.append(&frame_bytes(0), 2, 2, 8, 0);
        ring.append(&frame_bytes(1), 2, 2, 8, 1);
        let free_before = ring.free_len();

        // Third append reuses the head slot.
        ring.append(&frame_bytes(2), 2, 2, 8, 2);
        assert_eq!(ring.free_len(), free_before);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.stats(), RingStats { appended: 3, dropped: 1 });

        // The tail is preserved, the oldest frame is gone.
        let first = ring.pop().unwrap();
        assert_eq!(first.data()[0], 1);
        let second = ring.pop().unwrap();
        assert_eq!(second.data()[0], 2);
        ring.recycle(first);
        ring.recycle(second);
    }

    #[test]
    fn test_indices_increase_across_drops() {
        let ring = VideoRing::with_capacity(1, 4);
        ring.append(&[0; 4], 1, 1, 4, 0);
        ring.append(&[1; 4], 1, 1, 4, 1);

        let frame = ring.pop().unwrap();
        assert_eq!(frame.index, 1);
        ring.recycle(frame);
    }

    #[test]
    fn test_append_accepts_larger_frame_after_layout_change() {
        let ring = VideoRing::with_capacity(2, 4);
        ring.append(&[1; 4], 1, 1, 4, 0);
        // A hot-plug can grow the canvas; the slot follows.
        ring.append(&[2; 16], 2, 2, 8, 1);

        if let Some(frame) = ring.pop() {
            ring.recycle(frame);
        }
        let frame = ring.pop().unwrap();
        assert_eq!(frame.data().len(), 16);
        ring.recycle(frame);
    }
}
