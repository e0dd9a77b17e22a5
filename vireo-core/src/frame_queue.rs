//! # Frame Queue - Bounded Ring Buffer Between Decoder and Display
//!
//! - Fixed capacity in frames (default 10)
//! - Drop-oldest admission: push never blocks and never grows
//! - One backing allocation, sized `capacity x frame bytes` on first push
//! - Null frames are rejected
//! - Lifetime push/pop/drop counters
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  push(&frame)  ┌──────────────────┐  pop()   ┌──────────┐
//! │ Worker   │───────────────►│ FrameRingBuffer  │─────────►│ Consumer │
//! │ Thread   │   (memcpy)     │  slots + backing │ (memcpy) │ Thread   │
//! └──────────┘                └──────────────────┘          └──────────┘
//! ```
//!
//! The lock covers slot bookkeeping and the byte copy only.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::frame::{DecodedFrame, PixelFormat};
use crate::pixel_buffer::{PixelBuffer, RingAlloc};

/// Frames kept when no `frame_cache` setting is given
pub const DEFAULT_FRAME_CACHE: usize = 10;

// ============================================================================
// Slots
// ============================================================================

/// Metadata for one buffered frame; pixels live in the shared backing buffer
#[derive(Debug, Clone)]
struct Slot {
    range: Range<usize>,
    width: u32,
    height: u32,
    timestamp_ms: i64,
    format: PixelFormat,
    picture_type: i32,
}

struct RingState {
    backing: PixelBuffer,
    alloc: RingAlloc,
    slots: VecDeque<Slot>,
    /// Byte size of the frames the backing buffer is laid out for
    frame_len: usize,
}

impl RingState {
    fn empty() -> Self {
        Self {
            backing: PixelBuffer::new(),
            alloc: RingAlloc::new(0),
            slots: VecDeque::new(),
            frame_len: 0,
        }
    }

    /// Lay the backing buffer out for `frame_len`-byte frames. Returns the
    /// number of frames discarded.
    fn relayout(&mut self, capacity: usize, frame_len: usize) -> usize {
        let discarded = self.slots.len();
        self.slots.clear();
        self.backing.resize(capacity * frame_len);
        self.alloc = RingAlloc::new(capacity * frame_len);
        self.frame_len = frame_len;
        discarded
    }

    fn pop_front(&mut self) -> Option<DecodedFrame> {
        let slot = self.slots.pop_front()?;
        let buffer = self
            .backing
            .as_slice()
            .get(slot.range.clone())
            .map(PixelBuffer::from_slice);
        self.alloc.free(slot.range.len());

        Some(DecodedFrame {
            buffer: buffer?,
            width: slot.width,
            height: slot.height,
            timestamp_ms: slot.timestamp_ms,
            format: slot.format,
            picture_type: slot.picture_type,
        })
    }

    fn evict_front(&mut self) -> bool {
        match self.slots.pop_front() {
            Some(slot) => self.alloc.free(slot.range.len()),
            None => false,
        }
    }
}

// ============================================================================
// Frame Ring Buffer
// ============================================================================

/// Thread-safe bounded FIFO of decoded frames with drop-oldest backpressure
pub struct FrameRingBuffer {
    capacity: usize,
    state: Mutex<RingState>,
    ready_cond: Condvar,
    frames_pushed: AtomicU64,
    frames_popped: AtomicU64,
    frames_dropped: AtomicU64,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(RingState::empty()),
            ready_cond: Condvar::new(),
            frames_pushed: AtomicU64::new(0),
            frames_popped: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Producer API (Worker Thread)
    // ========================================================================

    /// Copy `frame` in, evicting the oldest frame when full.
    ///
    /// Returns false (and changes nothing) for a null frame. A frame whose
    /// byte size differs from the current layout discards what is buffered
    /// and re-lays out the backing storage.
    pub fn push(&self, frame: &DecodedFrame) -> bool {
        if frame.is_null() {
            return false;
        }
        let len = frame.buffer.len();

        let mut state = self.state.lock();

        if state.frame_len != len {
            let discarded = state.relayout(self.capacity, len);
            if discarded > 0 {
                self.frames_dropped
                    .fetch_add(discarded as u64, Ordering::Relaxed);
                tracing::debug!(discarded, frame_len = len, "frame size changed, ring reset");
            }
        }

        if state.slots.len() >= self.capacity && state.evict_front() {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }

        let Some(range) = state.alloc.alloc(len) else {
            tracing::warn!(frame_len = len, "no room in frame ring");
            return false;
        };
        state.backing.as_mut_slice()[range.clone()].copy_from_slice(frame.buffer.as_slice());
        state.slots.push_back(Slot {
            range,
            width: frame.width,
            height: frame.height,
            timestamp_ms: frame.timestamp_ms,
            format: frame.format,
            picture_type: frame.picture_type,
        });
        drop(state);

        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        self.ready_cond.notify_one();
        true
    }

    // ========================================================================
    // Consumer API (Display Thread)
    // ========================================================================

    /// Oldest buffered frame, or `None` when empty
    pub fn pop(&self) -> Option<DecodedFrame> {
        let frame = self.state.lock().pop_front();
        if frame.is_some() {
            self.frames_popped.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Pop, waiting up to `timeout` for a frame to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<DecodedFrame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while state.slots.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            self.ready_cond.wait_for(&mut state, remaining);
        }

        let frame = state.pop_front();
        drop(state);
        if frame.is_some() {
            self.frames_popped.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    // ========================================================================
    // Control / Status API
    // ========================================================================

    /// Drop everything buffered and release the backing allocation
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.backing.cleanup();
        state.alloc = RingAlloc::new(0);
        state.frame_len = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RingStats {
        let state = self.state.lock();
        RingStats {
            buffered_frames: state.slots.len(),
            capacity: self.capacity,
            backing_bytes: state.backing.len(),
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_popped: self.frames_popped.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_CACHE)
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingStats {
    pub buffered_frames: usize,
    pub capacity: usize,
    pub backing_bytes: usize,
    pub frames_pushed: u64,
    pub frames_popped: u64,
    pub frames_dropped: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn numbered(n: i64) -> DecodedFrame {
        let mut frame = DecodedFrame::new(4, 4, PixelFormat::Iyuv);
        frame.timestamp_ms = n;
        frame.buffer.as_mut_slice()[0] = n as u8;
        frame
    }

    #[test]
    fn test_lazy_backing_allocation() {
        let ring = FrameRingBuffer::new(3);
        assert_eq!(ring.stats().backing_bytes, 0);

        ring.push(&numbered(1));
        assert_eq!(ring.stats().backing_bytes, 3 * 24);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let ring = FrameRingBuffer::new(4);
        for i in 0..50 {
            ring.push(&numbered(i));
            assert!(ring.len() <= ring.capacity());
        }
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_drop_oldest() {
        let ring = FrameRingBuffer::new(4);
        for i in 1..=9 {
            assert!(ring.push(&numbered(i)));
        }

        let popped: Vec<i64> = std::iter::from_fn(|| ring.pop())
            .map(|f| f.timestamp_ms)
            .collect();
        assert_eq!(popped, vec![6, 7, 8, 9]);

        let stats = ring.stats();
        assert_eq!(stats.frames_pushed, 9);
        assert_eq!(stats.frames_popped, 4);
        assert_eq!(stats.frames_dropped, 5);
    }

    #[test]
    fn test_pixels_survive_wraparound() {
        let ring = FrameRingBuffer::new(2);
        for i in 0..7 {
            ring.push(&numbered(i));
        }
        let a = ring.pop().unwrap();
        let b = ring.pop().unwrap();
        assert_eq!(a.buffer.as_slice()[0], 5);
        assert_eq!(b.buffer.as_slice()[0], 6);
        assert_eq!(a.width, 4);
        assert_eq!(a.format, PixelFormat::Iyuv);
    }

    #[test]
    fn test_null_frame_rejected() {
        let ring = FrameRingBuffer::new(4);
        ring.push(&numbered(1));

        let mut zero_width = numbered(2);
        zero_width.width = 0;
        assert!(!ring.push(&zero_width));
        assert!(!ring.push(&DecodedFrame::default()));

        assert_eq!(ring.len(), 1);
        assert_eq!(ring.stats().frames_pushed, 1);
    }

    #[test]
    fn test_frame_size_change_resets() {
        let ring = FrameRingBuffer::new(4);
        ring.push(&numbered(1));
        ring.push(&numbered(2));

        let big = DecodedFrame::new(8, 8, PixelFormat::Rgb);
        assert!(ring.push(&big));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.stats().frames_dropped, 2);
        assert_eq!(ring.pop().unwrap().format, PixelFormat::Rgb);
    }

    #[test]
    fn test_pop_empty() {
        let ring = FrameRingBuffer::default();
        assert!(ring.pop().is_none());
        assert!(ring.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_clear_releases_backing() {
        let ring = FrameRingBuffer::new(2);
        ring.push(&numbered(1));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.stats().backing_bytes, 0);
    }

    #[test]
    fn test_concurrent_fifo_order() {
        let ring = Arc::new(FrameRingBuffer::new(8));
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    ring.push(&numbered(i));
                }
            })
        };

        let mut last = -1;
        let mut seen = 0;
        while seen < 200 {
            match ring.pop_timeout(Duration::from_millis(200)) {
                Some(frame) => {
                    assert!(frame.timestamp_ms > last);
                    last = frame.timestamp_ms;
                    seen += 1;
                }
                None => break,
            }
        }
        producer.join().unwrap();

        let stats = ring.stats();
        assert_eq!(stats.frames_pushed, 200);
        assert_eq!(
            stats.frames_popped + stats.frames_dropped + stats.buffered_frames as u64,
            200
        );
    }
}
