//! # Pixel Buffer - Owned Byte Storage for Frames
//!
//! Two pieces:
//! - [`PixelBuffer`]: growable owned byte array. Empty means null.
//! - [`RingAlloc`]: head/tail bookkeeping that carves contiguous runs out
//!   of a fixed-capacity backing array in FIFO order.
//!
//! Neither type synchronises; the frame ring buffer serialises access.
//!
//! ```text
//!  capacity
//! ├──────────────────────────────────────────────┤
//! │ free │ head ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓ tail │   free    │   linear
//! │▓▓▓▓▓▓ tail │     free     │ head ▓▓▓▓▓│ gap │   wrapped
//! ```

use std::ops::Range;

// ============================================================================
// Pixel Buffer
// ============================================================================

/// Owned, resizable byte buffer.
///
/// A buffer with no bytes is "null": there is no allocation behind it, so
/// `is_null() == (len() == 0)` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer of `len` zeroed bytes
    pub fn zeroed(len: usize) -> Self {
        let mut buf = Self::new();
        buf.resize(len);
        buf
    }

    pub fn from_slice(src: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.copy(src);
        buf
    }

    /// Grow or shrink to `len` bytes. New bytes are zero. Same length is a no-op.
    pub fn resize(&mut self, len: usize) {
        if len == self.data.len() {
            return;
        }
        if len == 0 {
            self.cleanup();
            return;
        }
        self.data.resize(len, 0);
        if self.data.capacity() > len * 2 {
            self.data.shrink_to_fit();
        }
    }

    /// Resize to `src.len()` and copy it in
    pub fn copy(&mut self, src: &[u8]) {
        self.resize(src.len());
        self.data.copy_from_slice(src);
    }

    /// Release the allocation. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        self.data = Vec::new();
    }

    pub fn is_null(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

// ============================================================================
// Ring Allocation
// ============================================================================

/// FIFO region allocator over `capacity` bytes.
///
/// `alloc` hands out contiguous ranges at the tail, wrapping to offset 0
/// when the run does not fit before the end. `free` always releases from
/// the head, so ranges must be freed in the order they were allocated.
/// Freed bytes are only forgotten, never cleared.
#[derive(Debug, Clone)]
pub struct RingAlloc {
    capacity: usize,
    head: usize,
    tail: usize,
    size: usize,
    /// End of the data before the tail wrapped. Bytes from here to
    /// `capacity` are unused until the head passes them.
    wrap_at: Option<usize>,
}

impl RingAlloc {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            head: 0,
            tail: 0,
            size: 0,
            wrap_at: None,
        }
    }

    /// Reserve `n` contiguous bytes. `None` when no run of that length is free.
    pub fn alloc(&mut self, n: usize) -> Option<Range<usize>> {
        if n == 0 || n > self.capacity - self.size {
            return None;
        }
        if self.size == 0 {
            self.clear();
        }

        let start = match self.wrap_at {
            None if self.capacity - self.tail >= n => self.tail,
            None if self.head >= n => {
                self.wrap_at = Some(self.tail);
                0
            }
            Some(_) if self.head - self.tail >= n => self.tail,
            _ => return None,
        };

        self.tail = start + n;
        self.size += n;
        Some(start..start + n)
    }

    /// Release `n` bytes from the head. Fails only if `n > size()`.
    pub fn free(&mut self, n: usize) -> bool {
        if n > self.size {
            return false;
        }
        self.size -= n;

        match self.wrap_at {
            Some(wrap) if self.head + n >= wrap => {
                self.head = n - (wrap - self.head);
                self.wrap_at = None;
            }
            _ => self.head += n,
        }

        if self.size == 0 {
            self.clear();
        }
        true
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.size = 0;
        self.wrap_at = None;
    }

    /// Bytes currently allocated
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn head(&self) -> usize {
        self.head
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_zero_fills() {
        let mut buf = PixelBuffer::from_slice(&[7, 7, 7]);
        buf.resize(6);
        assert_eq!(buf.as_slice(), &[7, 7, 7, 0, 0, 0]);

        buf.resize(2);
        assert_eq!(buf.as_slice(), &[7, 7]);
    }

    #[test]
    fn test_null_tracks_length() {
        let mut buf = PixelBuffer::new();
        assert!(buf.is_null());

        buf.resize(16);
        assert!(!buf.is_null());

        buf.resize(0);
        assert!(buf.is_null());

        buf.copy(&[1, 2]);
        buf.cleanup();
        buf.cleanup();
        assert!(buf.is_null());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_copy_replaces_contents() {
        let mut buf = PixelBuffer::zeroed(10);
        buf.copy(&[1, 2, 3]);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_ring_linear_alloc() {
        let mut ring = RingAlloc::new(10);
        assert_eq!(ring.alloc(4), Some(0..4));
        assert_eq!(ring.alloc(4), Some(4..8));
        assert_eq!(ring.alloc(4), None);
        assert_eq!(ring.size(), 8);
    }

    #[test]
    fn test_ring_wraps_after_free() {
        let mut ring = RingAlloc::new(10);
        ring.alloc(4);
        ring.alloc(4);
        assert!(ring.free(4));

        // 2 bytes left at the end, 4 free at the start
        assert_eq!(ring.alloc(3), Some(0..3));
        assert_eq!(ring.size(), 7);
        assert_eq!(ring.alloc(2), None);

        // Head passes the gap and lands at the wrapped run
        assert!(ring.free(4));
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.size(), 3);
        assert_eq!(ring.alloc(7), Some(3..10));
    }

    #[test]
    fn test_ring_free_bounds() {
        let mut ring = RingAlloc::new(8);
        ring.alloc(3);
        assert!(!ring.free(4));
        assert!(ring.free(3));
        assert_eq!(ring.size(), 0);
        assert_eq!(ring.alloc(8), Some(0..8));
    }

    #[test]
    fn test_ring_rejects_oversize() {
        let mut ring = RingAlloc::new(8);
        assert_eq!(ring.alloc(0), None);
        assert_eq!(ring.alloc(9), None);
    }

    #[test]
    fn test_ring_fixed_slots_cycle() {
        // Equal-sized slots wrap without leaving a gap
        let mut ring = RingAlloc::new(12);
        for _ in 0..3 {
            ring.alloc(4);
        }
        for i in 0..20 {
            assert!(ring.free(4));
            let r = ring.alloc(4).unwrap();
            assert_eq!(r.start, (i % 3) * 4);
            assert!(ring.size() <= ring.capacity());
        }
    }
}
