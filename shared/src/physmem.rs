//! Physical frame accounting.
//!
//! One global [`FrameBitmap`] covers the whole 32-bit physical range, one
//! bit per 4 KiB frame. A set bit means the frame is in use or excluded
//! from the allocatable pool. The bitmap starts fully used; building the
//! kernel address space releases exactly the hole range, so frames handed
//! to tasks always come out of the hole.

use alloc::boxed::Box;
use alloc::vec;

use crate::bitmap;
use crate::config::{PAGE_COUNT, PAGE_SIZE};

/// Frame-granular view of physical memory.
pub struct FrameBitmap {
    words: Box<[u32]>,
}

impl FrameBitmap {
    /// Creates a bitmap with every frame marked used. Frames must be
    /// released explicitly before they can be allocated.
    pub fn new_full() -> Self {
        FrameBitmap {
            words: vec![u32::MAX; bitmap::words_for(PAGE_COUNT)].into_boxed_slice(),
        }
    }

    /// Index of the lowest free frame, or `None` when the pool is
    /// exhausted. Finding does not claim; the caller maps the frame (which
    /// marks it) or marks it explicitly.
    pub fn find_first_free(&self) -> Option<usize> {
        bitmap::find_first(&self.words, false, PAGE_COUNT, 0)
    }

    /// Marks the frame containing `addr` as in use.
    pub fn mark_used(&mut self, addr: u32) {
        bitmap::set(&mut self.words, (addr / PAGE_SIZE) as usize);
    }

    /// Returns the frame containing `addr` to the pool.
    pub fn mark_free(&mut self, addr: u32) {
        bitmap::reset(&mut self.words, (addr / PAGE_SIZE) as usize);
    }

    /// Whether the frame containing `addr` is marked used.
    pub fn is_used(&self, addr: u32) -> bool {
        bitmap::get(&self.words, (addr / PAGE_SIZE) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    const POOL_START: u32 = 0x0010_0000;
    const POOL_FRAMES: u32 = 4;

    fn bitmap_with_pool() -> FrameBitmap {
        let mut frames = FrameBitmap::new_full();
        for i in 0..POOL_FRAMES {
            frames.mark_free(POOL_START + i * PAGE_SIZE);
        }
        frames
    }

    #[test]
    fn full_bitmap_has_no_free_frames() {
        let frames = FrameBitmap::new_full();
        assert_eq!(frames.find_first_free(), None);
        assert!(frames.is_used(0));
        assert!(frames.is_used(0xFFFF_F000));
    }

    #[test]
    fn find_first_free_returns_the_lowest_frame() {
        let frames = bitmap_with_pool();
        assert_eq!(
            frames.find_first_free(),
            Some((POOL_START / PAGE_SIZE) as usize)
        );
        assert!(frames.is_used(POOL_START - PAGE_SIZE));
        assert!(!frames.is_used(POOL_START));
    }

    #[test]
    fn marking_claims_and_releases() {
        let mut frames = bitmap_with_pool();
        let mut claimed = BTreeSet::new();

        for _ in 0..POOL_FRAMES {
            let frame = frames.find_first_free().unwrap();
            frames.mark_used(frame as u32 * PAGE_SIZE);
            assert!(claimed.insert(frame));
        }
        assert_eq!(frames.find_first_free(), None);

        frames.mark_free(POOL_START + PAGE_SIZE);
        assert_eq!(
            frames.find_first_free(),
            Some((POOL_START / PAGE_SIZE + 1) as usize)
        );
    }

    #[test]
    fn marking_is_frame_granular() {
        let mut frames = FrameBitmap::new_full();
        frames.mark_free(POOL_START + 0x7FF);
        assert!(!frames.is_used(POOL_START));
        assert!(frames.is_used(POOL_START + PAGE_SIZE));
    }
}
