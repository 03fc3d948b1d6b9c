//! The block layout shared by both paths.
//!
//! Every payload pointer this allocator ever hands out, whether fast or
//! slow, is preceded by exactly 8 bytes encoding a tagged size: bit 0 is
//! ALLOCATED, bit 1 is FAST_PATH. This module is the single place that
//! layout is defined, so the tagging scheme stays centralized instead of
//! being duplicated at each call site.

use crate::config::{align8, FLAG_ALLOCATED, FLAG_FAST_PATH, FLAG_MASK};
use core::mem::size_of;

/// A slow-path free-list node, placed at the base of every slow-path block
/// (allocated or free). Unlike the footer, it carries linkage fields, but
/// those are only meaningful while the block is on the global free list.
///
/// `size` is the last field, not the first, so it sits immediately before
/// the payload: `payload - 8` always lands on the tagged size word, on both
/// paths, letting the dispatcher route on one read regardless of which path
/// produced the pointer. `prev_free`/`next_free` sit ahead of it and are
/// only live while the block is actually on the free list.
#[repr(C)]
pub struct BlockHeader {
    pub prev_free: *mut BlockHeader,
    pub next_free: *mut BlockHeader,
    pub size: usize,
}

pub const HEADER_SIZE: usize = size_of::<BlockHeader>();
pub const FOOTER_SIZE: usize = size_of::<usize>();

/// Minimum size of a slow-path block (header + footer + one alignment
/// unit of payload). Splitting a block never leaves a free remainder
/// smaller than this; derived from the actual struct sizes rather than a
/// hardcoded constant, since those vary by pointer width.
pub const MIN_BLOCK_SIZE: usize = align8(HEADER_SIZE + FOOTER_SIZE + 8);

#[inline]
pub fn size_with_flags(size: usize, flags: usize) -> usize {
    (size & !FLAG_MASK) | flags
}

#[inline]
pub fn size_without_flags(tagged: usize) -> usize {
    tagged & !FLAG_MASK
}

#[inline]
pub fn is_allocated(tagged: usize) -> bool {
    tagged & FLAG_ALLOCATED != 0
}

#[inline]
pub fn is_fast_path(tagged: usize) -> bool {
    tagged & FLAG_FAST_PATH != 0
}

/// Fast-path class index for a payload request, or `None` if it must be
/// routed to the Global Heap (either because it is larger than
/// `SMALL_ALLOC_THRESHOLD`, or because its tagged size would not fit in the
/// largest fast class).
#[inline]
pub fn small_class_for(size: usize) -> Option<usize> {
    let aligned = align8(size + FOOTER_SIZE);
    if aligned > crate::config::MAX_SMALL_SIZE {
        None
    } else {
        Some(aligned / crate::config::ALIGNMENT - 1)
    }
}

/// Total block size (size word + payload) for a given class index.
#[inline]
pub fn class_block_size(class_index: usize) -> usize {
    (class_index + 1) * crate::config::ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FLAG_ALLOCATED, FLAG_FAST_PATH};

    #[test]
    fn round_trips_flags() {
        let tagged = size_with_flags(128, FLAG_ALLOCATED | FLAG_FAST_PATH);
        assert_eq!(size_without_flags(tagged), 128);
        assert!(is_allocated(tagged));
        assert!(is_fast_path(tagged));
    }

    #[test]
    fn class_boundaries() {
        assert_eq!(small_class_for(0), Some(0)); // aligned 8 -> class 0
        assert_eq!(small_class_for(248), Some(31)); // aligned 256 -> class 31 (last fast class)
        assert_eq!(small_class_for(249), None); // aligned 264 -> too big, strictly greater than 256
        assert_eq!(class_block_size(0), 8);
        assert_eq!(class_block_size(31), 256);
    }

    #[test]
    fn min_block_size_is_split_floor() {
        assert_eq!(MIN_BLOCK_SIZE % 8, 0);
        assert!(MIN_BLOCK_SIZE >= HEADER_SIZE + FOOTER_SIZE);
    }
}
