//! The Thread Cache: per-thread segregated free lists for the 32 fast-path
//! size classes. No synchronization; refills in batches from the Global
//! Heap.

use crate::config::{FLAG_ALLOCATED, FLAG_FAST_PATH, NUM_SIZE_CLASSES, REFILL_BATCH};
use crate::heap::GLOBAL_HEAP;
use crate::types::{class_block_size, size_with_flags};
use core::cell::UnsafeCell;
use core::ptr::null_mut;

const PTR_SIZE: usize = core::mem::size_of::<usize>();

/// 32 head pointers, one per size class. A free block's list linkage lives
/// in the first word of its *payload* area (offset `PTR_SIZE` from the
/// block's base), not in the size-word slot at offset 0. The size word is
/// always rewritten fresh on handout instead of being trusted as leftover
/// next-pointer data, so a stale link can never be misread as a tag.
struct ThreadCache {
    classes: [*mut u8; NUM_SIZE_CLASSES],
}

impl ThreadCache {
    const fn new() -> Self {
        ThreadCache {
            classes: [null_mut(); NUM_SIZE_CLASSES],
        }
    }

    unsafe fn alloc(&mut self, class_index: usize) -> *mut u8 {
        // Class 0's 8-byte blocks are all size word, no room for a
        // next-pointer distinct from it; `small_class_for` never returns 0
        // for a nonzero request (`acquire(0)` is intercepted earlier), so
        // this would only fire on a misuse of the internal API.
        debug_assert!(class_index > 0, "class 0 has no payload to link through");
        if self.classes[class_index].is_null() && !refill(self, class_index) {
            return null_mut();
        }

        let block = self.classes[class_index];
        if block.is_null() {
            return null_mut();
        }
        self.classes[class_index] = *(block.add(PTR_SIZE) as *const *mut u8);

        let block_size = class_block_size(class_index);
        *(block as *mut usize) = size_with_flags(block_size, FLAG_ALLOCATED | FLAG_FAST_PATH);
        block.add(PTR_SIZE)
    }

    unsafe fn free(&mut self, ptr: *mut u8, class_index: usize) {
        let block = ptr.sub(PTR_SIZE);
        *(block.add(PTR_SIZE) as *mut *mut u8) = self.classes[class_index];
        self.classes[class_index] = block;
    }
}

// SAFETY: never shared across threads; each `ThreadCache` lives in its
// owning thread's TLS cell.
unsafe impl Send for ThreadCache {}

/// Pulls one slab of `class_block_size(class_index) * REFILL_BATCH` bytes
/// from the Global Heap and slices it into `REFILL_BATCH` equal blocks,
/// pushing each onto the class list in LIFO order. Leaves the list empty
/// (and returns `false`) if the Global Heap is out of memory.
unsafe fn refill(cache: &mut ThreadCache, class_index: usize) -> bool {
    let block_size = class_block_size(class_index);
    let slab = GLOBAL_HEAP.alloc(block_size * REFILL_BATCH);
    if slab.is_null() {
        return false;
    }

    log::trace!(
        "refilling class {} with {} blocks of {} bytes",
        class_index,
        REFILL_BATCH,
        block_size
    );

    for i in 0..REFILL_BATCH {
        let block = slab.add(i * block_size);
        *(block.add(PTR_SIZE) as *mut *mut u8) = cache.classes[class_index];
        cache.classes[class_index] = block;
    }
    true
}

thread_local! {
    static CACHE: UnsafeCell<ThreadCache> = UnsafeCell::new(ThreadCache::new());
}

/// Returns an 8-byte-aligned payload from the given class's free list,
/// refilling from the Global Heap if it is empty, or null on OOM.
pub fn small_alloc(class_index: usize) -> *mut u8 {
    CACHE
        .try_with(|cell| unsafe { (*cell.get()).alloc(class_index) })
        .unwrap_or(null_mut())
}

/// Pushes a block back onto its class's free list in LIFO order. If the
/// thread's TLS has already been torn down (thread exiting), the block is
/// abandoned. This is an accepted leak for short-lived threads.
pub fn small_free(ptr: *mut u8, class_index: usize) {
    let _ = CACHE.try_with(|cell| unsafe { (*cell.get()).free(ptr, class_index) });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{is_allocated, is_fast_path, size_without_flags};

    #[test]
    fn alloc_tags_handout_as_fast_path() {
        let class = 1; // 16-byte blocks
        let p = small_alloc(class);
        assert!(!p.is_null());
        assert_eq!(p as usize % 8, 0);
        unsafe {
            let tag = *(p.sub(PTR_SIZE) as *const usize);
            assert!(is_allocated(tag));
            assert!(is_fast_path(tag));
            assert_eq!(size_without_flags(tag), class_block_size(class));
        }
        small_free(p, class);
    }

    #[test]
    fn free_then_alloc_is_lifo_reuse() {
        // Class 0 (8-byte total blocks) has no payload bytes to host a
        // next-pointer, so it is never reached through `small_class_for`
        // (the smallest nonzero request already lands in class 1); exercise
        // the smallest class actually reachable from `acquire`.
        let class = 1; // 16-byte blocks
        let p1 = small_alloc(class);
        small_free(p1, class);
        let p2 = small_alloc(class);
        assert_eq!(p1, p2);
    }

    #[test]
    fn refill_then_reuse_crosses_batch_boundary() {
        let class = 1;
        let mut ptrs = Vec::new();
        for _ in 0..(REFILL_BATCH + 5) {
            let p = small_alloc(class);
            assert!(!p.is_null());
            ptrs.push(p);
        }
        let unique: std::collections::HashSet<_> = ptrs.iter().collect();
        assert_eq!(unique.len(), ptrs.len());
        for p in ptrs {
            small_free(p, class);
        }
    }
}
