//! A two-path dynamic memory allocator: a lock-free per-thread cache for
//! small requests, and a single-lock coalescing global heap for everything
//! else.
//!
//! The two exported entry points, [`acquire`] and [`release`], route purely
//! on the tagged size word every handout leaves at `payload - 8` (see
//! `types.rs`); `release` never needs to know which path a pointer came
//! from ahead of time. [`Tinyheap`] wraps both behind [`GlobalAlloc`] for use
//! as `#[global_allocator]`.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;

mod cache;
mod config;
mod heap;
mod os;
mod spinlock;
mod types;

use config::SMALL_ALLOC_THRESHOLD;
use heap::GLOBAL_HEAP;
use types::{is_fast_path, small_class_for};

const TAG_SIZE: usize = core::mem::size_of::<usize>();

/// Returns a pointer to a payload of at least `size` bytes, 8-byte aligned,
/// or null on failure or a zero-sized request.
///
/// Requests at or under [`config::SMALL_ALLOC_THRESHOLD`] whose tagged size
/// still fits the largest fast-path class are served from the calling
/// thread's cache; everything else goes straight to the Global Heap.
pub fn acquire(size: usize) -> *mut u8 {
    if size == 0 {
        return null_mut();
    }
    if size <= SMALL_ALLOC_THRESHOLD {
        if let Some(class_index) = small_class_for(size) {
            return cache::small_alloc(class_index);
        }
    }
    GLOBAL_HEAP.alloc(size)
}

/// Releases a pointer previously returned by [`acquire`]. Passing null is a
/// no-op.
///
/// Reads the 8-byte tagged word at `ptr - 8` to decide which path owns the
/// block: `FAST_PATH` set routes to the Thread Cache, clear routes to the
/// Global Heap. This single read is the entire routing decision; see
/// `types.rs` for why both paths share one tag layout.
pub fn release(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let tag = unsafe { *(ptr.sub(TAG_SIZE) as *const usize) };
    if is_fast_path(tag) {
        let class_index = types::size_without_flags(tag) / config::ALIGNMENT - 1;
        cache::small_free(ptr, class_index);
    } else {
        GLOBAL_HEAP.free(ptr);
    }
}

/// [`GlobalAlloc`] adapter over [`acquire`]/[`release`], for use as
/// `#[global_allocator]`. Adds no allocator semantics of its own: it maps a
/// [`Layout`]'s size onto `acquire`, and `alloc_zeroed` falls through to an
/// explicit zero-fill, since a block handed out from a free list may carry
/// stale bytes even though fresh arena memory from the Page Provider is
/// always zero-filled.
pub struct Tinyheap;

unsafe impl GlobalAlloc for Tinyheap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        acquire(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        release(ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = acquire(layout.size());
        if !ptr.is_null() {
            core::ptr::write_bytes(ptr, 0, layout.size());
        }
        ptr
    }
}
