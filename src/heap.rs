//! The Global Heap: a single coalescing, boundary-tag free list guarded by
//! one spin lock. Serves medium/large requests directly and refill slabs
//! for the Thread Cache.

use crate::config::{align8, align_page, GLOBAL_ARENA_MIN_SIZE, FLAG_ALLOCATED};
use crate::os;
use crate::spinlock::Spinlock;
use crate::types::{
    is_allocated, size_with_flags, size_without_flags, BlockHeader, FOOTER_SIZE, HEADER_SIZE,
    MIN_BLOCK_SIZE,
};
use core::ptr::null_mut;

struct HeapState {
    free_list_head: *mut BlockHeader,
}

// SAFETY: all access to the raw pointers inside `HeapState` happens while
// holding the spin lock; the state never escapes the lock's guard.
unsafe impl Send for HeapState {}

pub struct GlobalHeap {
    state: Spinlock<HeapState>,
}

impl GlobalHeap {
    pub const fn new() -> Self {
        GlobalHeap {
            state: Spinlock::new(HeapState {
                free_list_head: null_mut(),
            }),
        }
    }

    /// Returns a payload pointer of at least `size` bytes, or null on OOM.
    /// The returned block is a slow-path block: ALLOCATED set, FAST_PATH
    /// clear.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        let needed = align8(size + HEADER_SIZE + FOOTER_SIZE).max(MIN_BLOCK_SIZE);
        let mut state = self.state.lock();
        loop {
            if let Some(block) = find_fit(&mut state, needed) {
                return unsafe { payload_of(block) };
            }

            let request = needed.max(GLOBAL_ARENA_MIN_SIZE);
            match new_arena(request) {
                Some(block) => unsafe { push_front(&mut state, block) },
                None => return null_mut(),
            }
        }
    }

    /// Releases a slow-path block obtained from [`GlobalHeap::alloc`].
    /// Passing null is a no-op.
    pub fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let mut state = self.state.lock();
        unsafe {
            let mut header = header_of(ptr);
            let mut size = size_without_flags((*header).size);
            debug_assert!(is_allocated((*header).size));
            debug_assert_eq!((*header).size, *footer_ptr(header));

            // Right neighbor: always safe to read, arenas carry a tail
            // sentinel so this never runs past the mapped region.
            let next = (header as *mut u8).add(size) as *mut BlockHeader;
            let next_tag = (*next).size;
            if !is_allocated(next_tag) {
                unlink(&mut state, next);
                size += size_without_flags(next_tag);
            }

            // Left neighbor: read the word just below the header. Arenas
            // carry a head sentinel so this never runs before the mapped
            // region either.
            let prev_footer = (header as *mut u8).sub(FOOTER_SIZE) as *mut usize;
            let prev_tag = *prev_footer;
            if !is_allocated(prev_tag) {
                let prev_size = size_without_flags(prev_tag);
                let prev = (header as *mut u8).sub(prev_size) as *mut BlockHeader;
                unlink(&mut state, prev);
                size += prev_size;
                header = prev;
            }

            write_header_and_footer(header, size, 0);
            push_front(&mut state, header);
        }
    }

    /// Number of blocks currently on the free list. Test-only introspection.
    #[cfg(test)]
    fn free_list_len(&self) -> usize {
        let state = self.state.lock();
        let mut count = 0;
        let mut cur = state.free_list_head;
        unsafe {
            while !cur.is_null() {
                count += 1;
                cur = (*cur).next_free;
            }
        }
        count
    }
}

#[inline]
unsafe fn header_of(payload: *mut u8) -> *mut BlockHeader {
    payload.sub(HEADER_SIZE) as *mut BlockHeader
}

#[inline]
unsafe fn payload_of(header: *mut BlockHeader) -> *mut u8 {
    (header as *mut u8).add(HEADER_SIZE)
}

#[inline]
unsafe fn footer_ptr(header: *mut BlockHeader) -> *mut usize {
    let total = size_without_flags((*header).size);
    (header as *mut u8).add(total - FOOTER_SIZE) as *mut usize
}

unsafe fn write_header_and_footer(header: *mut BlockHeader, total_size: usize, flags: usize) {
    let tagged = size_with_flags(total_size, flags);
    (*header).size = tagged;
    *((header as *mut u8).add(total_size - FOOTER_SIZE) as *mut usize) = tagged;
}

unsafe fn unlink(state: &mut HeapState, block: *mut BlockHeader) {
    let prev = (*block).prev_free;
    let next = (*block).next_free;
    if !prev.is_null() {
        (*prev).next_free = next;
    } else {
        state.free_list_head = next;
    }
    if !next.is_null() {
        (*next).prev_free = prev;
    }
}

unsafe fn push_front(state: &mut HeapState, block: *mut BlockHeader) {
    (*block).prev_free = null_mut();
    (*block).next_free = state.free_list_head;
    if !state.free_list_head.is_null() {
        (*state.free_list_head).prev_free = block;
    }
    state.free_list_head = block;
}

/// First-fit search. On a hit, unlinks the block, splits off a remainder
/// when it would be at least [`MIN_BLOCK_SIZE`], and returns the (now
/// allocated) block.
fn find_fit(state: &mut HeapState, needed: usize) -> Option<*mut BlockHeader> {
    unsafe {
        let mut cur = state.free_list_head;
        while !cur.is_null() {
            let total = size_without_flags((*cur).size);
            if total >= needed {
                unlink(state, cur);
                let remaining = total - needed;
                if remaining >= MIN_BLOCK_SIZE {
                    write_header_and_footer(cur, needed, FLAG_ALLOCATED);
                    let remainder = (cur as *mut u8).add(needed) as *mut BlockHeader;
                    write_header_and_footer(remainder, remaining, 0);
                    push_front(state, remainder);
                } else {
                    write_header_and_footer(cur, total, FLAG_ALLOCATED);
                }
                return Some(cur);
            }
            cur = (*cur).next_free;
        }
        None
    }
}

/// Maps a fresh arena of at least `min_usable` payload-bearing bytes and
/// returns its single free block, bracketed by two zero-size, permanently
/// ALLOCATED sentinels so boundary-tag reads in `free` never run off the
/// mapped region: a single footer word at the arena's base (read as the
/// left neighbor's footer by the first real block), and a full header-sized
/// region at the arena's tail (read as the right neighbor's header by the
/// last real block - its tag word, the last field of a `BlockHeader`, ends
/// up in the arena's final `FOOTER_SIZE` bytes).
fn new_arena(min_usable: usize) -> Option<*mut BlockHeader> {
    let requested = min_usable + FOOTER_SIZE + HEADER_SIZE;
    let mapped_len = align_page(requested);
    log::trace!("mapping new arena of {} bytes", mapped_len);

    let addr = os::map(mapped_len);
    if addr.is_null() {
        return None;
    }

    unsafe {
        let sentinel = size_with_flags(0, FLAG_ALLOCATED);
        *(addr as *mut usize) = sentinel;
        *((addr.add(mapped_len - FOOTER_SIZE)) as *mut usize) = sentinel;

        let block = addr.add(FOOTER_SIZE) as *mut BlockHeader;
        let block_size = mapped_len - FOOTER_SIZE - HEADER_SIZE;
        write_header_and_footer(block, block_size, 0);
        (*block).prev_free = null_mut();
        (*block).next_free = null_mut();
        Some(block)
    }
}

pub static GLOBAL_HEAP: GlobalHeap = GlobalHeap::new();
