//! Page Provider: maps zero-filled, page-aligned memory from the OS.
//!
//! This is the allocator's only collaborator for actually growing the heap.
//! Wraps `mmap`/`munmap` on Unix and `VirtualAlloc`/`VirtualFree` on Windows
//! behind `log::warn!` diagnostics on failure. Just the commit-on-reserve
//! path is implemented: no large-page probing, no reset/decommit/protect.

use crate::config::PAGE_SIZE;
use core::ptr::null_mut;

#[cfg(not(windows))]
use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

#[cfg(windows)]
use winapi::{
    shared::minwindef::LPVOID,
    um::memoryapi::{VirtualAlloc, VirtualFree},
    um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE},
};

/// Reserve and commit `length` bytes of zero-filled, read/write, private,
/// anonymous memory. `length` must be a multiple of [`PAGE_SIZE`]; returns
/// null on failure or on a malformed `length`.
pub fn map(length: usize) -> *mut u8 {
    if length == 0 || length % PAGE_SIZE != 0 {
        debug_assert!(false, "Page Provider requires a page-multiple length");
        return null_mut();
    }

    #[cfg(not(windows))]
    {
        let p = unsafe {
            mmap(
                null_mut(),
                length,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if p == MAP_FAILED {
            log::warn!("mmap({} bytes) failed: {}", length, errno::errno());
            return null_mut();
        }
        p as *mut u8
    }

    #[cfg(windows)]
    {
        let p = unsafe {
            VirtualAlloc(
                null_mut(),
                length,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        if p.is_null() {
            log::warn!("VirtualAlloc({} bytes) failed", length);
            return null_mut();
        }
        p as *mut u8
    }
}

/// Release a region previously returned by [`map`]. Unused by the current
/// allocator design (arenas are never returned to the OS); provided so the
/// Page Provider's contract is complete.
#[allow(dead_code)]
pub fn unmap(addr: *mut u8, length: usize) {
    if addr.is_null() || length == 0 {
        return;
    }

    #[cfg(not(windows))]
    {
        let rc = unsafe { munmap(addr as *mut libc::c_void, length) };
        if rc != 0 {
            log::warn!("munmap({:p}, {} bytes) failed: {}", addr, length, errno::errno());
        }
    }

    #[cfg(windows)]
    {
        let ok = unsafe { VirtualFree(addr as LPVOID, 0, MEM_RELEASE) };
        if ok == 0 {
            log::warn!("VirtualFree({:p}) failed", addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_returns_page_aligned_zeroed_memory() {
        let p = map(PAGE_SIZE);
        assert!(!p.is_null());
        assert_eq!(p as usize % PAGE_SIZE, 0);
        unsafe {
            for i in 0..PAGE_SIZE {
                assert_eq!(*p.add(i), 0);
            }
        }
        unmap(p, PAGE_SIZE);
    }

    #[test]
    fn map_rejects_non_page_multiple() {
        assert!(map(1).is_null());
        assert!(map(0).is_null());
    }
}
