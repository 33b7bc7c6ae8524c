//! Implementation of Linux specific calls.

use core::ptr::{self, NonNull};

use simpool_core::{BackingAllocator, Error, PowerOf2, Result};

//  4 KB
const PAGE_SIZE: PowerOf2 = unsafe { PowerOf2::new_unchecked(4 * 1024) };

/// Implementation of the BackingAllocator trait, over anonymous private mappings.
///
/// Each region is a separate mapping, preceded by a header recording the length of the mapping, so that it can be
/// unmapped from the region pointer alone.
#[derive(Debug, Default)]
pub struct MmapBacking;

impl MmapBacking {
    /// Size of the header preceding each region, which is also the alignment of the regions.
    pub const HEADER_SIZE: usize = 64;

    /// Creates an instance.
    pub const fn new() -> Self { Self }
}

impl BackingAllocator for MmapBacking {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let length = size.checked_add(Self::HEADER_SIZE)
            .and_then(|length| PAGE_SIZE.checked_round_up(length))
            .ok_or(Error::OutOfMemory)?;

        let base = match mmap_allocate(length) {
            Some(base) => base,
            None => {
                log::debug!("MmapBacking: could not map {} bytes", length);
                return Err(Error::OutOfMemory);
            },
        };

        debug_assert!(base.as_ptr() as usize % PAGE_SIZE == 0,
            "Incorrect alignment of mapping: {:x}", base.as_ptr() as usize);

        //  Safety:
        //  -   `base` points to at least `HEADER_SIZE` writable bytes, suitably aligned for `usize`.
        //  -   `HEADER_SIZE` is less than `length`, hence the result is within the mapping.
        unsafe {
            ptr::write(base.as_ptr() as *mut usize, length);

            Ok(NonNull::new_unchecked(base.as_ptr().add(Self::HEADER_SIZE)))
        }
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>) {
        let base = pointer.as_ptr().sub(Self::HEADER_SIZE);
        let length = ptr::read(base as *const usize);

        debug_assert!(length % PAGE_SIZE == 0, "Corrupted header at {:x}: {}", base as usize, length);

        munmap_deallocate(base, length);
    }
}

//  Wrapper around `mmap`.
//
//  Returns a pointer to `size` bytes of memory, aligned on a page.
fn mmap_allocate(size: usize) -> Option<NonNull<u8>> {
    let length = size;
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    //  No specific address hint.
    let addr = ptr::null_mut();
    //  When used in conjunction with MAP_ANONYMOUS, fd is mandated to be -1 on some implementations.
    let fd = -1;
    //  When used in conjunction with MAP_ANONYMOUS, offset is mandated to be 0 on some implementations.
    let offset = 0;

    //  Safety:
    //  -   `addr`, `fd`, and `offset` are suitable for MAP_ANONYMOUS.
    let result = unsafe { libc::mmap(addr, length, prot, flags, fd, offset) };

    let result = if result != libc::MAP_FAILED { result as *mut u8 } else { ptr::null_mut() };
    NonNull::new(result)
}

//  Wrapper around `munmap`.
//
//  #   Panics
//
//  If `munmap` returns a non-0 result.
//
//  #   Safety
//
//  -   Assumes that `addr` points to a `mmap`ed area of at least `size` bytes.
//  -   Assumes that the range `[addr, addr + size)` is no longer in use.
unsafe fn munmap_deallocate(addr: *mut u8, size: usize) {
    let result = libc::munmap(addr as *mut libc::c_void, size);
    assert!(result == 0, "Could not munmap {:x}, {}: {}", addr as usize, size, result);
}
