//! Backing allocator over the global Rust allocator.

use core::{alloc::Layout, ptr::{self, NonNull}};

use alloc::alloc::{alloc as raw_alloc, dealloc as raw_dealloc};

use simpool_core::{BackingAllocator, Error, Result, ALIGNMENT};

/// Implementation of the BackingAllocator trait, over the global Rust allocator.
///
/// Each region is preceded by a header recording the size of the underlying allocation, so that it can be released
/// from the region pointer alone.
#[derive(Debug, Default)]
pub struct SystemBacking;

impl SystemBacking {
    const HEADER_SIZE: usize = ALIGNMENT.value();

    /// Creates an instance.
    pub const fn new() -> Self { Self }

    fn layout(size: usize) -> Result<Layout> {
        Layout::from_size_align(size, ALIGNMENT.value()).map_err(|_| Error::OutOfMemory)
    }
}

impl BackingAllocator for SystemBacking {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let total = size.checked_add(Self::HEADER_SIZE)
            .and_then(|total| ALIGNMENT.checked_round_up(total))
            .ok_or(Error::OutOfMemory)?;

        let layout = Self::layout(total)?;

        //  Safety:
        //  -   `layout` has a non-zero size.
        let base = NonNull::new(unsafe { raw_alloc(layout) }).ok_or(Error::OutOfMemory)?;

        //  Safety:
        //  -   `base` points to at least `HEADER_SIZE` writable bytes, suitably aligned for `usize`.
        //  -   `HEADER_SIZE` is less than `total`, hence the result is within the allocation.
        unsafe {
            ptr::write(base.as_ptr() as *mut usize, total);

            Ok(NonNull::new_unchecked(base.as_ptr().add(Self::HEADER_SIZE)))
        }
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>) {
        let base = pointer.as_ptr().sub(Self::HEADER_SIZE);
        let total = ptr::read(base as *const usize);

        //  Safety:
        //  -   `total` and `ALIGNMENT` formed a valid layout on allocation.
        let layout = Layout::from_size_align_unchecked(total, ALIGNMENT.value());

        raw_dealloc(base, layout);
    }
}
