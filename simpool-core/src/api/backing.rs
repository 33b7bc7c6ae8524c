//! Backing Allocator
//!
//! The BackingAllocator trait is used to request coarse regions of memory from the underlying source. By abstracting
//! the source, the same pool can sub-allocate device memory, pinned host memory, or mapped pages.

use core::ptr::NonNull;

use super::Result;

/// Abstraction of a coarse-grained, possibly failing, source of memory regions.
pub trait BackingAllocator {
    /// Allocates a fresh region of at least `size` bytes.
    ///
    /// Returns `Error::OutOfMemory` if the request cannot be satisfied.
    ///
    /// The pool assumes that the returned pointer is aligned on _at least_ `ALIGNMENT` bytes, and that `size` bytes
    /// starting at the pointer are usable.
    fn allocate(&self, size: usize) -> Result<NonNull<u8>>;

    /// Deallocates the supplied region.
    ///
    /// #   Safety
    ///
    /// The caller should no longer reference the memory after calling this function.
    ///
    /// `deallocate` assumes that:
    /// -   `pointer` was allocated by this instance.
    /// -   `pointer` is the value returned by `allocate`, and not an interior pointer.
    unsafe fn deallocate(&self, pointer: NonNull<u8>);
}

impl<B: BackingAllocator + ?Sized> BackingAllocator for &B {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>> { (**self).allocate(size) }

    unsafe fn deallocate(&self, pointer: NonNull<u8>) { (**self).deallocate(pointer) }
}
