#![no_std]
#![deny(missing_docs)]

//! Sub-allocation pools over concrete backing allocators.
//!
//! The type `DynamicPool` sub-allocates many small, precisely-sized, allocations out of a few coarse regions. This
//! crate supplies the regions:
//!
//! -   `SystemBacking` obtains them from the global Rust allocator.
//! -   `MmapBacking` obtains them as anonymous mappings, on Linux.
//! -   `CountingBacking` wraps any other backing allocator, to observe or cap its use.
//!
//! #   Warning
//!
//! A pool is not thread-safe; sharing one across threads requires an external lock.

extern crate alloc;

mod counting;
mod platform;
mod system;

pub use simpool_core::{
    BackingAllocator, Configuration, DynamicPool, Error, ReclaimPolicy, Result, ALIGNMENT,
    DEFAULT_MIN_GROWTH_BYTES, DEFAULT_MIN_INITIAL_BYTES, DEFAULT_MIN_USAGE_THRESHOLD, DEFAULT_USAGE_THRESHOLD_FLOOR,
};

pub use counting::{CountingBacking, Statistics};
pub use system::SystemBacking;

#[cfg(target_os = "linux")]
pub use platform::MmapBacking;

/// A pool whose regions are obtained from the global Rust allocator.
pub type SystemPool = DynamicPool<SystemBacking>;

/// A pool whose regions are anonymous mappings.
#[cfg(target_os = "linux")]
pub type MmapPool = DynamicPool<MmapBacking>;
