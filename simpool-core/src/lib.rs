#![no_std]

#![deny(missing_docs)]

//! Building blocks for a sub-allocator over coarse memory.
//!
//! simpool-core turns a small number of large regions, obtained from an expensive or coarse-grained source such as
//! device memory, pinned host memory, or mapped pages, into many small precisely-sized allocations. It contains:
//! -   A backing allocator trait, used to obtain the large regions to be carved up.
//! -   A dynamic pool, sub-allocating best-fit from those regions, coalescing on release, and handing idle regions
//!     back to the source.

extern crate alloc;

mod api;
mod internals;
mod utils;

pub use api::*;
pub use utils::{PowerOf2, ALIGNMENT};
