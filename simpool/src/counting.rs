//! Counting Backing Allocator
//!
//! A decorator over any BackingAllocator, which records the regions handed out and optionally caps the number of
//! live bytes, to simulate a device with limited memory.

use core::{
    cell::{Cell, RefCell},
    ptr::NonNull,
};

use alloc::collections::BTreeMap;

use simpool_core::{BackingAllocator, Error, Result};

/// Statistics of a CountingBacking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Number of successful allocations.
    pub allocations: usize,
    /// Number of deallocations.
    pub deallocations: usize,
    /// Number of allocations refused, by the limit or by the inner allocator.
    pub failures: usize,
    /// Number of regions currently live.
    pub live_regions: usize,
    /// Number of bytes currently live.
    pub live_bytes: usize,
    /// Highest number of bytes live at any point.
    pub peak_bytes: usize,
}

/// CountingBacking
///
/// Forwards to the inner BackingAllocator, keeping track of the live regions.
pub struct CountingBacking<B> {
    inner: B,
    limit: Cell<Option<usize>>,
    live: RefCell<BTreeMap<usize, usize>>,
    statistics: Cell<Statistics>,
}

impl<B: BackingAllocator> CountingBacking<B> {
    /// Creates an instance, without limit.
    pub fn new(inner: B) -> Self {
        CountingBacking {
            inner,
            limit: Cell::new(None),
            live: RefCell::new(BTreeMap::new()),
            statistics: Cell::new(Statistics::default()),
        }
    }

    /// Creates an instance, refusing any allocation which would bring the live bytes above `limit`.
    pub fn with_limit(inner: B, limit: usize) -> Self {
        let result = Self::new(inner);
        result.set_limit(Some(limit));
        result
    }

    /// Returns the limit, if any.
    pub fn limit(&self) -> Option<usize> { self.limit.get() }

    /// Sets the limit, or lifts it with None.
    ///
    /// Lowering the limit below the live bytes does not affect live regions, only future allocations.
    pub fn set_limit(&self, limit: Option<usize>) { self.limit.set(limit); }

    /// Returns the statistics.
    pub fn statistics(&self) -> Statistics { self.statistics.get() }

    /// Returns the inner allocator.
    pub fn inner(&self) -> &B { &self.inner }

    /// Returns whether `pointer` is the start of a live region.
    pub fn is_live(&self, pointer: NonNull<u8>) -> bool {
        self.live.borrow().contains_key(&(pointer.as_ptr() as usize))
    }

    fn update<F>(&self, fun: F)
        where
            F: FnOnce(&mut Statistics),
    {
        let mut statistics = self.statistics.get();
        fun(&mut statistics);
        self.statistics.set(statistics);
    }
}

impl<B: BackingAllocator> BackingAllocator for CountingBacking<B> {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let live_bytes = self.statistics.get().live_bytes;

        let within_limit = match self.limit.get() {
            Some(limit) => live_bytes.checked_add(size).map(|total| total <= limit).unwrap_or(false),
            None => true,
        };

        let result = if within_limit { self.inner.allocate(size) } else { Err(Error::OutOfMemory) };

        match result {
            Ok(pointer) => {
                self.live.borrow_mut().insert(pointer.as_ptr() as usize, size);

                self.update(|statistics| {
                    statistics.allocations += 1;
                    statistics.live_regions += 1;
                    statistics.live_bytes += size;
                    statistics.peak_bytes = core::cmp::max(statistics.peak_bytes, statistics.live_bytes);
                });
            },
            Err(_) => {
                log::debug!("CountingBacking: refused {} bytes, {} bytes live", size, live_bytes);

                self.update(|statistics| statistics.failures += 1);
            },
        }

        result
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>) {
        let size = self.live.borrow_mut().remove(&(pointer.as_ptr() as usize));

        debug_assert!(size.is_some(), "Unknown region {:x}", pointer.as_ptr() as usize);

        if let Some(size) = size {
            self.update(|statistics| {
                statistics.deallocations += 1;
                statistics.live_regions -= 1;
                statistics.live_bytes -= size;
            });
        }

        self.inner.deallocate(pointer);
    }
}
