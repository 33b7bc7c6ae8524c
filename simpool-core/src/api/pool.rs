//! Dynamic Pool
//!
//! The DynamicPool sub-allocates precisely-sized Blocks out of a handful of coarse regions obtained from a
//! BackingAllocator:
//!
//! -   Free Blocks are kept in address order, and searched best-fit.
//! -   Oversized Blocks are split, and the remainder is kept free.
//! -   Released Blocks coalesce with their free neighbours.
//! -   Idle regions are handed back to the BackingAllocator, as per the configured ReclaimPolicy.
//!
//! The metadata of the pool is stored in a NodeArena, whose slabs are obtained from the same BackingAllocator, and
//! never from the pool itself.
//!
//! #   Warning
//!
//! The pool performs no synchronization whatsoever; concurrent use requires an external lock.

use core::{cmp, ptr::NonNull};

use crate::internals::{Block, BlockStack, NodeArena, OrderedBlocks};
use crate::utils::{self, ALIGNMENT};

use super::{BackingAllocator, Configuration, Error, ReclaimPolicy, Result};

/// DynamicPool
///
/// A best-fit, coalescing, sub-allocator over a BackingAllocator.
pub struct DynamicPool<B: BackingAllocator> {
    configuration: Configuration,
    arena: NodeArena<Block>,
    free: OrderedBlocks,
    regions: OrderedBlocks,
    used: BlockStack,
    //  Sum of the sizes of the regions held.
    total_bytes: usize,
    //  Sum of the sizes requested for the used Blocks.
    alloc_bytes: usize,
    backing: B,
}

impl<B: BackingAllocator> DynamicPool<B> {
    /// Creates an empty pool, with the default configuration.
    ///
    /// No memory is requested from `backing` until the first allocation.
    pub fn new(backing: B) -> Self { Self::create(backing, Configuration::default()) }

    /// Creates an empty pool, with the given configuration.
    ///
    /// Returns `Error::InvalidConfiguration` if the configuration is rejected.
    pub fn with_configuration(backing: B, configuration: Configuration) -> Result<Self> {
        configuration.validate()?;

        Ok(Self::create(backing, configuration))
    }

    /// Returns the configuration.
    pub fn configuration(&self) -> &Configuration { &self.configuration }

    /// Returns a reference to the backing allocator.
    pub fn backing(&self) -> &B { &self.backing }

    /// Returns the sum of the sizes requested by the outstanding allocations.
    pub fn allocated_size(&self) -> usize { self.alloc_bytes }

    /// Returns the number of bytes held from the backing allocator, metadata included.
    pub fn total_size(&self) -> usize { self.total_bytes + self.arena.total_size() }

    /// Returns the number of free Blocks.
    pub fn free_block_count(&self) -> usize { self.free.len() }

    /// Returns the number of used Blocks, that is the number of outstanding allocations.
    pub fn used_block_count(&self) -> usize { self.used.len() }

    /// Returns the number of regions held from the backing allocator, metadata excluded.
    pub fn region_count(&self) -> usize { self.regions.len() }

    /// Returns the number of slabs of the metadata arena.
    pub fn arena_slab_count(&self) -> usize { self.arena.slab_count() }

    /// Returns the number of bytes used by live metadata records, out of the arena slabs.
    pub fn metadata_size(&self) -> usize { self.arena.allocated_size() }

    /// Allocates `size` bytes.
    ///
    /// The returned Block is `size` rounded up to `ALIGNMENT` bytes, and is aligned on `ALIGNMENT` as long as the
    /// backing allocator regions are. A request of 0 bytes is served with a Block of `ALIGNMENT` bytes.
    ///
    /// Returns `Error::OutOfMemory` if the backing allocator cannot supply a sufficiently large region, even after
    /// idle regions were reclaimed.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let aligned = match utils::align_size(size) {
            Some(0) => ALIGNMENT.value(),
            Some(aligned) => aligned,
            None => return Err(Error::OutOfMemory),
        };

        let block = match self.free.best_fit(aligned) {
            Some(block) => block,
            None => {
                self.grow(aligned)?;
                self.free.best_fit(aligned).ok_or(Error::OutOfMemory)?
            },
        };

        self.split(block, aligned)?;

        //  Safety:
        //  -   `block` is in the free list, hence live.
        let block_ref = unsafe { block.as_ref() };
        let address = block_ref.address();

        self.free.remove(address);
        block_ref.set_requested(size);

        //  Safety:
        //  -   `block` is live, and was unlinked from the free list.
        unsafe { self.used.push(block) };

        self.alloc_bytes += size;

        debug_assert!(block_ref.size() == aligned, "{} != {}", block_ref.size(), aligned);
        debug_assert!(self.alloc_bytes <= self.total_bytes, "{} > {}", self.alloc_bytes, self.total_bytes);

        log::trace!("DynamicPool: allocated {:x} ({} bytes for {})", address, aligned, size);

        NonNull::new(address as *mut u8).ok_or(Error::OutOfMemory)
    }

    /// Deallocates the memory located at `pointer`.
    ///
    /// Does nothing if `pointer` does not designate an outstanding allocation of this pool, such as a pointer
    /// already deallocated.
    pub fn deallocate(&mut self, pointer: NonNull<u8>) {
        if self.try_deallocate(pointer).is_err() {
            log::warn!("DynamicPool: ignored deallocation of unknown pointer {:x}", pointer.as_ptr() as usize);
        }
    }

    /// Deallocates the memory located at `pointer`.
    ///
    /// Returns `Error::InvalidPointer`, and leaves the pool untouched, if `pointer` does not designate an outstanding
    /// allocation of this pool.
    pub fn try_deallocate(&mut self, pointer: NonNull<u8>) -> Result<()> {
        let address = pointer.as_ptr() as usize;

        let block = self.used.remove(address).ok_or(Error::InvalidPointer)?;

        //  Safety:
        //  -   `block` was in the used list, hence live.
        let requested = unsafe { block.as_ref().requested() };

        debug_assert!(requested <= self.alloc_bytes, "{} > {}", requested, self.alloc_bytes);

        self.alloc_bytes -= requested;

        //  Safety:
        //  -   `block` is live, and was unlinked from the used list.
        unsafe { self.release(block) };

        log::trace!("DynamicPool: deallocated {:x} ({} bytes)", address, requested);

        self.apply_reclaim_policy();

        Ok(())
    }

    /// Hands back every region whose extent is entirely free to the backing allocator.
    ///
    /// Regions in which any Block is used are left untouched.
    ///
    /// Returns the number of bytes handed back.
    pub fn reclaim(&mut self) -> usize {
        let mut reclaimed = 0;
        let mut cursor = self.regions.first();

        while let Some(region) = cursor {
            //  Safety:
            //  -   `region` is in the region list, hence live.
            let region_ref = unsafe { region.as_ref() };

            cursor = self.regions.after(region_ref.address());

            let free = match self.free.at_or_before(region_ref.address()) {
                Some(free) => free,
                None => continue,
            };

            //  Safety:
            //  -   `free` is in the free list, hence live.
            if !unsafe { free.as_ref() }.covers(region_ref) {
                continue;
            }

            reclaimed += region_ref.size();

            //  Safety:
            //  -   `free` covers `region`.
            unsafe { self.give_back(region, free) };
        }

        reclaimed
    }

    //  Internal; creates an empty pool.
    fn create(backing: B, configuration: Configuration) -> Self {
        DynamicPool {
            configuration,
            arena: NodeArena::new(),
            free: OrderedBlocks::default(),
            regions: OrderedBlocks::default(),
            used: BlockStack::default(),
            total_bytes: 0,
            alloc_bytes: 0,
            backing,
        }
    }

    //  Internal; requests a new region of at least `aligned` bytes, and inserts it in the free list.
    //
    //  On failure of the backing allocator, idle regions are reclaimed and the request retried, once.
    #[cold]
    #[inline(never)]
    fn grow(&mut self, aligned: usize) -> Result<()> {
        let floor = if self.regions.is_empty() {
            self.configuration.min_initial_bytes
        } else {
            self.configuration.min_growth_bytes
        };

        let size = cmp::max(aligned, utils::align_size(floor).ok_or(Error::OutOfMemory)?);

        //  Metadata first, so that no region ever needs to be handed back for lack of it.
        let free = self.arena.allocate(&self.backing, Block::new(0, size, true))?;

        let region = match self.arena.allocate(&self.backing, Block::new(0, size, true)) {
            Ok(region) => region,
            Err(error) => {
                self.release_node(free);
                return Err(error);
            },
        };

        let pointer = match self.backing.allocate(size) {
            Ok(pointer) => pointer,
            Err(_) => {
                let reclaimed = self.reclaim();

                log::debug!("DynamicPool: backing allocator exhausted, reclaimed {} bytes", reclaimed);

                match self.backing.allocate(size) {
                    Ok(pointer) => pointer,
                    Err(_) => {
                        self.release_node(region);
                        self.release_node(free);
                        return Err(Error::OutOfMemory);
                    },
                }
            },
        };

        let address = pointer.as_ptr() as usize;

        debug_assert!(utils::is_sufficiently_aligned_for(address, ALIGNMENT),
            "Incorrect alignment of region: {:x}", address);

        //  Safety:
        //  -   `free` and `region` are live, and not yet linked anywhere.
        unsafe {
            free.as_ref().set_address(address);
            region.as_ref().set_address(address);

            self.regions.insert(region);

            //  Coalesces with the tail of the previous region, if adjacent and permitted.
            self.release(free);
        }

        self.total_bytes += size;

        log::debug!("DynamicPool: new region {:x} of {} bytes, {} bytes held", address, size, self.total_bytes);

        Ok(())
    }

    //  Internal; splits `block` so that it is exactly `aligned` bytes, keeping the remainder in the free list.
    fn split(&mut self, block: NonNull<Block>, aligned: usize) -> Result<()> {
        //  Safety:
        //  -   `block` is in the free list, hence live.
        let block_ref = unsafe { block.as_ref() };

        debug_assert!(block_ref.size() >= aligned, "{} < {}", block_ref.size(), aligned);

        if block_ref.size() == aligned {
            return Ok(());
        }

        let remainder = Block::new(block_ref.address() + aligned, block_ref.size() - aligned, false);
        let remainder = self.arena.allocate(&self.backing, remainder)?;

        block_ref.set_size(aligned);

        //  Safety:
        //  -   `remainder` is live, and not yet linked anywhere.
        unsafe { self.free.insert(remainder) };

        Ok(())
    }

    //  Internal; inserts `block` in the free list, coalescing it with its neighbours.
    //
    //  #   Safety
    //
    //  -   Assumes that `block` is live, and not linked in any list.
    unsafe fn release(&mut self, block: NonNull<Block>) {
        let merges_across_regions = self.configuration.reclaim.merges_across_regions();
        let is_mergeable = |block: &Block| merges_across_regions || !block.is_region_head();

        let block_ref = block.as_ref();

        let current = match self.free.before(block_ref.address()) {
            Some(previous) if previous.as_ref().precedes(block_ref) && is_mergeable(block_ref) => {
                let previous_ref = previous.as_ref();
                previous_ref.set_size(previous_ref.size() + block_ref.size());

                self.release_node(block);
                previous
            },
            _ => {
                self.free.insert(block);
                block
            },
        };

        let current_ref = current.as_ref();

        if let Some(next) = self.free.after(current_ref.address()) {
            let next_ref = next.as_ref();

            if current_ref.precedes(next_ref) && is_mergeable(next_ref) {
                self.free.remove(next_ref.address());
                current_ref.set_size(current_ref.size() + next_ref.size());

                self.release_node(next);
            }
        }
    }

    //  Internal; applies the reclaim policy, after a deallocation.
    fn apply_reclaim_policy(&mut self) {
        match self.configuration.reclaim {
            ReclaimPolicy::Exact { reclaim_on_deallocate } => {
                if reclaim_on_deallocate {
                    self.reclaim();
                }
            },
            ReclaimPolicy::Threshold { min_usage_threshold, usage_threshold_floor } => {
                if self.total_bytes <= usage_threshold_floor {
                    return;
                }

                let free_bytes = self.total_bytes - self.alloc_bytes;
                let free_fraction = free_bytes as f64 / self.total_bytes as f64;

                if free_fraction > min_usage_threshold {
                    let released = self.release_idle_regions();

                    log::debug!("DynamicPool: {}/{} bytes free, released {} bytes",
                        free_bytes, self.total_bytes + released, released);
                }
            },
        }
    }

    //  Internal; hands back every region exactly covered by a free Block.
    //
    //  Returns the number of bytes handed back.
    fn release_idle_regions(&mut self) -> usize {
        let mut released = 0;
        let mut cursor = self.regions.first();

        while let Some(region) = cursor {
            //  Safety:
            //  -   `region` is in the region list, hence live.
            let region_ref = unsafe { region.as_ref() };

            cursor = self.regions.after(region_ref.address());

            let free = match self.free.get(region_ref.address()) {
                Some(free) => free,
                None => continue,
            };

            //  Safety:
            //  -   `free` is in the free list, hence live.
            if unsafe { free.as_ref() }.size() != region_ref.size() {
                continue;
            }

            released += region_ref.size();

            //  Safety:
            //  -   `free` covers `region`, exactly.
            unsafe { self.give_back(region, free) };
        }

        released
    }

    //  Internal; hands `region` back to the backing allocator, carving its extent out of `free`.
    //
    //  The fragments of `free` below and above `region`, if any, remain in the free list; their metadata reuses the
    //  nodes of `free` and `region`.
    //
    //  #   Safety
    //
    //  -   Assumes that `region` is in the region list.
    //  -   Assumes that `free` is in the free list, and covers `region`.
    unsafe fn give_back(&mut self, region: NonNull<Block>, free: NonNull<Block>) {
        let (region_ref, free_ref) = (region.as_ref(), free.as_ref());

        debug_assert!(free_ref.covers(region_ref));

        let (address, size) = (region_ref.address(), region_ref.size());

        let lower = (free_ref.address(), address - free_ref.address());
        let upper = (region_ref.end(), free_ref.end() - region_ref.end());

        self.regions.remove(address);
        self.free.remove(free_ref.address());

        let mut spares = [Some(free), Some(region)];
        let mut spare = spares.iter_mut().filter_map(Option::take);

        for (fragment_address, fragment_size) in [lower, upper] {
            if fragment_size == 0 {
                continue;
            }

            if let Some(node) = spare.next() {
                let node_ref = node.as_ref();

                node_ref.set_address(fragment_address);
                node_ref.set_size(fragment_size);
                node_ref.set_region_head(self.regions.contains(fragment_address));

                self.free.insert(node);
            }
        }

        for node in spare {
            self.release_node(node);
        }

        self.backing.deallocate(NonNull::new_unchecked(address as *mut u8));
        self.total_bytes -= size;

        log::debug!("DynamicPool: returned region {:x} of {} bytes, {} bytes held", address, size, self.total_bytes);
    }

    //  Internal; returns a node to the arena.
    fn release_node(&mut self, node: NonNull<Block>) {
        //  Safety:
        //  -   `node` is no longer linked anywhere.
        let _result = unsafe { self.arena.deallocate(node) };

        debug_assert!(_result.is_ok(), "Node {:x} not owned by the arena", node.as_ptr() as usize);
    }
}

impl<B: BackingAllocator> Drop for DynamicPool<B> {
    fn drop(&mut self) {
        while let Some(block) = self.used.pop() {
            //  Safety:
            //  -   `block` was in the used list, hence live, and is now unlinked.
            unsafe {
                self.alloc_bytes -= block.as_ref().requested();
                self.release(block);
            }
        }

        debug_assert!(self.used.is_empty());

        self.reclaim();

        debug_assert!(self.regions.is_empty(), "{} regions left", self.regions.len());
        debug_assert!(self.free.is_empty(), "{} free Blocks left", self.free.len());

        //  Safety:
        //  -   Every slab was allocated from `self.backing`.
        //  -   No node is referenced any longer.
        unsafe { self.arena.release(&self.backing) };
    }
}

//
//  Test backdoors.
//

#[cfg(test)]
impl<B: BackingAllocator> DynamicPool<B> {
    //  Returns (address, size) of the free Blocks, in address order.
    pub(crate) fn free_blocks(&self) -> alloc::vec::Vec<(usize, usize)> {
        self.free.iter().map(|block| unsafe { (block.as_ref().address(), block.as_ref().size()) }).collect()
    }

    //  Returns (address, size) of the used Blocks, in address order.
    pub(crate) fn used_blocks(&self) -> alloc::vec::Vec<(usize, usize)> {
        let mut result: alloc::vec::Vec<_> =
            self.used.iter().map(|block| unsafe { (block.as_ref().address(), block.as_ref().size()) }).collect();
        result.sort();
        result
    }

    //  Returns (address, size) of the regions, in address order.
    pub(crate) fn regions(&self) -> alloc::vec::Vec<(usize, usize)> {
        self.regions.iter().map(|block| unsafe { (block.as_ref().address(), block.as_ref().size()) }).collect()
    }

    //  Checks the invariants of the pool.
    pub(crate) fn check_invariants(&self) {
        let mut blocks: alloc::vec::Vec<_> = self.free_blocks().into_iter().chain(self.used_blocks()).collect();
        blocks.sort();

        //  No overlap, and alignment.
        for pair in blocks.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "Overlap: {:x?}", pair);
        }

        for &(address, size) in &blocks {
            assert_eq!(0, address % ALIGNMENT, "{:x}", address);
            assert_eq!(0, size % ALIGNMENT, "{:x}", size);
        }

        //  Blocks and regions cover the same bytes.
        let regions = self.regions();

        let blocks_bytes: usize = blocks.iter().map(|&(_, size)| size).sum();
        let regions_bytes: usize = regions.iter().map(|&(_, size)| size).sum();

        assert_eq!(regions_bytes, blocks_bytes);
        assert_eq!(regions_bytes, self.total_bytes);

        for &(address, size) in &blocks {
            let region = regions.iter().rev().find(|&&(start, _)| start <= address);
            assert!(region.is_some(), "Block {:x} outside any region", address);

            //  Only blocks carved from merged regions may straddle regions, and those are contiguous.
            let end = address + size;
            let covered = regions.iter()
                .filter(|&&(start, length)| start < end && address < start + length)
                .map(|&(start, length)| cmp::min(end, start + length) - cmp::max(address, start))
                .sum::<usize>();
            assert_eq!(size, covered, "Block {:x} of {} bytes partially outside regions", address, size);
        }

        //  Counters.
        let requested: usize = self.used.iter().map(|block| unsafe { block.as_ref().requested() }).sum();

        assert_eq!(requested, self.alloc_bytes);
        assert!(self.alloc_bytes <= self.total_size());

        //  Every Block and region is backed by exactly one node.
        assert_eq!(self.free.len() + self.used.len() + self.regions.len(), self.arena.live_count());
    }
}
