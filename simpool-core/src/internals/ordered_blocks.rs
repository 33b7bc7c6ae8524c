//! An address-ordered set of Blocks.
//!
//! Holds the free list and the region list: Blocks are keyed by their start address, giving logarithmic insertion,
//! removal, and neighbour lookup.
//!
//! The key is the address of the Block at insertion; a Block whose address changes must be removed first, then
//! re-inserted.

use core::{
    ops::Bound,
    ptr::NonNull,
};

use alloc::collections::BTreeMap;

use super::block::Block;

#[derive(Default)]
pub(crate) struct OrderedBlocks(BTreeMap<usize, NonNull<Block>>);

impl OrderedBlocks {
    /// Returns the number of Blocks.
    pub(crate) fn len(&self) -> usize { self.0.len() }

    /// Returns whether the set is empty, or not.
    pub(crate) fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Inserts a Block, keyed by its current address.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `block` is live, and remains so until removed.
    pub(crate) unsafe fn insert(&mut self, block: NonNull<Block>) {
        let address = block.as_ref().address();

        let _previous = self.0.insert(address, block);
        debug_assert!(_previous.is_none(), "Two Blocks at {:x}", address);
    }

    /// Removes the Block keyed by `address`, if any.
    pub(crate) fn remove(&mut self, address: usize) -> Option<NonNull<Block>> { self.0.remove(&address) }

    /// Returns the Block keyed by `address`, if any.
    pub(crate) fn get(&self, address: usize) -> Option<NonNull<Block>> { self.0.get(&address).copied() }

    /// Returns whether a Block is keyed by `address`.
    pub(crate) fn contains(&self, address: usize) -> bool { self.0.contains_key(&address) }

    /// Returns the Block with the lowest address, if any.
    pub(crate) fn first(&self) -> Option<NonNull<Block>> { self.0.values().next().copied() }

    /// Returns the Block with the highest address strictly lower than `address`, if any.
    pub(crate) fn before(&self, address: usize) -> Option<NonNull<Block>> {
        self.0.range(..address).next_back().map(|(_, block)| *block)
    }

    /// Returns the Block with the highest address lower than or equal to `address`, if any.
    pub(crate) fn at_or_before(&self, address: usize) -> Option<NonNull<Block>> {
        self.0.range(..=address).next_back().map(|(_, block)| *block)
    }

    /// Returns the Block with the lowest address strictly greater than `address`, if any.
    pub(crate) fn after(&self, address: usize) -> Option<NonNull<Block>> {
        self.0.range((Bound::Excluded(address), Bound::Unbounded)).next().map(|(_, block)| *block)
    }

    /// Returns the smallest Block of at least `size` bytes, the lowest address first amongst equals.
    pub(crate) fn best_fit(&self, size: usize) -> Option<NonNull<Block>> {
        let mut best: Option<(usize, NonNull<Block>)> = None;

        for block in self.iter() {
            //  Safety:
            //  -   Blocks in the set are live.
            let candidate = unsafe { block.as_ref().size() };

            if candidate < size {
                continue;
            }

            //  Strictly smaller, so that the lowest address wins ties.
            if best.map(|(best_size, _)| candidate < best_size).unwrap_or(true) {
                best = Some((candidate, block));
            }

            if candidate == size {
                break;
            }
        }

        best.map(|(_, block)| block)
    }

    /// Returns an iterator over the Blocks, in ascending address order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = NonNull<Block>> + '_ { self.0.values().copied() }
}
