//! Blocks
//!
//! A Block describes one contiguous extent of memory, and is owned by exactly one of the free list, the used list, or
//! the region list at any time.
//!
//! Blocks are stored in the NodeArena, and manipulated through `NonNull<Block>`; all fields are cells so that a Block
//! can be updated through a shared reference while other Blocks are being inspected.

use core::{
    cell::Cell,
    ptr::NonNull,
};

/// Block.
pub(crate) struct Block {
    address: Cell<usize>,
    size: Cell<usize>,
    requested: Cell<usize>,
    region_head: Cell<bool>,
    next: Cell<Option<NonNull<Block>>>,
}

impl Block {
    /// Creates a free Block.
    pub(crate) fn new(address: usize, size: usize, region_head: bool) -> Self {
        Block {
            address: Cell::new(address),
            size: Cell::new(size),
            requested: Cell::new(0),
            region_head: Cell::new(region_head),
            next: Cell::new(None),
        }
    }

    /// Returns the start of the extent.
    pub(crate) fn address(&self) -> usize { self.address.get() }

    /// Returns the size of the extent.
    pub(crate) fn size(&self) -> usize { self.size.get() }

    /// Returns the end of the extent, exclusive.
    pub(crate) fn end(&self) -> usize { self.address() + self.size() }

    /// Returns the size requested by the client, while used.
    pub(crate) fn requested(&self) -> usize { self.requested.get() }

    /// Returns whether the extent starts a backing region.
    pub(crate) fn is_region_head(&self) -> bool { self.region_head.get() }

    /// Returns whether `other` starts exactly where `self` ends.
    pub(crate) fn precedes(&self, other: &Block) -> bool { self.end() == other.address() }

    /// Returns whether the extent of `self` covers the extent of `other`.
    pub(crate) fn covers(&self, other: &Block) -> bool {
        self.address() <= other.address() && other.end() <= self.end()
    }

    pub(crate) fn set_address(&self, address: usize) { self.address.set(address); }

    pub(crate) fn set_size(&self, size: usize) { self.size.set(size); }

    pub(crate) fn set_requested(&self, requested: usize) { self.requested.set(requested); }

    pub(crate) fn set_region_head(&self, region_head: bool) { self.region_head.set(region_head); }
}

/// BlockStack.
///
/// An intrusive stack of Blocks, linked through `Block::next`; used to hold the used Blocks.
#[derive(Default)]
pub(crate) struct BlockStack {
    head: Option<NonNull<Block>>,
    length: usize,
}

impl BlockStack {
    /// Returns the number of Blocks.
    pub(crate) fn len(&self) -> usize { self.length }

    /// Returns whether the stack is empty, or not.
    pub(crate) fn is_empty(&self) -> bool { self.head.is_none() }

    /// Prepends the block to the head of the stack.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `block` is live, and not already linked in any stack.
    pub(crate) unsafe fn push(&mut self, block: NonNull<Block>) {
        block.as_ref().next.set(self.head);

        self.head = Some(block);
        self.length += 1;
    }

    /// Pops the head of the stack, if any.
    pub(crate) fn pop(&mut self) -> Option<NonNull<Block>> {
        let result = self.head?;

        //  Safety:
        //  -   Blocks in the stack are live.
        let next = unsafe { result.as_ref().next.replace(None) };

        self.head = next;
        self.length -= 1;

        Some(result)
    }

    /// Unlinks and returns the Block starting at `address`, if any.
    pub(crate) fn remove(&mut self, address: usize) -> Option<NonNull<Block>> {
        let mut previous: Option<NonNull<Block>> = None;
        let mut current = self.head;

        while let Some(block) = current {
            //  Safety:
            //  -   Blocks in the stack are live.
            let block_ref = unsafe { block.as_ref() };
            let next = block_ref.next.get();

            if block_ref.address() == address {
                match previous {
                    //  Safety:
                    //  -   Blocks in the stack are live.
                    Some(previous) => unsafe { previous.as_ref().next.set(next) },
                    None => self.head = next,
                }

                block_ref.next.set(None);
                self.length -= 1;

                return Some(block);
            }

            previous = current;
            current = next;
        }

        None
    }

    /// Returns an iterator over the Blocks, from head to tail.
    pub(crate) fn iter(&self) -> impl Iterator<Item = NonNull<Block>> + '_ {
        //  Safety:
        //  -   Blocks in the stack are live.
        core::iter::successors(self.head, |block| unsafe { block.as_ref().next.get() })
    }
}

#[cfg(test)]
mod tests {

use alloc::vec::Vec;

use super::*;

fn addresses(stack: &BlockStack) -> Vec<usize> {
    stack.iter().map(|block| unsafe { block.as_ref().address() }).collect()
}

#[test]
fn block_extent() {
    let block = Block::new(0x1000, 0x40, true);

    assert_eq!(0x1000, block.address());
    assert_eq!(0x40, block.size());
    assert_eq!(0x1040, block.end());
    assert_eq!(0, block.requested());
    assert!(block.is_region_head());

    let next = Block::new(0x1040, 0x10, false);
    let gap = Block::new(0x1050, 0x10, false);

    assert!(block.precedes(&next));
    assert!(!block.precedes(&gap));
    assert!(!next.precedes(&block));

    let inner = Block::new(0x1010, 0x30, false);

    assert!(block.covers(&inner));
    assert!(block.covers(&block));
    assert!(!inner.covers(&block));
    assert!(!block.covers(&gap));
}

#[test]
fn block_stack_push_pop() {
    let blocks = [Block::new(0x10, 16, false), Block::new(0x20, 16, false), Block::new(0x30, 16, false)];

    let mut stack = BlockStack::default();
    assert!(stack.is_empty());
    assert_eq!(None, stack.pop());

    for block in &blocks {
        unsafe { stack.push(NonNull::from(block)) };
    }

    assert_eq!(3, stack.len());
    assert_eq!(alloc::vec![0x30, 0x20, 0x10], addresses(&stack));

    assert_eq!(Some(NonNull::from(&blocks[2])), stack.pop());
    assert_eq!(Some(NonNull::from(&blocks[1])), stack.pop());
    assert_eq!(Some(NonNull::from(&blocks[0])), stack.pop());
    assert_eq!(None, stack.pop());
    assert_eq!(0, stack.len());
}

#[test]
fn block_stack_remove() {
    let blocks = [Block::new(0x10, 16, false), Block::new(0x20, 16, false), Block::new(0x30, 16, false)];

    let mut stack = BlockStack::default();

    for block in &blocks {
        unsafe { stack.push(NonNull::from(block)) };
    }

    assert_eq!(None, stack.remove(0x40));
    assert_eq!(3, stack.len());

    assert_eq!(Some(NonNull::from(&blocks[1])), stack.remove(0x20));
    assert_eq!(alloc::vec![0x30, 0x10], addresses(&stack));

    //  Removing twice finds nothing.
    assert_eq!(None, stack.remove(0x20));

    assert_eq!(Some(NonNull::from(&blocks[2])), stack.remove(0x30));
    assert_eq!(Some(NonNull::from(&blocks[0])), stack.remove(0x10));
    assert!(stack.is_empty());
}

}
