//! Node Arena.
//!
//! The pool's own bookkeeping records cannot be allocated from the pool itself. The NodeArena supplies them instead,
//! carving fixed-size records out of slabs requested directly from the backing allocator.
//!
//! Each slab is a single backing region, laid out as:
//!
//! -   A header: the link to the next slab, the number of available slots, and a bit mask of the occupied slots.
//! -   `SLAB_CAPACITY` records, suitably aligned for `T`.
//!
//! Slabs are chained in a singly-linked list, in creation order, and are never returned until the arena is released.

use core::{
    marker,
    mem,
    ptr::{self, NonNull},
};

use crate::{BackingAllocator, Error, PowerOf2, Result, ALIGNMENT};
use crate::utils;

use super::bit_mask::BitMask;

//  Number of 64-bit words in the occupancy bit mask of a slab.
const SLAB_WORDS: usize = 4;

/// NodeArena
///
/// Arena of fixed-size records, with O(1) amortized allocation and deallocation.
pub(crate) struct NodeArena<T> {
    head: Option<NonNull<SlabHeader>>,
    slabs: usize,
    live: usize,
    _marker: marker::PhantomData<*const T>,
}

impl<T> NodeArena<T> {
    /// Number of records per slab.
    pub(crate) const SLAB_CAPACITY: usize = SLAB_WORDS * BitMask::CAPACITY.value();

    /// Creates an empty arena; no slab is allocated until the first record is.
    pub(crate) fn new() -> Self {
        debug_assert!(mem::size_of::<T>() > 0, "Zero-sized records are not supported");
        debug_assert!(mem::align_of::<T>() <= ALIGNMENT.value(), "Records over-aligned for the backing allocator");

        Self { head: None, slabs: 0, live: 0, _marker: marker::PhantomData }
    }

    /// Returns the size, in bytes, of a single slab.
    pub(crate) fn slab_size() -> usize { Self::records_offset() + Self::SLAB_CAPACITY * mem::size_of::<T>() }

    /// Returns the number of slabs.
    pub(crate) fn slab_count(&self) -> usize { self.slabs }

    /// Returns the number of live records.
    pub(crate) fn live_count(&self) -> usize { self.live }

    /// Returns the number of bytes used by live records.
    pub(crate) fn allocated_size(&self) -> usize { self.live_count() * mem::size_of::<T>() }

    /// Returns the number of bytes held by the arena, overhead included.
    pub(crate) fn total_size(&self) -> usize { self.slabs * Self::slab_size() }

    /// Allocates a record, initialized with `value`.
    ///
    /// The lowest free slot of the first slab with room is used; if no slab has room, a new slab is appended.
    ///
    /// Fails only if a new slab is needed and `backing` cannot supply it.
    pub(crate) fn allocate<B>(&mut self, backing: &B, value: T) -> Result<NonNull<T>>
        where
            B: BackingAllocator + ?Sized,
    {
        let mut tail = None;
        let mut current = self.head;

        while let Some(slab) = current {
            //  Safety:
            //  -   `slab` is a live slab of this arena.
            if let Some(record) = unsafe { Self::claim_in(slab) } {
                return Ok(self.initialize(record, value));
            }

            tail = current;

            //  Safety:
            //  -   `slab` is a live slab of this arena.
            current = unsafe { slab.as_ref().next };
        }

        let slab = self.new_slab(backing)?;

        match tail {
            //  Safety:
            //  -   `tail` is a live slab of this arena, exclusively accessed through `self`.
            Some(tail) => unsafe { (*tail.as_ptr()).next = Some(slab) },
            None => self.head = Some(slab),
        }

        //  Safety:
        //  -   `slab` was just appended.
        let record = unsafe { Self::claim_in(slab) }.ok_or(Error::OutOfMemory)?;

        Ok(self.initialize(record, value))
    }

    /// Deallocates a record, dropping it in place.
    ///
    /// Returns `Error::InvalidPointer` if `record` does not designate a live record of this arena.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `record` is no longer referenced.
    pub(crate) unsafe fn deallocate(&mut self, record: NonNull<T>) -> Result<()> {
        let address = record.as_ptr() as usize;
        let size = mem::size_of::<T>();

        let mut current = self.head;

        while let Some(slab) = current {
            let begin = slab.as_ptr() as usize + Self::records_offset();
            let end = begin + Self::SLAB_CAPACITY * size;

            if (begin..end).contains(&address) {
                let offset = address - begin;

                if offset % size != 0 {
                    return Err(Error::InvalidPointer);
                }

                let index = offset / size;
                let header = &mut *slab.as_ptr();
                let mask = &mut header.masks[index / BitMask::capacity()];

                //  Releasing first, so as not to drop a record that is not live.
                if !mask.release_single(index % BitMask::capacity()) {
                    return Err(Error::InvalidPointer);
                }

                header.available += 1;
                self.live -= 1;

                ptr::drop_in_place(record.as_ptr());

                return Ok(());
            }

            current = slab.as_ref().next;
        }

        Err(Error::InvalidPointer)
    }

    /// Returns every slab to `backing`.
    ///
    /// Records still live are not dropped.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `backing` is the allocator every slab was allocated from.
    /// -   Assumes that no record is referenced any longer.
    pub(crate) unsafe fn release<B>(&mut self, backing: &B)
        where
            B: BackingAllocator + ?Sized,
    {
        let mut current = self.head.take();

        while let Some(slab) = current {
            current = slab.as_ref().next;

            backing.deallocate(slab.cast());
        }

        log::debug!("NodeArena: released {} slabs, {} records live", self.slabs, self.live);

        self.slabs = 0;
        self.live = 0;
    }

    //  Internal; offset of the first record from the start of the slab.
    fn records_offset() -> usize { PowerOf2::align_of::<T>().round_up(mem::size_of::<SlabHeader>()) }

    //  Internal; allocates and initializes a new, empty, slab.
    #[cold]
    #[inline(never)]
    fn new_slab<B>(&mut self, backing: &B) -> Result<NonNull<SlabHeader>>
        where
            B: BackingAllocator + ?Sized,
    {
        let size = Self::slab_size();

        let pointer = backing.allocate(size)?;

        debug_assert!(utils::is_sufficiently_aligned_for(pointer.as_ptr() as usize, ALIGNMENT),
            "Incorrect alignment of slab: {:x}", pointer.as_ptr() as usize);

        let slab: NonNull<SlabHeader> = pointer.cast();
        let header = SlabHeader { next: None, available: Self::SLAB_CAPACITY, masks: [BitMask::default(); SLAB_WORDS] };

        //  Safety:
        //  -   `pointer` points to at least `size` bytes, sufficiently aligned, exclusively owned.
        unsafe { ptr::write(slab.as_ptr(), header) };

        self.slabs += 1;

        log::debug!("NodeArena: new slab {:x} of {} bytes, {} slabs", pointer.as_ptr() as usize, size, self.slabs);

        Ok(slab)
    }

    //  Internal; claims the lowest free slot of `slab`, if any.
    //
    //  #   Safety
    //
    //  -   Assumes that `slab` is a live slab of this arena, exclusively accessed.
    unsafe fn claim_in(slab: NonNull<SlabHeader>) -> Option<NonNull<T>> {
        let header = &mut *slab.as_ptr();

        if header.available == 0 {
            return None;
        }

        for (word, mask) in header.masks.iter_mut().enumerate() {
            if let Some(bit) = mask.claim_single() {
                header.available -= 1;

                let index = word * BitMask::capacity() + bit;
                let record = (slab.as_ptr() as *mut u8).add(Self::records_offset() + index * mem::size_of::<T>());

                return Some(NonNull::new_unchecked(record as *mut T));
            }
        }

        debug_assert!(false, "Slab {:x} has {} available slots, yet none free", slab.as_ptr() as usize,
            header.available);

        None
    }

    //  Internal; writes `value` in the freshly claimed `record`.
    fn initialize(&mut self, record: NonNull<T>, value: T) -> NonNull<T> {
        //  Safety:
        //  -   `record` was just claimed, hence is exclusively owned, sufficiently sized and aligned.
        unsafe { ptr::write(record.as_ptr(), value) };

        self.live += 1;

        record
    }
}

impl<T> Drop for NodeArena<T> {
    fn drop(&mut self) {
        debug_assert!(self.head.is_none(), "NodeArena dropped with {} slabs unreleased", self.slabs);
    }
}

#[repr(C)]
struct SlabHeader {
    next: Option<NonNull<SlabHeader>>,
    available: usize,
    masks: [BitMask; SLAB_WORDS],
}

#[cfg(test)]
mod tests {

use alloc::vec::Vec;

use super::*;
use super::super::test::TestBacking;

type TestArena = NodeArena<[usize; 4]>;

#[test]
fn node_arena_slab_size() {
    let header = mem::size_of::<SlabHeader>();
    assert_eq!(8 + 8 + 32, header);

    assert_eq!(256, TestArena::SLAB_CAPACITY);
    assert_eq!(header + 256 * 32, TestArena::slab_size());
}

#[test]
fn node_arena_allocate_lazily() {
    let backing = TestBacking::new();
    let mut arena = TestArena::new();

    assert_eq!(0, arena.slab_count());
    assert_eq!(0, arena.total_size());
    assert_eq!(0, backing.allocations());

    let record = arena.allocate(&backing, [1, 2, 3, 4]).unwrap();

    assert_eq!(1, arena.slab_count());
    assert_eq!(1, arena.live_count());
    assert_eq!(32, arena.allocated_size());
    assert_eq!(TestArena::slab_size(), arena.total_size());
    assert_eq!(1, backing.allocations());
    assert!(backing.is_live(record.as_ptr() as usize));

    //  Safety:
    //  -   `record` is live.
    assert_eq!([1, 2, 3, 4], unsafe { *record.as_ptr() });

    unsafe { arena.release(&backing) };

    assert_eq!(0, backing.live_regions());
}

#[test]
fn node_arena_allocate_lowest_slot() {
    let backing = TestBacking::new();
    let mut arena = TestArena::new();

    let records: Vec<_> = (0..4).map(|i| arena.allocate(&backing, [i; 4]).unwrap()).collect();

    for pair in records.windows(2) {
        assert_eq!(pair[0].as_ptr() as usize + 32, pair[1].as_ptr() as usize);
    }

    //  Safety:
    //  -   `records[1]` is live, and no longer referenced.
    unsafe { arena.deallocate(records[1]).unwrap() };

    //  The freed slot is the lowest free slot, and is reused first.
    let reused = arena.allocate(&backing, [9; 4]).unwrap();
    assert_eq!(records[1], reused);

    let next = arena.allocate(&backing, [10; 4]).unwrap();
    assert_eq!(records[3].as_ptr() as usize + 32, next.as_ptr() as usize);

    unsafe { arena.release(&backing) };
}

#[test]
fn node_arena_grow() {
    let backing = TestBacking::new();
    let mut arena = TestArena::new();

    let capacity = TestArena::SLAB_CAPACITY;

    let records: Vec<_> = (0..capacity + 1).map(|i| arena.allocate(&backing, [i; 4]).unwrap()).collect();

    assert_eq!(2, arena.slab_count());
    assert_eq!(capacity + 1, arena.live_count());
    assert_eq!(2, backing.allocations());

    //  Freeing a slot in the first slab makes it the first candidate again.
    //
    //  Safety:
    //  -   `records[7]` is live, and no longer referenced.
    unsafe { arena.deallocate(records[7]).unwrap() };

    let reused = arena.allocate(&backing, [0; 4]).unwrap();
    assert_eq!(records[7], reused);
    assert_eq!(2, arena.slab_count());

    unsafe { arena.release(&backing) };

    assert_eq!(0, arena.slab_count());
    assert_eq!(2, backing.deallocations());
    assert_eq!(0, backing.live_regions());
}

#[test]
fn node_arena_recycle() {
    let backing = TestBacking::new();
    let mut arena = TestArena::new();

    let mut live = Vec::new();

    for round in 0..10 * TestArena::SLAB_CAPACITY {
        live.push(arena.allocate(&backing, [round; 4]).unwrap());

        if live.len() > 100 {
            let record = live.remove(round % live.len());

            //  Safety:
            //  -   `record` is live, and no longer referenced.
            unsafe { arena.deallocate(record).unwrap() };
        }
    }

    assert_eq!(1, arena.slab_count());
    assert_eq!(live.len(), arena.live_count());

    unsafe { arena.release(&backing) };
}

#[test]
fn node_arena_deallocate_invalid() {
    let backing = TestBacking::new();
    let mut arena = TestArena::new();

    let record = arena.allocate(&backing, [0; 4]).unwrap();

    let foreign = [0usize; 4];
    let misaligned = NonNull::new((record.as_ptr() as usize + 8) as *mut [usize; 4]).unwrap();

    //  Safety:
    //  -   Invalid pointers are detected before being dereferenced.
    unsafe {
        assert_eq!(Err(Error::InvalidPointer), arena.deallocate(NonNull::from(&foreign)));
        assert_eq!(Err(Error::InvalidPointer), arena.deallocate(misaligned));

        assert_eq!(Ok(()), arena.deallocate(record));

        //  Double free.
        assert_eq!(Err(Error::InvalidPointer), arena.deallocate(record));
    }

    assert_eq!(0, arena.live_count());

    unsafe { arena.release(&backing) };
}

#[test]
fn node_arena_allocate_out_of_memory() {
    let backing = TestBacking::with_limit(TestArena::slab_size() - 1);
    let mut arena = TestArena::new();

    assert_eq!(Err(Error::OutOfMemory), arena.allocate(&backing, [0; 4]));
    assert_eq!(0, arena.slab_count());
    assert_eq!(1, backing.failures());

    backing.set_limit(None);

    assert!(arena.allocate(&backing, [0; 4]).is_ok());

    unsafe { arena.release(&backing) };
}

}
