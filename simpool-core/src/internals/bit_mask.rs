//! A bit mask representing the occupation (or not) of a group of 64 slots.

use crate::PowerOf2;

#[derive(Clone, Copy, Default)]
pub(crate) struct BitMask(u64);

impl BitMask {
    //  Safety:
    //  -   64 is a power of 2.
    pub(crate) const CAPACITY: PowerOf2 = unsafe { PowerOf2::new_unchecked(64) };

    /// Claims the lowest 0 bit, returns its index or None if all bits are claimed.
    pub(crate) fn claim_single(&mut self) -> Option<usize> {
        let candidate = (!self.0).trailing_zeros() as usize;

        //  All bits are ones, move on.
        if candidate == Self::capacity() { return None; }

        self.0 |= 1u64 << candidate;

        Some(candidate)
    }

    /// Releases bit at given index.
    ///
    /// Returns false, and leaves the mask untouched, if the bit was not claimed.
    pub(crate) fn release_single(&mut self, inner: usize) -> bool {
        debug_assert!(inner < Self::capacity());

        let inner_mask = 1u64 << inner;

        if self.0 & inner_mask == 0 {
            return false;
        }

        self.0 &= !inner_mask;
        true
    }

    /// Returns whether the bit at the given index is claimed.
    #[cfg(test)]
    pub(crate) fn is_claimed(&self, inner: usize) -> bool {
        debug_assert!(inner < Self::capacity());

        self.0 & (1u64 << inner) != 0
    }

    /// Returns the number of claimed bits.
    #[cfg(test)]
    pub(crate) fn claimed(&self) -> usize { self.0.count_ones() as usize }

    /// Returns the capacity as usize.
    pub(crate) fn capacity() -> usize { Self::CAPACITY.value() }
}
