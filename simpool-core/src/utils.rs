//! A collection of utilities.

mod power_of_2;

pub use power_of_2::PowerOf2;

/// The alignment boundary of every Block handed out by the pool, and expected of every backing region.
//  Safety:
//  -   16 is a power of 2.
pub const ALIGNMENT: PowerOf2 = unsafe { PowerOf2::new_unchecked(16) };

/// Returns whether the address is sufficiently aligned for the given alignment.
pub(crate) fn is_sufficiently_aligned_for(address: usize, alignment: PowerOf2) -> bool {
    address % alignment == 0
}

/// Rounds `size` up to the pool alignment boundary, or None on overflow.
pub(crate) fn align_size(size: usize) -> Option<usize> { ALIGNMENT.checked_round_up(size) }
