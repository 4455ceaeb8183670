//! Spill slot arithmetic shared by spill data properties and user accessors.

/// Spill arrays grow in multiples of this many slots.
pub const SPILL_RATE: usize = 8;

/// Round `size` up to a multiple of `alignment` (a power of two).
#[inline]
pub(crate) fn align_up(size: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// Spill array length needed to address `slot`.
#[inline]
pub fn spill_allocation_length(slot: usize) -> usize {
    align_up(slot + 1, SPILL_RATE)
}

/// Free-slot set index of spill slot `slot` in a shape whose field maximum is
/// `field_maximum`. Field slots occupy the range below it.
#[inline]
pub(crate) fn free_slot_index(slot: usize, field_maximum: usize) -> usize {
    field_maximum + slot
}
