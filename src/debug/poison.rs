//! Memory poisoning for debugging.
//!
//! Fills freed memory with a known pattern so that writes made through a
//! dangling pointer can be spotted when the block leaves quarantine.

/// Pattern used to poison freed memory.
pub const FREED_PATTERN: u8 = 0xCD;

/// Poison a region of memory with the freed pattern.
///
/// # Safety
///
/// The memory region must be valid and writable.
pub unsafe fn poison_freed(ptr: *mut u8, size: usize) {
    std::ptr::write_bytes(ptr, FREED_PATTERN, size);
}

/// Offset of the first byte that no longer holds the freed pattern.
///
/// # Safety
///
/// The memory region must be valid for reads.
pub unsafe fn first_unpoisoned(ptr: *const u8, size: usize) -> Option<usize> {
    (0..size).find(|&i| *ptr.add(i) != FREED_PATTERN)
}
