//! Flag sets accepted by the heap surface.
//!
//! These mirror the flag words of a native heap API so callers can pass
//! them straight through.

use bitflags::bitflags;

bitflags! {
    /// Options passed when a heap is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeapOptions: u32 {
        /// The caller serializes access itself. Accepted and recorded; the
        /// proxy always takes its own lock.
        const NO_SERIALIZE = 0x0000_0001;
        /// Raise a panic when an allocation fails, after setting the last
        /// error.
        const GENERATE_EXCEPTIONS = 0x0000_0004;
    }
}

bitflags! {
    /// Per-call allocation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// The caller serializes access itself.
        const NO_SERIALIZE = 0x0000_0001;
        /// Zero-fill the user region.
        const ZERO_MEMORY = 0x0000_0008;
        /// Fail a reallocation rather than move the block.
        const REALLOC_IN_PLACE_ONLY = 0x0000_0010;
    }
}

impl HeapOptions {
    /// No options set.
    pub const NONE: Self = Self::empty();
}

impl AllocFlags {
    /// No flags set.
    pub const NONE: Self = Self::empty();
}

/// Opaque heap settings forwarded to the underlying heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapInformation {
    /// Front-end allocator mode.
    CompatibilityMode,
    /// Terminate the process when the heap detects corruption.
    EnableTerminationOnCorruption,
    /// Initial size hint given at creation (read-only).
    ReservedSize,
    /// Maximum size given at creation, 0 for growable (read-only).
    MaximumSize,
}

/// One entry produced by walking a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapEntry {
    /// Start of the underlying allocation.
    pub address: usize,
    /// Size of the underlying allocation.
    pub size: usize,
    /// Whether the entry is in use (always true for tracked blocks).
    pub busy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_union() {
        let flags = AllocFlags::ZERO_MEMORY | AllocFlags::NO_SERIALIZE;
        assert!(flags.contains(AllocFlags::ZERO_MEMORY));
        assert!(flags.contains(AllocFlags::NO_SERIALIZE));
        assert!(!flags.contains(AllocFlags::REALLOC_IN_PLACE_ONLY));
        assert!(flags.contains(AllocFlags::NONE));
        assert_eq!(flags.bits(), 0x9);
    }
}
