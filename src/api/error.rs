//! Heap errors and the per-thread last-error channel.
//!
//! Heap operations report failure the way a native heap API does: a
//! boolean (or null) return value plus a code stored for the calling thread.

use std::cell::Cell;

/// Reason a heap operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapError {
    /// The underlying heap could not satisfy the request.
    OutOfMemory,
    /// The pointer does not belong to a block tracked by this heap.
    InvalidParameter,
    /// The block was already freed.
    DoubleFree,
    /// The block's header, redzones or footer have been overwritten.
    CorruptBlock,
    /// The request is valid but not supported by this heap.
    NotSupported,
}

impl HeapError {
    /// Platform-style numeric code.
    pub const fn code(&self) -> u32 {
        match self {
            Self::OutOfMemory => 8,
            Self::InvalidParameter => 87,
            Self::DoubleFree => 1_000,
            Self::CorruptBlock => 1_392,
            Self::NotSupported => 50,
        }
    }
}

impl std::fmt::Display for HeapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "not enough memory"),
            Self::InvalidParameter => write!(f, "pointer is not a block of this heap"),
            Self::DoubleFree => write!(f, "block was already freed"),
            Self::CorruptBlock => write!(f, "block metadata is corrupt"),
            Self::NotSupported => write!(f, "operation not supported"),
        }
    }
}

impl std::error::Error for HeapError {}

thread_local! {
    static LAST_ERROR: Cell<Option<HeapError>> = const { Cell::new(None) };
}

/// Error recorded by the last failing heap call on this thread.
pub fn last_error() -> Option<HeapError> {
    LAST_ERROR.with(|e| e.get())
}

/// Record a failure for the calling thread.
pub fn set_last_error(error: HeapError) {
    LAST_ERROR.with(|e| e.set(Some(error)));
}

/// Forget the calling thread's last error.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| e.set(None));
}
