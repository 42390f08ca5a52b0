//! Synchronization primitives.
//!
//! Provides thin wrappers over std or parking_lot mutexes, plus the
//! relaxed counters used for heap statistics.

pub(crate) mod atomics;
pub(crate) mod mutex;
