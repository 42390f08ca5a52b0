//! Atomic helpers for statistics and counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// An atomic counter for statistics.
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create a new counter.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Increment the counter.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a value to the counter.
    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// An atomic gauge for tracking current values (can go up or down).
pub struct AtomicGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl AtomicGauge {
    /// Create a new gauge.
    pub const fn new(initial: usize) -> Self {
        Self {
            current: AtomicUsize::new(initial),
            peak: AtomicUsize::new(initial),
        }
    }

    /// Add to the gauge, updating the high-water mark.
    pub fn add(&self, value: usize) -> usize {
        let now = self.current.fetch_add(value, Ordering::Relaxed) + value;
        self.peak.fetch_max(now, Ordering::Relaxed);
        now
    }

    /// Subtract from the gauge.
    pub fn sub(&self, value: usize) -> usize {
        self.current.fetch_sub(value, Ordering::Relaxed) - value
    }

    /// Get the current value.
    pub fn get(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Highest value observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

impl Default for AtomicGauge {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_tracks_peak() {
        let gauge = AtomicGauge::new(0);
        gauge.add(64);
        gauge.add(32);
        gauge.sub(80);
        assert_eq!(gauge.get(), 16);
        assert_eq!(gauge.peak(), 96);
    }

    #[test]
    fn test_counter() {
        let counter = AtomicCounter::default();
        counter.increment();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }
}
