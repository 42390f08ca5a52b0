//! Quarantine of retired blocks.
//!
//! Freed blocks are parked here instead of going straight back to the
//! underlying heap, which keeps their memory poisoned and unmapped from any
//! new allocation for a while. The queue is strict FIFO: once the byte
//! budget is exceeded the oldest blocks are evicted first.
//!
//! The queue stores block handles (base address and sizes) rather than
//! threading links through the retired memory itself.

use std::collections::VecDeque;

/// A block parked in the quarantine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuarantineEntry {
    /// Block base address (start of the header).
    pub base: usize,
    /// Padded size charged against the budget.
    pub padded_size: usize,
    /// Size the caller originally requested.
    pub user_size: usize,
}

/// Bounded FIFO of retired blocks.
#[derive(Debug)]
pub struct Quarantine {
    entries: VecDeque<QuarantineEntry>,
    /// Sum of `padded_size` over `entries`
    bytes: usize,
    budget: usize,
}

impl Quarantine {
    /// Create an empty quarantine holding at most `budget` bytes.
    pub fn new(budget: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            bytes: 0,
            budget,
        }
    }

    /// Byte budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Change the byte budget. Takes effect on the next trim.
    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// Total padded bytes currently quarantined.
    pub fn size(&self) -> usize {
        self.bytes
    }

    /// Number of quarantined blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if the budget is exceeded.
    pub fn is_over_budget(&self) -> bool {
        self.bytes > self.budget
    }

    /// Append a retired block at the tail.
    pub fn push(&mut self, entry: QuarantineEntry) {
        self.bytes += entry.padded_size;
        self.entries.push_back(entry);
    }

    /// Remove the oldest block.
    pub fn pop_oldest(&mut self) -> Option<QuarantineEntry> {
        let entry = self.entries.pop_front()?;
        self.bytes -= entry.padded_size;
        Some(entry)
    }

    /// Evict from the head until the queue fits its budget again.
    ///
    /// Returned entries are in eviction (oldest first) order; the caller
    /// releases them to the underlying heap.
    pub fn take_overflow(&mut self) -> Vec<QuarantineEntry> {
        let mut evicted = Vec::new();
        while self.is_over_budget() {
            match self.pop_oldest() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    /// Empty the queue, oldest first.
    pub fn drain_all(&mut self) -> Vec<QuarantineEntry> {
        self.bytes = 0;
        self.entries.drain(..).collect()
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &QuarantineEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(base: usize, padded_size: usize) -> QuarantineEntry {
        QuarantineEntry {
            base,
            padded_size,
            user_size: padded_size / 2,
        }
    }

    #[test]
    fn test_push_tracks_size() {
        let mut q = Quarantine::new(1024);
        q.push(entry(0x1000, 64));
        q.push(entry(0x2000, 128));
        assert_eq!(q.len(), 2);
        assert_eq!(q.size(), 192);
        assert!(!q.is_over_budget());
    }

    #[test]
    fn test_overflow_evicts_oldest_first() {
        let mut q = Quarantine::new(200);
        q.push(entry(0x1000, 100));
        q.push(entry(0x2000, 100));
        q.push(entry(0x3000, 100));
        assert!(q.is_over_budget());

        let evicted = q.take_overflow();
        assert_eq!(evicted, vec![entry(0x1000, 100)]);
        assert_eq!(q.size(), 200);
        assert_eq!(q.iter().map(|e| e.base).collect::<Vec<_>>(), vec![0x2000, 0x3000]);
    }

    #[test]
    fn test_oversized_block_passes_straight_through() {
        let mut q = Quarantine::new(100);
        q.push(entry(0x1000, 500));
        let evicted = q.take_overflow();
        assert_eq!(evicted.len(), 1);
        assert!(q.is_empty());
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_drain_all() {
        let mut q = Quarantine::new(usize::MAX);
        for i in 0..5 {
            q.push(entry(0x1000 * (i + 1), 32));
        }
        let drained = q.drain_all();
        assert_eq!(drained.len(), 5);
        assert_eq!(drained[0].base, 0x1000);
        assert_eq!(q.size(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn test_zero_budget_keeps_nothing() {
        let mut q = Quarantine::new(0);
        q.push(entry(0x1000, 32));
        assert_eq!(q.take_overflow().len(), 1);
        assert!(q.is_empty());
    }
}
