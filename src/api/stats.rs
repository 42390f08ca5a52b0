//! Heap proxy statistics.

use crate::util::size::format_bytes;

/// Snapshot of a heap proxy's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Successful allocations (including the new half of reallocations).
    pub allocation_count: u64,

    /// Successful frees.
    pub free_count: u64,

    /// User bytes in blocks currently allocated.
    pub live_bytes: usize,

    /// Peak of `live_bytes`.
    pub peak_live_bytes: usize,

    /// Padded bytes currently quarantined.
    pub quarantine_bytes: usize,

    /// Blocks currently quarantined.
    pub quarantine_blocks: usize,

    /// Blocks evicted from quarantine and returned to the underlying heap.
    pub evicted_blocks: u64,

    /// Padded bytes evicted from quarantine.
    pub evicted_bytes: u64,

    /// Trims handed to the deferred worker.
    pub deferred_trims: u64,

    /// Bad accesses reported by this heap.
    pub bad_access_count: u64,
}

impl ProxyStats {
    /// Blocks currently allocated.
    pub fn live_blocks(&self) -> u64 {
        self.allocation_count.saturating_sub(self.free_count)
    }
}

impl std::fmt::Display for ProxyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Heap Proxy Statistics:")?;
        writeln!(f, "  Allocations:     {}", self.allocation_count)?;
        writeln!(f, "  Frees:           {}", self.free_count)?;
        writeln!(f, "  Live:            {} ({} blocks)", format_bytes(self.live_bytes), self.live_blocks())?;
        writeln!(f, "  Peak live:       {}", format_bytes(self.peak_live_bytes))?;
        writeln!(f, "  Quarantine:      {} ({} blocks)", format_bytes(self.quarantine_bytes), self.quarantine_blocks)?;
        writeln!(f, "  Evicted:         {} blocks", self.evicted_blocks)?;
        writeln!(f, "  Deferred trims:  {}", self.deferred_trims)?;
        writeln!(f, "  Bad accesses:    {}", self.bad_access_count)?;
        Ok(())
    }
}
