//! Bad-access reports and classification.

use crate::allocators::block::BlockState;

use super::context::DiagContext;
use super::kind::BadAccessKind;

/// Bounds and state of the block an address was attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Start of the padded block (header).
    pub base: usize,
    /// Size of the padded block.
    pub padded_size: usize,
    /// Start of the user region.
    pub user_addr: usize,
    /// Size the caller requested.
    pub user_size: usize,
    /// State recorded for the block.
    pub state: BlockState,
}

impl BlockInfo {
    /// One past the last user byte.
    pub fn user_end(&self) -> usize {
        self.user_addr + self.user_size
    }

    /// One past the last padded byte.
    pub fn end(&self) -> usize {
        self.base + self.padded_size
    }

    /// Whether `addr` is inside the padded extent.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Classify an access to `addr`, which lies within `block`'s padded extent.
///
/// A retired block is always reported as use-after-free, whatever part of
/// it was touched. For a live block the position decides. An access inside
/// the user region of a live block is not a heap error this layer can name.
pub fn classify_access(block: &BlockInfo, addr: usize) -> BadAccessKind {
    if block.state.is_retired() {
        BadAccessKind::UseAfterFree
    } else if addr < block.user_addr {
        BadAccessKind::HeapBufferUnderflow
    } else if addr >= block.user_end() {
        BadAccessKind::HeapBufferOverflow
    } else {
        BadAccessKind::UnknownBadAccess
    }
}

/// Everything known about one bad access.
#[derive(Debug, Clone)]
pub struct BadAccessReport {
    /// What went wrong.
    pub kind: BadAccessKind,
    /// The faulting (or freed) address.
    pub address: usize,
    /// The block the address belongs to, if one was found.
    pub block: Option<BlockInfo>,
    /// Thread that detected the error.
    pub context: DiagContext,
    /// Where the block was allocated (with the `debug` feature).
    pub alloc_trace: Option<String>,
    /// Where the block was freed (with the `debug` feature).
    pub free_trace: Option<String>,
}

impl BadAccessReport {
    /// Report an access with no containing block.
    pub fn unknown(address: usize) -> Self {
        Self::new(BadAccessKind::UnknownBadAccess, address, None)
    }

    /// Create a report captured on the current thread.
    pub fn new(kind: BadAccessKind, address: usize, block: Option<BlockInfo>) -> Self {
        Self {
            kind,
            address,
            block,
            context: DiagContext::capture(),
            alloc_trace: None,
            free_trace: None,
        }
    }

    /// Signed distance from the start of the user region.
    pub fn offset(&self) -> Option<isize> {
        let block = self.block.as_ref()?;
        Some(self.address.wrapping_sub(block.user_addr) as isize)
    }

    /// Position of the address relative to the user region, e.g.
    /// `3 bytes to the right of 16-byte region [0x1000, 0x1010)`.
    pub fn location(&self) -> Option<String> {
        let block = self.block.as_ref()?;
        let (distance, relation) = if self.address < block.user_addr {
            (block.user_addr - self.address, "to the left of")
        } else if self.address >= block.user_end() {
            (self.address - block.user_end(), "to the right of")
        } else {
            (self.address - block.user_addr, "inside of")
        };
        Some(format!(
            "{} bytes {} {}-byte region [{:#x}, {:#x})",
            distance,
            relation,
            block.user_size,
            block.user_addr,
            block.user_end()
        ))
    }
}

impl std::fmt::Display for BadAccessReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let diag = self.kind.diagnostic();
        writeln!(
            f,
            "[redzone][{}] error: {} on address {:#x}",
            diag.code,
            diag.message,
            self.address
        )?;
        writeln!(f, "  context: {}", self.context)?;
        if let (Some(location), Some(block)) = (self.location(), self.block.as_ref()) {
            writeln!(f, "  {:#x} is located {}", self.address, location)?;
            writeln!(
                f,
                "  block: [{:#x}, {:#x}) {} bytes padded, {}",
                block.base,
                block.end(),
                block.padded_size,
                block.state
            )?;
        }
        if let Some(note) = diag.note {
            writeln!(f, "  note: {}", note)?;
        }
        if let Some(help) = diag.help {
            writeln!(f, "  help: {}", help)?;
        }
        if let Some(ref trace) = self.alloc_trace {
            writeln!(f, "  allocated at:\n{}", trace)?;
        }
        if let Some(ref trace) = self.free_trace {
            writeln!(f, "  freed at:\n{}", trace)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(state: BlockState) -> BlockInfo {
        BlockInfo {
            base: 0x1000,
            padded_size: 96,
            user_addr: 0x1020,
            user_size: 24,
            state,
        }
    }

    #[test]
    fn test_live_block_boundaries() {
        let b = block(BlockState::Allocated);
        assert_eq!(classify_access(&b, 0x101f), BadAccessKind::HeapBufferUnderflow);
        assert_eq!(classify_access(&b, 0x1000), BadAccessKind::HeapBufferUnderflow);
        assert_eq!(classify_access(&b, 0x1020 + 24), BadAccessKind::HeapBufferOverflow);
        assert_eq!(classify_access(&b, 0x105f), BadAccessKind::HeapBufferOverflow);
        assert_eq!(classify_access(&b, 0x1024), BadAccessKind::UnknownBadAccess);
    }

    #[test]
    fn test_retired_block_wins_over_position() {
        for state in [BlockState::Freed, BlockState::Quarantined] {
            let b = block(state);
            assert_eq!(classify_access(&b, 0x101f), BadAccessKind::UseAfterFree);
            assert_eq!(classify_access(&b, 0x1020), BadAccessKind::UseAfterFree);
            assert_eq!(classify_access(&b, 0x1040), BadAccessKind::UseAfterFree);
        }
    }

    #[test]
    fn test_offsets_and_location() {
        let mut report = BadAccessReport::new(
            BadAccessKind::HeapBufferOverflow,
            0x1020 + 27,
            Some(block(BlockState::Allocated)),
        );
        assert_eq!(report.offset(), Some(27));
        assert_eq!(
            report.location().unwrap(),
            "3 bytes to the right of 24-byte region [0x1020, 0x1038)"
        );

        report.address = 0x101e;
        assert_eq!(report.offset(), Some(-2));
        assert!(report.location().unwrap().starts_with("2 bytes to the left of"));
    }

    #[test]
    fn test_unknown_report_has_no_bounds() {
        let report = BadAccessReport::unknown(0xdead);
        assert_eq!(report.kind, BadAccessKind::UnknownBadAccess);
        assert_eq!(report.offset(), None);
        assert_eq!(report.location(), None);
        assert!(report.to_string().contains("RZ009"));
    }

    #[test]
    fn test_contains() {
        let b = block(BlockState::Allocated);
        assert!(b.contains(0x1000));
        assert!(b.contains(0x105f));
        assert!(!b.contains(0x1060));
        assert!(!b.contains(0xfff));
    }
}
