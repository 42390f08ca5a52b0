//! Diagnostic kinds and core types.
//!
//! Every bad access is an error: a report either names a memory-safety
//! violation or it is not raised at all.

/// A diagnostic message with code, message, and optional context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Diagnostic code (e.g., "RZ001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

/// What kind of memory error an access represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadAccessKind {
    /// Access to a block that has been freed.
    UseAfterFree,
    /// Access past the end of a live block.
    HeapBufferOverflow,
    /// Access before the start of a live block.
    HeapBufferUnderflow,
    /// Free of a block that is already freed.
    DoubleFree,
    /// Free of a pointer this heap never returned.
    InvalidFree,
    /// Block metadata was overwritten.
    CorruptBlock,
    /// No tracked block contains the address.
    UnknownBadAccess,
}

impl BadAccessKind {
    /// Predefined diagnostic for this kind.
    pub fn diagnostic(self) -> &'static Diagnostic {
        match self {
            Self::UseAfterFree => &RZ001,
            Self::HeapBufferOverflow => &RZ002,
            Self::HeapBufferUnderflow => &RZ003,
            Self::DoubleFree => &RZ004,
            Self::InvalidFree => &RZ005,
            Self::CorruptBlock => &RZ006,
            Self::UnknownBadAccess => &RZ009,
        }
    }

    /// Short name used in report headlines.
    pub const fn name(self) -> &'static str {
        match self {
            Self::UseAfterFree => "heap-use-after-free",
            Self::HeapBufferOverflow => "heap-buffer-overflow",
            Self::HeapBufferUnderflow => "heap-buffer-underflow",
            Self::DoubleFree => "double-free",
            Self::InvalidFree => "invalid-free",
            Self::CorruptBlock => "corrupt-block",
            Self::UnknownBadAccess => "unknown-crash",
        }
    }
}

impl std::fmt::Display for BadAccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Predefined diagnostics
// =============================================================================

/// RZ001: Access to freed memory.
pub const RZ001: Diagnostic = Diagnostic::error(
    "RZ001",
    "heap-use-after-free"
).with_note("the block was freed and is still held in quarantine")
 .with_help("the pointer outlived its allocation; check who frees it and who still uses it");

/// RZ002: Access past the end of a block.
pub const RZ002: Diagnostic = Diagnostic::error(
    "RZ002",
    "heap-buffer-overflow"
).with_note("the access landed in the trailing redzone of a live block")
 .with_help("check index arithmetic and the size passed to alloc()");

/// RZ003: Access before the start of a block.
pub const RZ003: Diagnostic = Diagnostic::error(
    "RZ003",
    "heap-buffer-underflow"
).with_note("the access landed in the leading redzone or header of a live block")
 .with_help("check for negative offsets and off-by-one loops running backwards");

/// RZ004: Block freed twice.
pub const RZ004: Diagnostic = Diagnostic::error(
    "RZ004",
    "attempting double-free"
).with_note("the block is already quarantined; its state was left untouched");

/// RZ005: Pointer was never returned by this heap.
pub const RZ005: Diagnostic = Diagnostic::error(
    "RZ005",
    "attempting free on address which was not allocated by this heap"
).with_help("the pointer may be interior to a block, belong to another heap, or have been released long ago");

/// RZ006: Block metadata overwritten.
pub const RZ006: Diagnostic = Diagnostic::error(
    "RZ006",
    "heap block metadata is corrupt"
).with_note("the block header or footer no longer matches what was written at allocation");

/// RZ009: Address not inside any tracked block.
pub const RZ009: Diagnostic = Diagnostic::error(
    "RZ009",
    "unknown bad access"
).with_note("no live or quarantined block contains this address")
 .with_help("the memory may already have been returned to the system, or was never tracked");
