//! Block header/footer codec.
//!
//! Every tracked allocation is laid out as:
//!
//! ```text
//! [header][leading redzone][user bytes][trailing redzone][footer]
//! ^base                    ^user_ptr   ^user_ptr + size
//! ```
//!
//! The trailing redzone starts right after the last user byte, so the
//! alignment slack between `size` and the rounded user size is painted too.
//! Redzones are filled with [`REDZONE_PATTERN`].

use std::mem::size_of;
use std::ptr::{self, NonNull};

use crate::util::layout::checked_align_up;

/// Alignment of the header, the user region and the footer.
pub const ALIGNMENT: usize = 16;

/// Signature identifying a live block header.
pub const HEADER_MAGIC: u32 = 0xCA80_B10C;

/// Signature identifying a block footer.
pub const FOOTER_MAGIC: u32 = 0xF007_E12D;

/// Byte pattern written into redzones.
pub const REDZONE_PATTERN: u8 = 0xFD;

/// Lifecycle state recorded in a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlockState {
    /// Handed out to the caller.
    Allocated = 1,
    /// Released by the caller, not yet queued.
    Freed = 2,
    /// Sitting in the quarantine queue.
    Quarantined = 3,
}

impl BlockState {
    /// Decode a raw header state.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Allocated),
            2 => Some(Self::Freed),
            3 => Some(Self::Quarantined),
            _ => None,
        }
    }

    /// True for `Freed` and `Quarantined`.
    pub const fn is_retired(self) -> bool {
        matches!(self, Self::Freed | Self::Quarantined)
    }
}

impl std::fmt::Display for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allocated => write!(f, "allocated"),
            Self::Freed => write!(f, "freed"),
            Self::Quarantined => write!(f, "quarantined"),
        }
    }
}

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct BlockHeader {
    magic: u32,
    state: u32,
    size: usize,
}

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct BlockFooter {
    magic: u32,
    _reserved: u32,
    size: usize,
}

/// Size of the block header in bytes.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Size of the block footer in bytes.
pub const FOOTER_SIZE: usize = size_of::<BlockFooter>();

/// Offsets of every region of a block, computed from the user size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    user_size: usize,
    redzone: usize,
    rounded: usize,
}

impl BlockLayout {
    /// Compute the layout for `user_size` bytes with `redzone`-byte guards.
    ///
    /// The redzone is rounded up to [`ALIGNMENT`]. Returns `None` if the
    /// padded size would overflow.
    pub fn for_size(user_size: usize, redzone: usize) -> Option<Self> {
        let redzone = checked_align_up(redzone, ALIGNMENT)?;
        let rounded = checked_align_up(user_size, ALIGNMENT)?;
        let layout = Self {
            user_size,
            redzone,
            rounded,
        };
        HEADER_SIZE
            .checked_add(redzone)?
            .checked_add(rounded)?
            .checked_add(redzone)?
            .checked_add(FOOTER_SIZE)?;
        Some(layout)
    }

    /// Requested size of the user region.
    pub const fn user_size(&self) -> usize {
        self.user_size
    }

    /// Size of each redzone.
    pub const fn redzone(&self) -> usize {
        self.redzone
    }

    /// Offset of the leading redzone from the block base.
    pub const fn leading_redzone_offset(&self) -> usize {
        HEADER_SIZE
    }

    /// Offset of the user region from the block base.
    pub const fn user_offset(&self) -> usize {
        HEADER_SIZE + self.redzone
    }

    /// Offset of the first byte after the user region.
    pub const fn trailing_redzone_offset(&self) -> usize {
        self.user_offset() + self.user_size
    }

    /// Length of the trailing redzone, including alignment slack.
    pub const fn trailing_redzone_len(&self) -> usize {
        self.footer_offset() - self.trailing_redzone_offset()
    }

    /// Offset of the footer from the block base.
    pub const fn footer_offset(&self) -> usize {
        self.user_offset() + self.rounded + self.redzone
    }

    /// Total bytes requested from the underlying heap.
    pub const fn padded_size(&self) -> usize {
        self.footer_offset() + FOOTER_SIZE
    }
}

/// Which guard region was found damaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedzoneSide {
    /// Between the header and the user region.
    Leading,
    /// Between the user region and the footer.
    Trailing,
}

/// First damaged byte found while checking a block's redzones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedzoneFault {
    /// Region the damaged byte belongs to.
    pub side: RedzoneSide,
    /// Address of the damaged byte.
    pub address: usize,
}

/// Typed view over a block's bytes.
///
/// A view can only be obtained through [`BlockView::initialize`] or the
/// magic-checked [`BlockView::from_base`]. It stays usable for as long as the
/// owning proxy keeps the block's memory alive.
#[derive(Debug, Clone, Copy)]
pub struct BlockView {
    base: NonNull<u8>,
    layout: BlockLayout,
}

impl BlockView {
    /// Stamp a fresh block: header, footer and painted redzones.
    ///
    /// # Safety
    ///
    /// `base` must be aligned to [`ALIGNMENT`] and valid for writes of
    /// `layout.padded_size()` bytes.
    pub unsafe fn initialize(base: NonNull<u8>, layout: BlockLayout) -> Self {
        let raw = base.as_ptr();
        ptr::write(
            raw as *mut BlockHeader,
            BlockHeader {
                magic: HEADER_MAGIC,
                state: BlockState::Allocated as u32,
                size: layout.user_size,
            },
        );
        ptr::write_bytes(
            raw.add(layout.leading_redzone_offset()),
            REDZONE_PATTERN,
            layout.redzone,
        );
        ptr::write_bytes(
            raw.add(layout.trailing_redzone_offset()),
            REDZONE_PATTERN,
            layout.trailing_redzone_len(),
        );
        ptr::write(
            raw.add(layout.footer_offset()) as *mut BlockFooter,
            BlockFooter {
                magic: FOOTER_MAGIC,
                _reserved: 0,
                size: layout.user_size,
            },
        );
        Self { base, layout }
    }

    /// Open an existing block after checking its header signature.
    ///
    /// Returns `None` if the magic is absent, the state is unknown or the
    /// recorded size cannot describe a block.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`HEADER_SIZE`] readable bytes, and, if
    /// the header is intact, to a whole block stamped by [`BlockView::initialize`].
    pub unsafe fn from_base(base: NonNull<u8>, redzone: usize) -> Option<Self> {
        let header = ptr::read(base.as_ptr() as *const BlockHeader);
        if header.magic != HEADER_MAGIC {
            return None;
        }
        BlockState::from_raw(header.state)?;
        let layout = BlockLayout::for_size(header.size, redzone)?;
        Some(Self { base, layout })
    }

    /// Reopen a block from a layout recorded elsewhere, without reading the
    /// header. Used when the header itself may have been overwritten.
    ///
    /// # Safety
    ///
    /// `base` must be a block stamped with `layout` whose memory is still
    /// owned by the caller.
    pub unsafe fn from_parts(base: NonNull<u8>, layout: BlockLayout) -> Self {
        Self { base, layout }
    }

    /// Recover the block base from a user pointer.
    ///
    /// `None` if the pointer sits too low for any block, or the redzone is
    /// too large to describe a block at all.
    pub fn base_for_user(user: usize, redzone: usize) -> Option<usize> {
        let offset = HEADER_SIZE.checked_add(checked_align_up(redzone, ALIGNMENT)?)?;
        user.checked_sub(offset)
    }

    /// Base address of the block.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Layout recorded in the header.
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Pointer to the user region.
    pub fn user_ptr(&self) -> *mut u8 {
        // SAFETY: user_offset is within the padded block
        unsafe { self.base.as_ptr().add(self.layout.user_offset()) }
    }

    /// Requested user size recorded in the header.
    pub fn user_size(&self) -> usize {
        self.layout.user_size
    }

    /// Current lifecycle state, or `None` if the header was overwritten.
    pub fn state(&self) -> Option<BlockState> {
        let header = self.header();
        if header.magic != HEADER_MAGIC {
            return None;
        }
        BlockState::from_raw(header.state)
    }

    /// Update the lifecycle state.
    pub fn set_state(&self, state: BlockState) {
        // SAFETY: the header lies at the (aligned) block base
        unsafe {
            let header = self.base.as_ptr() as *mut BlockHeader;
            (*header).state = state as u32;
        }
    }

    /// Invalidate the header before the memory goes back to the heap.
    pub fn invalidate(&self) {
        // SAFETY: see `set_state`
        unsafe {
            let header = self.base.as_ptr() as *mut BlockHeader;
            (*header).magic = 0;
        }
    }

    /// True if the header still describes this block.
    pub fn header_intact(&self) -> bool {
        let header = self.header();
        header.magic == HEADER_MAGIC && header.size == self.layout.user_size
    }

    /// True if the footer signature and size survived.
    pub fn footer_intact(&self) -> bool {
        // SAFETY: the footer lies within the padded block, aligned to 16
        let footer = unsafe {
            ptr::read(self.base.as_ptr().add(self.layout.footer_offset()) as *const BlockFooter)
        };
        footer.magic == FOOTER_MAGIC && footer.size == self.layout.user_size
    }

    /// Scan both redzones, returning the first damaged byte.
    ///
    /// The leading redzone is checked from the user region outwards, so the
    /// reported address is the one closest to the user bytes.
    pub fn check_redzones(&self) -> Option<RedzoneFault> {
        let raw = self.base.as_ptr();
        let leading = self.layout.leading_redzone_offset();
        for offset in (leading..leading + self.layout.redzone).rev() {
            // SAFETY: offset is inside the leading redzone
            if unsafe { raw.add(offset).read() } != REDZONE_PATTERN {
                return Some(RedzoneFault {
                    side: RedzoneSide::Leading,
                    address: raw as usize + offset,
                });
            }
        }

        let trailing = self.layout.trailing_redzone_offset();
        for offset in trailing..trailing + self.layout.trailing_redzone_len() {
            // SAFETY: offset is inside the trailing redzone
            if unsafe { raw.add(offset).read() } != REDZONE_PATTERN {
                return Some(RedzoneFault {
                    side: RedzoneSide::Trailing,
                    address: raw as usize + offset,
                });
            }
        }

        None
    }

    /// Fill the user region with `pattern`.
    pub fn fill_user(&self, pattern: u8) {
        // SAFETY: the user region is user_size bytes inside the block
        unsafe { ptr::write_bytes(self.user_ptr(), pattern, self.layout.user_size) };
    }

    fn header(&self) -> BlockHeader {
        // SAFETY: the view was built from a block whose base holds a header
        unsafe { ptr::read(self.base.as_ptr() as *const BlockHeader) }
    }
}
