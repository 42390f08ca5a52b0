//! Layout utilities.

/// Align a size up, returning `None` on overflow.
#[inline]
pub const fn checked_align_up(size: usize, align: usize) -> Option<usize> {
    match size.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Check whether an address is aligned.
#[inline]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_align_up() {
        assert_eq!(checked_align_up(0, 16), Some(0));
        assert_eq!(checked_align_up(1, 16), Some(16));
        assert_eq!(checked_align_up(16, 16), Some(16));
        assert_eq!(checked_align_up(33, 16), Some(48));
        assert_eq!(checked_align_up(usize::MAX, 16), None);
        assert_eq!(checked_align_up(usize::MAX - 3, 16), None);
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(32, 16));
        assert!(!is_aligned(40, 16));
    }
}
