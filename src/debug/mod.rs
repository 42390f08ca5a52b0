//! Debugging aids for freed memory and block provenance.

#[cfg(feature = "debug")]
pub(crate) mod backtrace;
pub(crate) mod poison;
