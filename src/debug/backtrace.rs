//! Allocation backtrace capture.
//!
//! Records where blocks were allocated and freed so bad-access reports can
//! point at both sites.

/// Capture the current stack as a printable string.
pub fn capture() -> String {
    let bt = ::backtrace::Backtrace::new();
    format!("{:?}", bt)
}
