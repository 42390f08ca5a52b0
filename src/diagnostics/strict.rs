//! Strict mode handling for diagnostics.
//!
//! Reporting a bad access never aborts by itself; strict mode decides what
//! happens after the report has been emitted:
//! - Warn: Just emit the diagnostic
//! - Panic: Emit and then panic (useful for CI)

use std::sync::atomic::{AtomicU8, Ordering};

/// Strict mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StrictMode {
    /// Just warn, don't panic.
    Warn = 0,
    /// Panic on errors.
    PanicOnError = 1,
}

impl StrictMode {
    /// Parse a mode name as accepted by `REDZONE_STRICT`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "0" | "warn" | "false" => Some(StrictMode::Warn),
            "1" | "error" | "true" => Some(StrictMode::PanicOnError),
            _ => None,
        }
    }

    /// Check if this mode panics on errors.
    pub fn panics_on_error(self) -> bool {
        matches!(self, StrictMode::PanicOnError)
    }
}

impl From<u8> for StrictMode {
    fn from(val: u8) -> Self {
        match val {
            1 => StrictMode::PanicOnError,
            _ => StrictMode::Warn,
        }
    }
}

/// Global strict mode setting.
static STRICT_MODE: AtomicU8 = AtomicU8::new(0);

/// Set the strict mode.
pub fn set_strict_mode(mode: StrictMode) {
    STRICT_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Get the current strict mode.
pub fn strict_mode() -> StrictMode {
    StrictMode::from(STRICT_MODE.load(Ordering::Relaxed))
}

/// RAII guard for temporarily setting strict mode.
pub struct StrictModeGuard {
    previous: StrictMode,
}

impl StrictModeGuard {
    /// Create a new guard that sets strict mode.
    pub fn new(mode: StrictMode) -> Self {
        let previous = strict_mode();
        set_strict_mode(mode);
        Self { previous }
    }

    /// Create a guard that enables panic-on-error.
    pub fn panic_on_error() -> Self {
        Self::new(StrictMode::PanicOnError)
    }
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        set_strict_mode(self.previous);
    }
}

/// Initialize strict mode from environment variable.
///
/// Checks `REDZONE_STRICT` environment variable:
/// - "0" or "warn" -> Warn
/// - "1" or "error" -> PanicOnError
/// - anything else -> Warn
pub fn init_from_env() {
    if let Ok(val) = std::env::var("REDZONE_STRICT") {
        set_strict_mode(StrictMode::parse(&val).unwrap_or(StrictMode::Warn));
    }
}
