//! Diagnostic emission backend.
//!
//! Handles outputting reports to stderr, logs, or custom sinks, then
//! applies the strict-mode policy.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use super::kind::BadAccessKind;
use super::report::BadAccessReport;
use super::strict::StrictMode;

/// Global flag to suppress stderr output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Global flag to enable verbose diagnostics.
static VERBOSE_DIAGNOSTICS: AtomicBool = AtomicBool::new(false);

/// Suppress all stderr diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Enable verbose diagnostic output.
pub fn set_verbose(verbose: bool) {
    VERBOSE_DIAGNOSTICS.store(verbose, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

fn is_verbose() -> bool {
    cfg!(feature = "diagnostics") || VERBOSE_DIAGNOSTICS.load(Ordering::Relaxed)
}

/// Receives every bad-access report.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a report.
    fn emit(&self, report: &BadAccessReport);
}

/// Writes reports to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&self, report: &BadAccessReport) {
        if is_suppressed() {
            return;
        }

        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{}", report);

        if is_verbose() {
            if let Some(offset) = report.offset() {
                let _ = writeln!(stderr, "  offset from user start: {}", offset);
            }
            let _ = writeln!(stderr, "  hint: enable the `debug` feature for allocation backtraces");
        }

        // Blank line for readability
        let _ = writeln!(stderr);
    }
}

/// A simple sink that collects reports.
#[derive(Default)]
pub struct CollectingSink {
    reports: std::sync::Mutex<Vec<BadAccessReport>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected reports.
    pub fn reports(&self) -> Vec<BadAccessReport> {
        self.lock().clone()
    }

    /// Number of collected reports of the given kind.
    pub fn count(&self, kind: BadAccessKind) -> usize {
        self.lock().iter().filter(|r| r.kind == kind).count()
    }

    /// Most recent report.
    pub fn last(&self) -> Option<BadAccessReport> {
        self.lock().last().cloned()
    }

    /// Clear collected reports.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Check if anything was collected.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BadAccessReport>> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, report: &BadAccessReport) {
        self.lock().push(report.clone());
    }
}

/// Surface a report: sink, log, then the strict-mode policy.
///
/// Must be called with no heap locks held, since strict mode may panic.
pub fn report(sink: &dyn DiagnosticSink, report: &BadAccessReport, mode: StrictMode) {
    sink.emit(report);

    #[cfg(feature = "log")]
    emit_to_log(report);

    let diag = report.kind.diagnostic();
    if mode.panics_on_error() {
        panic!(
            "[redzone][{}] {} on address {:#x}\nStrict mode enabled - errors are fatal.",
            diag.code, diag.message, report.address
        );
    }
}

/// Emit a report using the log crate.
#[cfg(feature = "log")]
pub fn emit_to_log(report: &BadAccessReport) {
    let diag = report.kind.diagnostic();
    log::error!("[{}] {} on address {:#x}", diag.code, diag.message, report.address);

    if let Some(location) = report.location() {
        log::info!("  {:#x} is located {}", report.address, location);
    }
}
