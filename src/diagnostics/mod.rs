//! Bad-access diagnostics.
//!
//! This module provides:
//! - **Classification**: deciding what kind of error an address represents
//! - **Reports**: the address, the block it hit and how far out of bounds it was
//! - **Sinks**: where reports go (stderr, a collector, or your own)
//! - **Strict mode**: optional panic-on-error policy for CI
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | RZ001 | heap-use-after-free            |
//! | RZ002 | heap-buffer-overflow           |
//! | RZ003 | heap-buffer-underflow          |
//! | RZ004 | double free                    |
//! | RZ005 | invalid free                   |
//! | RZ006 | corrupt block                  |
//! | RZ009 | unknown bad access             |

pub mod context;
pub mod emit;
pub mod kind;
pub mod report;
pub mod strict;

pub use context::DiagContext;
pub use emit::{report, set_verbose, suppress_diagnostics, CollectingSink, DiagnosticSink, StderrSink};
pub use kind::{BadAccessKind, Diagnostic};
pub use kind::{RZ001, RZ002, RZ003, RZ004, RZ005, RZ006, RZ009};
pub use report::{classify_access, BadAccessReport, BlockInfo};
pub use strict::{init_from_env, set_strict_mode, strict_mode, StrictMode, StrictModeGuard};
