//! # redzone
//!
//! A memory-error-detecting heap proxy.
//!
//! Every allocation is wrapped in guard bytes on both sides so that
//! out-of-bounds writes can be noticed, and every freed block is held in a
//! bounded quarantine before its memory is reused so that dangling-pointer
//! accesses land on memory nobody else owns yet.
//!
//! ## Features
//!
//! - Redzoned blocks with header/footer magic and a fixed sentinel pattern
//! - FIFO quarantine with a byte budget
//! - Inline or deferred (background thread) quarantine trimming
//! - Classification of faulting addresses into use-after-free, overflow,
//!   underflow and friends, with coded diagnostics
//! - Double-free and invalid-free detection that never touches state
//! - Freed-memory poisoning, checked again on eviction
//! - Optional allocation/free backtraces (`debug` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use redzone::{AllocFlags, HeapManager, HeapOptions, ProxyConfig};
//!
//! let manager = HeapManager::new(ProxyConfig::from_env());
//! manager.start().expect("spawn deferred free worker");
//!
//! let heap = manager.create_heap(HeapOptions::NONE, 0, 0).unwrap();
//! let p = heap.alloc(AllocFlags::ZERO_MEMORY, 64);
//! assert_eq!(heap.size(AllocFlags::NONE, p), Some(64));
//! heap.free(AllocFlags::NONE, p);
//!
//! // A fault handler hands trapped addresses back to the proxy.
//! heap.on_bad_access(p as usize);
//!
//! heap.destroy();
//! manager.shutdown();
//! ```
//!
//! ## Environment
//!
//! | Variable                  | Effect                                  |
//! |---------------------------|-----------------------------------------|
//! | `REDZONE_QUARANTINE_SIZE` | quarantine budget, e.g. `16m`            |
//! | `REDZONE_REDZONE_SIZE`    | guard bytes on each side                |
//! | `REDZONE_TRIM_MODE`       | `inline` or `deferred`                  |
//! | `REDZONE_STRICT`          | `warn` or `error`                       |

pub mod api;
pub mod diagnostics;

mod allocators;
mod debug;
mod sync;
mod util;

// Re-export public API at crate root for convenience
pub use api::config::{ProxyConfig, TrimMode, MAX_REDZONE_SIZE};
pub use api::error::{clear_last_error, last_error, HeapError};
pub use api::flags::{AllocFlags, HeapEntry, HeapInformation, HeapOptions};
pub use api::manager::HeapManager;
pub use api::proxy::HeapProxy;
pub use api::stats::ProxyStats;

// Building blocks
pub use allocators::block::{
    BlockLayout, BlockState, RedzoneFault, RedzoneSide, ALIGNMENT, REDZONE_PATTERN,
};
pub use allocators::deferred::{DeferredFreeWorker, TrimQueue, WorkSignal, WORKER_THREAD_NAME};
pub use allocators::heap::{SystemHeap, UnderlyingHeap};
pub use allocators::quarantine::{Quarantine, QuarantineEntry};
pub use debug::poison::FREED_PATTERN;

// Diagnostics
pub use diagnostics::{
    BadAccessKind, BadAccessReport, BlockInfo, CollectingSink, DiagnosticSink, StderrSink,
    StrictMode,
};
