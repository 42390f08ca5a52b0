//! Process-wide strict mode. Kept in its own test binary, and in a single
//! test, since it changes global state.

use redzone::diagnostics::{strict_mode, StrictModeGuard};
use redzone::{AllocFlags, CollectingSink, HeapOptions, HeapProxy, ProxyConfig, StrictMode};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

fn heap(config: ProxyConfig, sink: &Arc<CollectingSink>) -> HeapProxy {
    HeapProxy::create_with_sink(config, HeapOptions::NONE, 0, 0, sink.clone()).unwrap()
}

#[test]
fn test_strict_mode() {
    let sink = Arc::new(CollectingSink::new());
    let strict = heap(ProxyConfig::default(), &sink);
    let p = strict.alloc(AllocFlags::NONE, 32);
    assert!(strict.free(AllocFlags::NONE, p));

    // Escalates after the report has been emitted.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = StrictModeGuard::panic_on_error();
        strict.free(AllocFlags::NONE, p)
    }));
    assert!(result.is_err());
    assert_eq!(strict_mode(), StrictMode::Warn);
    assert_eq!(sink.reports().len(), 1);

    // The proxy lock was released before the panic.
    let q = strict.alloc(AllocFlags::NONE, 8);
    assert!(strict.free(AllocFlags::NONE, q));
    assert_eq!(strict.quarantine_len(), 2);

    // A per-proxy mode takes precedence over the global one.
    sink.clear();
    let lenient = heap(ProxyConfig::default().with_strict(StrictMode::Warn), &sink);
    let _guard = StrictModeGuard::new(StrictMode::PanicOnError);
    assert!(!lenient.on_bad_access(0x10));
    assert_eq!(sink.reports().len(), 1);
}
