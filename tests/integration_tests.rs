//! Integration tests for redzone.

use redzone::{
    AllocFlags, BadAccessKind, BlockLayout, CollectingSink, HeapEntry, HeapError, HeapInformation,
    HeapManager, HeapOptions, HeapProxy, ProxyConfig, StrictMode, SystemHeap, TrimMode,
    UnderlyingHeap,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Wraps a system heap and records every block handed back to it.
struct RecordingHeap {
    inner: SystemHeap,
    released: Arc<Mutex<Vec<usize>>>,
}

impl RecordingHeap {
    fn new() -> (Self, Arc<Mutex<Vec<usize>>>) {
        let released = Arc::new(Mutex::new(Vec::new()));
        let heap = Self {
            inner: SystemHeap::create(HeapOptions::NONE, 0, 0).unwrap(),
            released: released.clone(),
        };
        (heap, released)
    }
}

impl UnderlyingHeap for RecordingHeap {
    fn alloc(&self, size: usize) -> *mut u8 {
        self.inner.alloc(size)
    }

    fn free(&self, ptr: *mut u8) -> bool {
        self.released.lock().unwrap().push(ptr as usize);
        self.inner.free(ptr)
    }

    fn size(&self, ptr: *const u8) -> Option<usize> {
        self.inner.size(ptr)
    }

    fn compact(&self) -> usize {
        self.inner.compact()
    }

    fn lock(&self) -> bool {
        self.inner.lock()
    }

    fn unlock(&self) -> bool {
        self.inner.unlock()
    }

    fn walk(&self) -> Vec<HeapEntry> {
        self.inner.walk()
    }

    fn set_information(&self, info: HeapInformation, value: u64) -> bool {
        self.inner.set_information(info, value)
    }

    fn query_information(&self, info: HeapInformation) -> Option<u64> {
        self.inner.query_information(info)
    }
}

fn config() -> ProxyConfig {
    ProxyConfig::default().with_strict(StrictMode::Warn)
}

fn layout(n: usize) -> BlockLayout {
    BlockLayout::for_size(n, 16).unwrap()
}

fn base_of(user: *mut u8, n: usize) -> usize {
    user as usize - layout(n).user_offset()
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_alloc_size_free() {
    let sink = Arc::new(CollectingSink::new());
    let heap = HeapProxy::create_with_sink(config(), HeapOptions::NONE, 0, 0, sink.clone()).unwrap();

    let p = heap.alloc(AllocFlags::NONE, 100);
    assert!(!p.is_null());
    assert_eq!(heap.size(AllocFlags::NONE, p), Some(100));

    unsafe {
        std::ptr::write_bytes(p, 0xAB, 100);
    }
    assert!(heap.validate(AllocFlags::NONE, p));
    assert!(heap.free(AllocFlags::NONE, p));
    assert!(sink.is_empty());

    let stats = heap.stats();
    assert_eq!(stats.allocation_count, 1);
    assert_eq!(stats.free_count, 1);
    assert_eq!(stats.live_bytes, 0);
    assert_eq!(stats.peak_live_bytes, 100);
    assert_eq!(stats.quarantine_blocks, 1);
}

#[test]
fn test_overflow_and_underflow_break_validation() {
    let heap = HeapProxy::create_with_sink(
        config(),
        HeapOptions::NONE,
        0,
        0,
        Arc::new(CollectingSink::new()),
    )
    .unwrap();

    let n = 33;
    let over = heap.alloc(AllocFlags::NONE, n);
    let under = heap.alloc(AllocFlags::NONE, n);
    let clean = heap.alloc(AllocFlags::NONE, n);

    unsafe {
        *over.add(n) = 0;
        *under.sub(1) = 0;
    }

    assert!(!heap.validate(AllocFlags::NONE, over));
    assert!(!heap.validate(AllocFlags::NONE, under));
    assert!(heap.validate(AllocFlags::NONE, clean));
    assert!(!heap.validate(AllocFlags::NONE, std::ptr::null()));
}

#[test]
fn test_double_free_is_harmless() {
    let sink = Arc::new(CollectingSink::new());
    let (recording, released) = RecordingHeap::new();
    let heap = HeapProxy::with_heap(config(), recording, sink.clone()).unwrap();

    let p = heap.alloc(AllocFlags::NONE, 48);
    assert!(heap.free(AllocFlags::NONE, p));
    let before = (heap.quarantine_size(), heap.quarantined());

    assert!(!heap.free(AllocFlags::NONE, p));
    assert_eq!(redzone::last_error(), Some(HeapError::DoubleFree));
    assert_eq!((heap.quarantine_size(), heap.quarantined()), before);
    assert!(released.lock().unwrap().is_empty());

    let report = sink.last().unwrap();
    assert_eq!(report.kind, BadAccessKind::DoubleFree);
    assert_eq!(report.address, p as usize);
    assert!(report.to_string().contains("RZ004"));
}

#[test]
fn test_inline_eviction_is_fifo() {
    let n = 40;
    let budget = 3 * layout(n).padded_size();
    let (recording, released) = RecordingHeap::new();
    let heap = HeapProxy::with_heap(
        config().with_quarantine_size(budget),
        recording,
        Arc::new(CollectingSink::new()),
    )
    .unwrap();

    let blocks: Vec<_> = (0..8).map(|_| heap.alloc(AllocFlags::NONE, n)).collect();
    for &b in &blocks {
        heap.free(AllocFlags::NONE, b);
        assert!(heap.quarantine_size() <= budget);
    }

    let expected: Vec<_> = blocks[..5].iter().map(|&b| base_of(b, n)).collect();
    assert_eq!(*released.lock().unwrap(), expected);
    assert_eq!(
        heap.quarantined(),
        blocks[5..].iter().map(|&b| b as usize).collect::<Vec<_>>()
    );
}

#[test]
fn test_deferred_eviction_is_fifo() {
    let n = 40;
    let budget = 2 * layout(n).padded_size();
    let manager = HeapManager::with_sink(
        config()
            .with_trim_mode(TrimMode::Deferred)
            .with_quarantine_size(budget),
        Arc::new(CollectingSink::new()),
    );
    manager.start().unwrap();

    let (recording, released) = RecordingHeap::new();
    let heap = manager.create_heap_with(recording).unwrap();

    let blocks: Vec<_> = (0..6).map(|_| heap.alloc(AllocFlags::NONE, n)).collect();
    for &b in &blocks {
        assert!(heap.free(AllocFlags::NONE, b));
    }

    wait_until(|| heap.quarantine_size() <= budget);
    let expected: Vec<_> = blocks[..4].iter().map(|&b| base_of(b, n)).collect();
    assert_eq!(*released.lock().unwrap(), expected);
    assert!(manager.worker_invocations() >= 1);

    manager.shutdown();
}

#[test]
fn test_deferred_worker_keeps_up() {
    let n = 128;
    let budget = 4 * layout(n).padded_size();
    let manager = HeapManager::new(
        config()
            .with_trim_mode(TrimMode::Deferred)
            .with_quarantine_size(budget),
    );
    manager.start().unwrap();
    let heap = manager.create_heap(HeapOptions::NONE, 0, 0).unwrap();

    for round in 0..10 {
        for _ in 0..50 {
            let p = heap.alloc(AllocFlags::NONE, n);
            heap.free(AllocFlags::NONE, p);
        }
        wait_until(|| heap.quarantine_size() <= budget);
        assert!(heap.stats().evicted_blocks >= (round + 1) * 46);
    }

    manager.shutdown();
    assert!(!manager.is_running());
}

#[test]
fn test_use_after_free_report() {
    let sink = Arc::new(CollectingSink::new());
    let heap = HeapProxy::create_with_sink(config(), HeapOptions::NONE, 0, 0, sink.clone()).unwrap();

    let p = heap.alloc(AllocFlags::NONE, 64);
    heap.free(AllocFlags::NONE, p);

    assert!(heap.on_bad_access(p as usize + 8));
    let report = sink.last().unwrap();
    assert_eq!(report.kind, BadAccessKind::UseAfterFree);
    assert_eq!(report.offset(), Some(8));
    assert!(report.to_string().contains("heap-use-after-free"));
}

#[test]
fn test_boundary_reports() {
    let sink = Arc::new(CollectingSink::new());
    let heap = HeapProxy::create_with_sink(config(), HeapOptions::NONE, 0, 0, sink.clone()).unwrap();

    let n = 20;
    let p = heap.alloc(AllocFlags::NONE, n) as usize;

    assert!(heap.on_bad_access(p + n));
    let over = sink.last().unwrap();
    assert_eq!(over.kind, BadAccessKind::HeapBufferOverflow);
    assert_eq!(over.block.as_ref().unwrap().user_addr, p);
    assert_eq!(
        over.location().unwrap(),
        format!("0 bytes to the right of {}-byte region [{:#x}, {:#x})", n, p, p + n)
    );

    assert!(heap.on_bad_access(p - 1));
    assert_eq!(sink.last().unwrap().kind, BadAccessKind::HeapBufferUnderflow);

    assert_eq!(sink.reports().len(), 2);
    assert_eq!(heap.stats().bad_access_count, 2);
}

#[test]
fn test_evicted_block_is_unknown() {
    let sink = Arc::new(CollectingSink::new());
    let heap = HeapProxy::create_with_sink(
        config().with_quarantine_size(0),
        HeapOptions::NONE,
        0,
        0,
        sink.clone(),
    )
    .unwrap();

    let p = heap.alloc(AllocFlags::NONE, 16);
    heap.free(AllocFlags::NONE, p);
    assert_eq!(heap.quarantine_len(), 0);
    assert!(heap.classify(p as usize).is_none());
}

#[test]
fn test_concurrent_alloc_free() {
    let manager = Arc::new(HeapManager::new(
        config()
            .with_trim_mode(TrimMode::Deferred)
            .with_quarantine_size(64 * 1024),
    ));
    manager.start().unwrap();
    let heap = Arc::new(manager.create_heap(HeapOptions::NONE, 0, 0).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let heap = Arc::clone(&heap);
            thread::spawn(move || {
                for i in 0..500 {
                    let n = 1 + (i * 7 + t) % 300;
                    let p = heap.alloc(AllocFlags::NONE, n);
                    assert!(!p.is_null());
                    assert_eq!(heap.size(AllocFlags::NONE, p), Some(n));
                    assert!(heap.free(AllocFlags::NONE, p));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(heap.validate(AllocFlags::NONE, std::ptr::null()));
    assert_eq!(heap.stats().free_count, 2000);

    manager.shutdown();
    assert!(heap.quarantine_size() <= 64 * 1024);
}

#[test]
fn test_information_round_trip() {
    let heap = HeapProxy::create(config(), HeapOptions::GENERATE_EXCEPTIONS, 0, 1 << 20).unwrap();
    assert_eq!(
        heap.query_information(HeapInformation::MaximumSize),
        Some(1 << 20)
    );
    assert!(!heap.set_information(HeapInformation::CompatibilityMode, 1));
    assert_eq!(redzone::last_error(), Some(HeapError::InvalidParameter));
}
