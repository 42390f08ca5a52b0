use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use redzone::{AllocFlags, HeapManager, HeapOptions, HeapProxy, ProxyConfig, StrictMode, TrimMode};
use std::alloc::{alloc, dealloc, Layout};

fn config(mode: TrimMode) -> ProxyConfig {
    ProxyConfig::default()
        .with_trim_mode(mode)
        .with_quarantine_size(256 * 1024)
        .with_strict(StrictMode::Warn)
}

// =============================================================================
// ALLOC + FREE CYCLE
// =============================================================================

fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free");

    for size in [16usize, 256, 4096] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("inline", size), &size, |b, &size| {
            let heap = HeapProxy::create(config(TrimMode::Inline), HeapOptions::NONE, 0, 0).unwrap();
            b.iter(|| {
                let p = heap.alloc(AllocFlags::NONE, size);
                heap.free(AllocFlags::NONE, black_box(p));
            });
        });

        group.bench_with_input(BenchmarkId::new("deferred", size), &size, |b, &size| {
            let manager = HeapManager::new(config(TrimMode::Deferred));
            manager.start().unwrap();
            let heap = manager.create_heap(HeapOptions::NONE, 0, 0).unwrap();
            b.iter(|| {
                let p = heap.alloc(AllocFlags::NONE, size);
                heap.free(AllocFlags::NONE, black_box(p));
            });
            drop(heap);
            manager.shutdown();
        });

        group.bench_with_input(BenchmarkId::new("system_malloc", size), &size, |b, &size| {
            let layout = Layout::from_size_align(size, 16).unwrap();
            b.iter(|| unsafe {
                let p = alloc(layout);
                dealloc(black_box(p), layout);
            });
        });
    }

    group.finish();
}

// =============================================================================
// VALIDATION AND CLASSIFICATION
// =============================================================================

fn bench_validate_all(c: &mut Criterion) {
    let heap = HeapProxy::create(config(TrimMode::Inline), HeapOptions::NONE, 0, 0).unwrap();
    let live: Vec<_> = (0..1000).map(|i| heap.alloc(AllocFlags::NONE, 16 + i % 200)).collect();

    c.bench_function("validate_1000_live", |b| {
        b.iter(|| black_box(heap.validate(AllocFlags::NONE, std::ptr::null())));
    });

    let addr = live[500] as usize + 3;
    c.bench_function("classify", |b| {
        b.iter(|| black_box(heap.classify(black_box(addr))));
    });

    for p in live {
        heap.free(AllocFlags::NONE, p);
    }
}

criterion_group!(benches, bench_alloc_free, bench_validate_all);
criterion_main!(benches);
