//! Process-wide heap manager.
//!
//! Owns the deferred free worker and hands proxies a way to reach it. Heaps
//! created while the configuration asks for [`TrimMode::Deferred`] queue
//! their over-budget trims here instead of evicting on the freeing thread.

use std::sync::Arc;

use crate::allocators::deferred::{DeferredFreeWorker, TrimQueue};
use crate::allocators::heap::{SystemHeap, UnderlyingHeap};
use crate::api::config::{ProxyConfig, TrimMode};
use crate::api::error::{set_last_error, HeapError};
use crate::api::flags::HeapOptions;
use crate::api::proxy::{DeferredHook, HeapProxy, ProxyShared};
use crate::diagnostics::emit::{DiagnosticSink, StderrSink};
use crate::sync::mutex::Mutex;

/// Creates heap proxies and runs their deferred trims.
///
/// # Example
///
/// ```rust,ignore
/// use redzone::{AllocFlags, HeapManager, HeapOptions, ProxyConfig, TrimMode};
///
/// let manager = HeapManager::new(ProxyConfig::default().with_trim_mode(TrimMode::Deferred));
/// manager.start()?;
///
/// let heap = manager.create_heap(HeapOptions::NONE, 0, 0).unwrap();
/// let p = heap.alloc(AllocFlags::NONE, 64);
/// heap.free(AllocFlags::NONE, p);
///
/// manager.shutdown();
/// ```
pub struct HeapManager {
    config: ProxyConfig,
    sink: Arc<dyn DiagnosticSink>,
    pending: Arc<TrimQueue<ProxyShared>>,
    worker: Mutex<DeferredFreeWorker>,
}

impl HeapManager {
    /// Create a manager whose heaps report to stderr. The worker is not
    /// started.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_sink(config, Arc::new(StderrSink))
    }

    /// Create a manager whose heaps report to `sink`.
    pub fn with_sink(config: ProxyConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        let pending = Arc::new(TrimQueue::new());
        let queue = Arc::clone(&pending);
        let worker = DeferredFreeWorker::new(move || {
            queue.drain(|proxy: &ProxyShared| proxy.trim());
        });

        Self {
            config,
            sink,
            pending,
            worker: Mutex::new(worker),
        }
    }

    /// Create a manager configured from the environment, including the
    /// process-wide strict mode (`REDZONE_STRICT`).
    pub fn from_env() -> Self {
        crate::diagnostics::init_from_env();
        Self::new(ProxyConfig::from_env())
    }

    /// Start the deferred free worker.
    ///
    /// # Panics
    ///
    /// Panics if the worker is already running.
    pub fn start(&self) -> std::io::Result<()> {
        self.worker.lock().start()?;

        #[cfg(feature = "log")]
        log::debug!("heap manager started ({:?} trimming)", self.config.trim_mode);

        Ok(())
    }

    /// Stop the worker and run any trims it had not reached yet.
    ///
    /// Safe to call when the worker is not running.
    pub fn shutdown(&self) {
        {
            let mut worker = self.worker.lock();
            if !worker.is_running() {
                return;
            }
            worker.stop();
        }

        let leftover = self.pending.drain(|proxy| proxy.trim());

        #[cfg(feature = "log")]
        log::debug!("heap manager stopped, {} queued trims run inline", leftover);
        #[cfg(not(feature = "log"))]
        let _ = leftover;
    }

    /// Whether the deferred free worker is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_running()
    }

    /// Number of wake-ups the worker has processed.
    pub fn worker_invocations(&self) -> u64 {
        self.worker.lock().invocations()
    }

    /// Configuration given to new heaps.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Create a proxy over a new [`SystemHeap`].
    ///
    /// Returns `None` (last error [`HeapError::InvalidParameter`]) if the
    /// sizing hints are inconsistent or the configured redzone is too large.
    pub fn create_heap(
        &self,
        options: HeapOptions,
        initial_size: usize,
        max_size: usize,
    ) -> Option<HeapProxy> {
        match SystemHeap::create(options, initial_size, max_size) {
            Some(heap) => self.wrap(options, Box::new(heap)),
            None => {
                set_last_error(HeapError::InvalidParameter);
                None
            }
        }
    }

    /// Create a proxy over an existing underlying heap.
    ///
    /// Returns `None` (last error [`HeapError::InvalidParameter`]) if the
    /// configured redzone is too large.
    pub fn create_heap_with(&self, heap: impl UnderlyingHeap + 'static) -> Option<HeapProxy> {
        self.wrap(HeapOptions::NONE, Box::new(heap))
    }

    fn wrap(&self, options: HeapOptions, heap: Box<dyn UnderlyingHeap>) -> Option<HeapProxy> {
        let deferred = (self.config.trim_mode == TrimMode::Deferred).then(|| DeferredHook {
            signal: self.worker.lock().signaller(),
            queue: Arc::clone(&self.pending),
        });
        HeapProxy::from_parts(self.config.clone(), options, heap, Arc::clone(&self.sink), deferred)
    }
}

impl Drop for HeapManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::block::BlockLayout;
    use crate::api::flags::AllocFlags;
    use crate::diagnostics::emit::CollectingSink;
    use crate::diagnostics::strict::StrictMode;
    use std::time::{Duration, Instant};

    fn deferred_config(budget: usize) -> ProxyConfig {
        ProxyConfig::default()
            .with_trim_mode(TrimMode::Deferred)
            .with_quarantine_size(budget)
            .with_strict(StrictMode::Warn)
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for the worker");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_start_and_shutdown() {
        let manager = HeapManager::new(ProxyConfig::default());
        assert!(!manager.is_running());
        manager.start().unwrap();
        assert!(manager.is_running());
        manager.shutdown();
        assert!(!manager.is_running());
        manager.shutdown();
    }

    #[test]
    fn test_deferred_trim_evicts_oldest() {
        let padded = BlockLayout::for_size(64, 16).unwrap().padded_size();
        let sink = Arc::new(CollectingSink::new());
        let manager = HeapManager::with_sink(deferred_config(2 * padded), sink.clone());
        manager.start().unwrap();

        let heap = manager.create_heap(HeapOptions::NONE, 0, 0).unwrap();
        let blocks: Vec<_> = (0..3).map(|_| heap.alloc(AllocFlags::NONE, 64)).collect();
        for &b in &blocks {
            assert!(heap.free(AllocFlags::NONE, b));
        }

        wait_until(|| heap.quarantine_size() <= 2 * padded);
        assert_eq!(heap.quarantined(), vec![blocks[1] as usize, blocks[2] as usize]);
        assert!(heap.stats().deferred_trims >= 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_inline_fallback_when_worker_stopped() {
        let padded = BlockLayout::for_size(64, 16).unwrap().padded_size();
        let manager = HeapManager::new(deferred_config(padded));
        let heap = manager.create_heap(HeapOptions::NONE, 0, 0).unwrap();

        let a = heap.alloc(AllocFlags::NONE, 64);
        let b = heap.alloc(AllocFlags::NONE, 64);
        heap.free(AllocFlags::NONE, a);
        heap.free(AllocFlags::NONE, b);

        assert_eq!(heap.quarantined(), vec![b as usize]);
        assert_eq!(heap.stats().deferred_trims, 0);
    }

    #[test]
    fn test_shutdown_runs_queued_trims() {
        let padded = BlockLayout::for_size(32, 16).unwrap().padded_size();
        let manager = HeapManager::new(deferred_config(padded));
        manager.start().unwrap();

        let heap = manager.create_heap(HeapOptions::NONE, 0, 0).unwrap();
        for _ in 0..16 {
            let p = heap.alloc(AllocFlags::NONE, 32);
            heap.free(AllocFlags::NONE, p);
        }

        manager.shutdown();
        assert!(heap.quarantine_size() <= padded);
    }

    #[test]
    fn test_heap_outlives_manager() {
        let manager = HeapManager::new(deferred_config(0));
        manager.start().unwrap();
        let heap = manager.create_heap(HeapOptions::NONE, 0, 0).unwrap();
        drop(manager);

        let p = heap.alloc(AllocFlags::NONE, 8);
        assert!(heap.free(AllocFlags::NONE, p));
        assert_eq!(heap.quarantine_len(), 0);
    }

    #[test]
    fn test_invalid_sizing() {
        let manager = HeapManager::new(ProxyConfig::default());
        assert!(manager.create_heap(HeapOptions::NONE, 4096, 1024).is_none());
        assert_eq!(crate::api::error::last_error(), Some(HeapError::InvalidParameter));
    }

    #[test]
    fn test_oversized_redzone_rejected() {
        let manager = HeapManager::new(ProxyConfig::default().with_redzone_size(usize::MAX - 3));
        crate::api::error::clear_last_error();
        assert!(manager.create_heap(HeapOptions::NONE, 0, 0).is_none());
        assert_eq!(crate::api::error::last_error(), Some(HeapError::InvalidParameter));
        let heap = SystemHeap::create(HeapOptions::NONE, 0, 0).unwrap();
        assert!(manager.create_heap_with(heap).is_none());
    }
}
