//! Deferred quarantine trimming.
//!
//! `free()` only has to queue a block; enforcing the quarantine budget can be
//! handed to a single background thread so the caller returns sooner. The
//! worker sleeps on a condition variable and is woken by [`DeferredFreeWorker::signal_work`].
//! A pending flag coalesces signals raised while work is already queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

use crossbeam_queue::SegQueue;

/// Name given to the background thread.
pub const WORKER_THREAD_NAME: &str = "redzone-deferred-free";

type TrimCallback = Box<dyn Fn() + Send + Sync + 'static>;

struct WorkerShared {
    /// Cleared by `stop`; the worker exits once it observes this
    enabled: AtomicBool,
    /// Set by `signal_work`, cleared by the worker before each callback
    pending: AtomicBool,
    /// Whether the worker thread has reached its loop
    ready: Mutex<bool>,
    ready_cvar: Condvar,
    work_cvar: Condvar,
    callback: TrimCallback,
    invocations: AtomicU64,
}

impl WorkerShared {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.ready.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Background thread running quarantine trims on request.
///
/// Lifecycle is `stopped -> start() -> running -> stop() -> stopped`.
/// Starting a running worker or stopping a stopped one is a programming
/// error and panics. The callback is owned by the worker, so it stays valid
/// until the thread has been joined.
pub struct DeferredFreeWorker {
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl DeferredFreeWorker {
    /// Create a stopped worker that will run `callback` for each wake-up.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(WorkerShared {
                enabled: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                ready: Mutex::new(false),
                ready_cvar: Condvar::new(),
                work_cvar: Condvar::new(),
                callback: Box::new(callback),
                invocations: AtomicU64::new(0),
            }),
            thread: None,
        }
    }

    /// Spawn the worker thread and wait until it is ready for work.
    ///
    /// # Panics
    ///
    /// Panics if the worker is already running.
    pub fn start(&mut self) -> std::io::Result<()> {
        assert!(
            self.thread.is_none(),
            "deferred free worker started while already running"
        );

        *self.shared.lock() = false;
        self.shared.enabled.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = match std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(shared))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.enabled.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let mut ready = self.shared.lock();
        while !*ready {
            ready = self
                .shared
                .ready_cvar
                .wait(ready)
                .unwrap_or_else(|e| e.into_inner());
        }
        drop(ready);

        self.thread = Some(handle);

        #[cfg(feature = "log")]
        log::debug!("deferred free worker started");

        Ok(())
    }

    /// Disable the worker, wake it, and join it.
    ///
    /// A callback already in flight completes first; no callback runs after
    /// this returns.
    ///
    /// # Panics
    ///
    /// Panics if the worker is not running, or re-raises a panic from the
    /// callback.
    pub fn stop(&mut self) {
        let handle = match self.thread.take() {
            Some(handle) => handle,
            None => panic!("deferred free worker stopped without being started"),
        };

        self.shutdown(handle);

        #[cfg(feature = "log")]
        log::debug!(
            "deferred free worker stopped after {} trims",
            self.invocations()
        );
    }

    /// Ask the worker to run the callback.
    ///
    /// Returns immediately without notifying if a request is already pending.
    pub fn signal_work(&self) {
        signal(&self.shared);
    }

    /// Handle that can raise signals without access to the worker itself.
    pub fn signaller(&self) -> WorkSignal {
        WorkSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Whether a signal is waiting to be picked up.
    pub fn is_work_pending(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Number of completed callback invocations.
    pub fn invocations(&self) -> u64 {
        self.shared.invocations.load(Ordering::Acquire)
    }

    fn shutdown(&self, handle: JoinHandle<()>) {
        self.shared.enabled.store(false, Ordering::Release);
        {
            let _guard = self.shared.lock();
            self.shared.work_cvar.notify_all();
        }
        if let Err(payload) = handle.join() {
            if !std::thread::panicking() {
                std::panic::resume_unwind(payload);
            }
        }
    }
}

impl Drop for DeferredFreeWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.shutdown(handle);
        }
    }
}

/// Cloneable handle for waking a [`DeferredFreeWorker`].
#[derive(Clone)]
pub struct WorkSignal {
    shared: Arc<WorkerShared>,
}

impl WorkSignal {
    /// See [`DeferredFreeWorker::signal_work`].
    pub fn signal_work(&self) {
        signal(&self.shared);
    }

    /// Whether the worker is running and will pick up signals.
    pub fn is_accepting(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }
}

fn signal(shared: &WorkerShared) {
    if shared.pending.swap(true, Ordering::AcqRel) {
        return;
    }
    let _guard = shared.lock();
    shared.work_cvar.notify_one();
}

fn run(shared: Arc<WorkerShared>) {
    {
        let mut ready = shared.lock();
        *ready = true;
        shared.ready_cvar.notify_all();
    }

    loop {
        {
            let mut guard = shared.lock();
            while !shared.pending.load(Ordering::Acquire) && shared.enabled.load(Ordering::Acquire) {
                guard = shared
                    .work_cvar
                    .wait(guard)
                    .unwrap_or_else(|e| e.into_inner());
            }
        }

        if !shared.enabled.load(Ordering::Acquire) {
            break;
        }

        shared.pending.store(false, Ordering::Release);
        (shared.callback)();
        shared.invocations.fetch_add(1, Ordering::AcqRel);
    }
}

/// Lock-free set of targets waiting for the worker.
///
/// Holds weak references so a target torn down before the worker gets to
/// it is simply skipped.
pub struct TrimQueue<T> {
    queue: SegQueue<Weak<T>>,
}

impl<T> TrimQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Queue a target.
    pub fn push(&self, target: &Arc<T>) {
        self.queue.push(Arc::downgrade(target));
    }

    /// Hand every still-alive target to `f`, in queue order.
    ///
    /// Returns the number of targets visited.
    pub fn drain(&self, mut f: impl FnMut(&T)) -> usize {
        let mut visited = 0;
        while let Some(weak) = self.queue.pop() {
            if let Some(target) = weak.upgrade() {
                f(&target);
                visited += 1;
            }
        }
        visited
    }

    /// Check if there are queued targets.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get approximate number of queued targets.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<T> Default for TrimQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
