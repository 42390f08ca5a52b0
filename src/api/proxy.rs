//! The redzoned heap proxy.
//!
//! [`HeapProxy`] sits in front of one underlying heap and exposes the same
//! operation set. Every block it hands out is wrapped in redzones, every
//! block it takes back is parked in a quarantine, and any address handed to
//! [`HeapProxy::on_bad_access`] is attributed to the block it hit.
//!
//! Failures follow the native heap convention: a `false`/null/`None` return
//! plus a code readable through [`crate::last_error`]. Memory-safety errors
//! are additionally reported to the proxy's [`DiagnosticSink`].

use std::collections::BTreeMap;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::allocators::block::{BlockLayout, BlockState, BlockView, RedzoneSide, ALIGNMENT};
use crate::allocators::deferred::{TrimQueue, WorkSignal};
use crate::allocators::heap::{SystemHeap, UnderlyingHeap};
use crate::allocators::quarantine::{Quarantine, QuarantineEntry};
use crate::api::config::{ProxyConfig, TrimMode, MAX_REDZONE_SIZE};
use crate::api::error::{last_error, set_last_error, HeapError};
use crate::api::flags::{AllocFlags, HeapEntry, HeapInformation, HeapOptions};
use crate::api::stats::ProxyStats;
use crate::debug::poison::{first_unpoisoned, poison_freed};
use crate::diagnostics::emit::{report, DiagnosticSink, StderrSink};
use crate::diagnostics::kind::BadAccessKind;
use crate::diagnostics::report::{classify_access, BadAccessReport, BlockInfo};
use crate::diagnostics::strict::{strict_mode, StrictMode};
use crate::sync::atomics::{AtomicCounter, AtomicGauge};
use crate::sync::mutex::Mutex;
use crate::util::layout::{checked_align_up, is_aligned};

/// Side-table entry for a live or quarantined block.
struct BlockRecord {
    padded_size: usize,
    user_size: usize,
    state: BlockState,
    alloc_trace: Option<String>,
    free_trace: Option<String>,
}

/// State guarded by the proxy lock.
struct ProxyState {
    /// Every live or quarantined block, keyed by base address
    blocks: BTreeMap<usize, BlockRecord>,
    quarantine: Quarantine,
}

/// Link to a manager's deferred free worker.
pub(crate) struct DeferredHook {
    pub(crate) signal: WorkSignal,
    pub(crate) queue: Arc<TrimQueue<ProxyShared>>,
}

/// Result of looking a user pointer up in the block table.
enum Resolved {
    Live(usize),
    Retired(usize),
    Unknown,
}

type Evicted = Vec<(QuarantineEntry, BlockRecord)>;

pub(crate) struct ProxyShared {
    heap: Box<dyn UnderlyingHeap>,
    config: ProxyConfig,
    options: HeapOptions,
    /// Redzone size after rounding
    redzone: usize,
    state: Mutex<ProxyState>,
    sink: Arc<dyn DiagnosticSink>,
    deferred: Option<DeferredHook>,
    /// Set while this proxy sits in the manager's trim queue
    trim_requested: AtomicBool,

    allocations: AtomicCounter,
    frees: AtomicCounter,
    evicted_blocks: AtomicCounter,
    evicted_bytes: AtomicCounter,
    deferred_trims: AtomicCounter,
    bad_accesses: AtomicCounter,
    live_bytes: AtomicGauge,
}

/// A redzoned, quarantining proxy for one underlying heap.
///
/// All operations take `&self` and may be called from any thread; they
/// serialize on one lock per proxy. `destroy` must not race other calls,
/// which the borrow checker enforces by taking `self`.
pub struct HeapProxy {
    shared: Arc<ProxyShared>,
}

impl HeapProxy {
    /// Create a proxy over a new [`SystemHeap`] with the given sizing hints.
    ///
    /// Reports go to stderr. Returns `None` (last error
    /// [`HeapError::InvalidParameter`]) if the heap cannot be created or the
    /// configured redzone exceeds [`crate::MAX_REDZONE_SIZE`].
    pub fn create(
        config: ProxyConfig,
        options: HeapOptions,
        initial_size: usize,
        max_size: usize,
    ) -> Option<Self> {
        Self::create_with_sink(config, options, initial_size, max_size, Arc::new(StderrSink))
    }

    /// Like [`HeapProxy::create`], reporting to `sink`.
    pub fn create_with_sink(
        config: ProxyConfig,
        options: HeapOptions,
        initial_size: usize,
        max_size: usize,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Option<Self> {
        match SystemHeap::create(options, initial_size, max_size) {
            Some(heap) => Self::from_parts(config, options, Box::new(heap), sink, None),
            None => {
                set_last_error(HeapError::InvalidParameter);
                None
            }
        }
    }

    /// Wrap an existing underlying heap.
    ///
    /// Returns `None` (last error [`HeapError::InvalidParameter`]) if the
    /// configured redzone is too large.
    pub fn with_heap(
        config: ProxyConfig,
        heap: impl UnderlyingHeap + 'static,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Option<Self> {
        Self::from_parts(config, HeapOptions::NONE, Box::new(heap), sink, None)
    }

    pub(crate) fn from_parts(
        config: ProxyConfig,
        options: HeapOptions,
        heap: Box<dyn UnderlyingHeap>,
        sink: Arc<dyn DiagnosticSink>,
        deferred: Option<DeferredHook>,
    ) -> Option<Self> {
        let redzone = match checked_align_up(config.redzone_size, ALIGNMENT) {
            Some(redzone) if redzone <= MAX_REDZONE_SIZE => redzone,
            _ => {
                #[cfg(feature = "log")]
                log::warn!(
                    "rejecting heap with {}-byte redzones (limit {})",
                    config.redzone_size,
                    MAX_REDZONE_SIZE
                );
                set_last_error(HeapError::InvalidParameter);
                return None;
            }
        };
        Some(Self {
            shared: Arc::new(ProxyShared {
                heap,
                options,
                redzone,
                state: Mutex::new(ProxyState {
                    blocks: BTreeMap::new(),
                    quarantine: Quarantine::new(config.quarantine_size),
                }),
                config,
                sink,
                deferred,
                trim_requested: AtomicBool::new(false),
                allocations: AtomicCounter::default(),
                frees: AtomicCounter::default(),
                evicted_blocks: AtomicCounter::default(),
                evicted_bytes: AtomicCounter::default(),
                deferred_trims: AtomicCounter::default(),
                bad_accesses: AtomicCounter::default(),
                live_bytes: AtomicGauge::default(),
            }),
        })
    }

    /// Flush the quarantine and release the underlying heap.
    pub fn destroy(self) -> bool {
        self.shared.flush();
        true
    }

    /// Allocate `bytes` bytes wrapped in redzones.
    ///
    /// Returns null (last error [`HeapError::OutOfMemory`]) if the
    /// underlying heap fails, or panics instead if the heap was created with
    /// [`HeapOptions::GENERATE_EXCEPTIONS`]. With [`AllocFlags::ZERO_MEMORY`]
    /// the user region is zero-filled.
    pub fn alloc(&self, flags: AllocFlags, bytes: usize) -> *mut u8 {
        self.shared.alloc(flags, bytes)
    }

    /// Resize a block by allocating, copying and freeing.
    ///
    /// A null `mem` behaves as [`HeapProxy::alloc`]. On failure the old
    /// block is left untouched and null is returned. A block whose header
    /// has been overwritten is reported and fails with
    /// [`HeapError::CorruptBlock`].
    pub fn realloc(&self, flags: AllocFlags, mem: *mut u8, bytes: usize) -> *mut u8 {
        self.shared.realloc(flags, mem, bytes)
    }

    /// Retire a block into the quarantine.
    ///
    /// Freeing null succeeds. Freeing an unknown or already freed pointer
    /// is reported and fails without changing any state.
    pub fn free(&self, flags: AllocFlags, mem: *mut u8) -> bool {
        self.shared.free(flags, mem)
    }

    /// Size the caller requested for a live block.
    pub fn size(&self, _flags: AllocFlags, mem: *const u8) -> Option<usize> {
        self.shared.size(mem)
    }

    /// Check a live block's header, redzones and footer.
    ///
    /// A null `mem` validates every live block.
    pub fn validate(&self, _flags: AllocFlags, mem: *const u8) -> bool {
        self.shared.validate(mem)
    }

    /// Forwarded to the underlying heap.
    pub fn compact(&self, _flags: AllocFlags) -> usize {
        self.shared.heap.compact()
    }

    /// Forwarded to the underlying heap.
    pub fn lock(&self) -> bool {
        self.shared.heap.lock()
    }

    /// Forwarded to the underlying heap.
    pub fn unlock(&self) -> bool {
        self.shared.heap.unlock()
    }

    /// Forwarded to the underlying heap. Entries describe padded blocks,
    /// including quarantined ones.
    pub fn walk(&self) -> Vec<HeapEntry> {
        self.shared.heap.walk()
    }

    /// Forwarded to the underlying heap.
    pub fn set_information(&self, info: HeapInformation, value: u64) -> bool {
        let ok = self.shared.heap.set_information(info, value);
        if !ok {
            set_last_error(HeapError::InvalidParameter);
        }
        ok
    }

    /// Forwarded to the underlying heap.
    pub fn query_information(&self, info: HeapInformation) -> Option<u64> {
        let value = self.shared.heap.query_information(info);
        if value.is_none() {
            set_last_error(HeapError::NotSupported);
        }
        value
    }

    /// Handle a trapped access to `addr`.
    ///
    /// Always emits a report. Returns whether a live or quarantined block
    /// contains the address.
    pub fn on_bad_access(&self, addr: usize) -> bool {
        let (found, rep) = match self.shared.classify(addr) {
            Some(rep) => (true, rep),
            None => (false, BadAccessReport::unknown(addr)),
        };
        self.shared.emit(vec![rep]);
        found
    }

    /// Attribute `addr` to a block without reporting anything.
    pub fn classify(&self, addr: usize) -> Option<BadAccessReport> {
        self.shared.classify(addr)
    }

    /// Enforce the quarantine budget now, on the calling thread.
    pub fn trim(&self) {
        self.shared.trim();
    }

    /// Padded bytes currently quarantined.
    pub fn quarantine_size(&self) -> usize {
        self.shared.state.lock().quarantine.size()
    }

    /// Blocks currently quarantined.
    pub fn quarantine_len(&self) -> usize {
        self.shared.state.lock().quarantine.len()
    }

    /// User addresses of quarantined blocks, oldest first.
    pub fn quarantined(&self) -> Vec<usize> {
        let state = self.shared.state.lock();
        let user_offset = self.shared.user_offset();
        state.quarantine.iter().map(|e| e.base + user_offset).collect()
    }

    /// Configuration this proxy was created with.
    pub fn config(&self) -> &ProxyConfig {
        &self.shared.config
    }

    /// Snapshot of the proxy's counters.
    pub fn stats(&self) -> ProxyStats {
        let shared = &self.shared;
        let (quarantine_bytes, quarantine_blocks) = {
            let state = shared.state.lock();
            (state.quarantine.size(), state.quarantine.len())
        };
        ProxyStats {
            allocation_count: shared.allocations.get(),
            free_count: shared.frees.get(),
            live_bytes: shared.live_bytes.get(),
            peak_live_bytes: shared.live_bytes.peak(),
            quarantine_bytes,
            quarantine_blocks,
            evicted_blocks: shared.evicted_blocks.get(),
            evicted_bytes: shared.evicted_bytes.get(),
            deferred_trims: shared.deferred_trims.get(),
            bad_access_count: shared.bad_accesses.get(),
        }
    }
}

impl Drop for HeapProxy {
    fn drop(&mut self) {
        self.shared.flush();
    }
}

impl ProxyShared {
    fn user_offset(&self) -> usize {
        crate::allocators::block::HEADER_SIZE + self.redzone
    }

    fn strict(&self) -> StrictMode {
        self.config.strict.unwrap_or_else(strict_mode)
    }

    fn layout(&self, user_size: usize) -> Option<BlockLayout> {
        BlockLayout::for_size(user_size, self.redzone)
    }

    fn capture_trace(&self) -> Option<String> {
        #[cfg(feature = "debug")]
        {
            if self.config.capture_backtraces {
                return Some(crate::debug::backtrace::capture());
            }
        }
        None
    }

    fn block_info(&self, base: usize, record: &BlockRecord) -> BlockInfo {
        BlockInfo {
            base,
            padded_size: record.padded_size,
            user_addr: base + self.user_offset(),
            user_size: record.user_size,
            state: record.state,
        }
    }

    fn make_report(
        &self,
        kind: BadAccessKind,
        address: usize,
        base: usize,
        record: &BlockRecord,
    ) -> BadAccessReport {
        let mut rep = BadAccessReport::new(kind, address, Some(self.block_info(base, record)));
        rep.alloc_trace = record.alloc_trace.clone();
        rep.free_trace = record.free_trace.clone();
        rep
    }

    /// Send reports out. Called with the proxy lock released.
    fn emit(&self, reports: Vec<BadAccessReport>) {
        let mode = self.strict();
        for rep in reports {
            self.bad_accesses.increment();
            report(self.sink.as_ref(), &rep, mode);
        }
    }

    fn resolve(&self, blocks: &BTreeMap<usize, BlockRecord>, user: usize) -> Resolved {
        let Some(base) = BlockView::base_for_user(user, self.redzone) else {
            return Resolved::Unknown;
        };
        match blocks.get(&base) {
            Some(record) if record.state == BlockState::Allocated => Resolved::Live(base),
            Some(_) => Resolved::Retired(base),
            None => Resolved::Unknown,
        }
    }

    /// Open a tracked block, checking its header against the side table.
    fn open(&self, base: usize, record: &BlockRecord) -> Option<BlockView> {
        let ptr = NonNull::new(base as *mut u8)?;
        // SAFETY: base is in the block table, so it is a block this proxy
        // stamped and has not yet returned to the underlying heap
        let view = unsafe { BlockView::from_base(ptr, self.redzone) }?;
        (view.user_size() == record.user_size).then_some(view)
    }

    /// Open a block the table says is live, reporting it as corrupt if its
    /// header disagrees.
    fn open_live(&self, base: usize, record: &BlockRecord) -> Result<BlockView, BadAccessReport> {
        match self.open(base, record) {
            Some(view) if view.state() == Some(BlockState::Allocated) => Ok(view),
            _ => Err(self.make_report(BadAccessKind::CorruptBlock, base, base, record)),
        }
    }

    fn block_intact(&self, base: usize, record: &BlockRecord) -> bool {
        self.open(base, record).map_or(false, |view| {
            view.header_intact()
                && view.state() == Some(record.state)
                && view.check_redzones().is_none()
                && view.footer_intact()
        })
    }

    /// Fail an allocation. Called with the proxy lock released.
    fn alloc_failed(&self, error: HeapError, bytes: usize) -> *mut u8 {
        set_last_error(error);
        if self.options.contains(HeapOptions::GENERATE_EXCEPTIONS) {
            panic!("[redzone] allocation of {} bytes failed: {}", bytes, error);
        }
        ptr::null_mut()
    }

    fn alloc(&self, flags: AllocFlags, bytes: usize) -> *mut u8 {
        let Some(layout) = self.layout(bytes) else {
            return self.alloc_failed(HeapError::OutOfMemory, bytes);
        };

        let Some(base) = NonNull::new(self.heap.alloc(layout.padded_size())) else {
            return self.alloc_failed(HeapError::OutOfMemory, bytes);
        };

        if !is_aligned(base.as_ptr() as usize, ALIGNMENT) {
            self.heap.free(base.as_ptr());
            return self.alloc_failed(HeapError::NotSupported, bytes);
        }

        // SAFETY: fresh, aligned allocation of padded_size bytes
        let view = unsafe { BlockView::initialize(base, layout) };
        if flags.contains(AllocFlags::ZERO_MEMORY) {
            view.fill_user(0);
        }

        let record = BlockRecord {
            padded_size: layout.padded_size(),
            user_size: bytes,
            state: BlockState::Allocated,
            alloc_trace: self.capture_trace(),
            free_trace: None,
        };
        self.state.lock().blocks.insert(base.as_ptr() as usize, record);

        self.allocations.increment();
        self.live_bytes.add(bytes);
        view.user_ptr()
    }

    fn realloc(self: &Arc<Self>, flags: AllocFlags, mem: *mut u8, bytes: usize) -> *mut u8 {
        if mem.is_null() {
            return self.alloc(flags, bytes);
        }

        // Blocks are never grown in place; the layout always moves.
        if flags.contains(AllocFlags::REALLOC_IN_PLACE_ONLY) {
            set_last_error(HeapError::NotSupported);
            return ptr::null_mut();
        }

        let user = mem as usize;
        let old_size = {
            let state = self.state.lock();
            match self.resolve(&state.blocks, user) {
                Resolved::Live(base) => {
                    let record = &state.blocks[&base];
                    match self.open_live(base, record) {
                        Ok(_) => Ok(record.user_size),
                        Err(rep) => Err((HeapError::CorruptBlock, rep)),
                    }
                }
                Resolved::Retired(base) => Err((
                    HeapError::InvalidParameter,
                    self.make_report(BadAccessKind::UseAfterFree, user, base, &state.blocks[&base]),
                )),
                Resolved::Unknown => Err((
                    HeapError::InvalidParameter,
                    BadAccessReport::new(BadAccessKind::InvalidFree, user, None),
                )),
            }
        };

        let old_size = match old_size {
            Ok(size) => size,
            Err((error, rep)) => {
                self.emit(vec![rep]);
                set_last_error(error);
                return ptr::null_mut();
            }
        };

        let new = self.alloc(flags, bytes);
        if new.is_null() {
            return new;
        }

        // SAFETY: both regions are live user regions of distinct blocks,
        // each at least min(old, new) bytes long
        unsafe { ptr::copy_nonoverlapping(mem, new, old_size.min(bytes)) };
        if !self.free(flags, mem) {
            // Lost a race with another free of `mem`; keep its outcome.
            let error = last_error().unwrap_or(HeapError::InvalidParameter);
            self.free(flags, new);
            set_last_error(error);
            return ptr::null_mut();
        }
        new
    }

    fn free(self: &Arc<Self>, _flags: AllocFlags, mem: *mut u8) -> bool {
        if mem.is_null() {
            return true;
        }

        let mut reports = Vec::new();
        let mut evicted = Vec::new();
        let mut defer = false;

        let result = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let result = self.retire(state, mem as usize, &mut reports);
            if result.is_ok() && state.quarantine.is_over_budget() {
                if self.defers_trimming() {
                    defer = true;
                } else {
                    evicted = self.take_overflow(state);
                }
            }
            result
        };

        self.release(evicted, &mut reports);
        self.emit(reports);

        match result {
            Ok(()) => {
                if defer {
                    self.schedule_trim();
                }
                true
            }
            Err(error) => {
                set_last_error(error);
                false
            }
        }
    }

    /// Move a live block into the quarantine. Leaves all state untouched on
    /// failure.
    fn retire(
        &self,
        state: &mut ProxyState,
        user: usize,
        reports: &mut Vec<BadAccessReport>,
    ) -> Result<(), HeapError> {
        let base = match self.resolve(&state.blocks, user) {
            Resolved::Live(base) => base,
            Resolved::Retired(base) => {
                let record = &state.blocks[&base];
                reports.push(self.make_report(BadAccessKind::DoubleFree, user, base, record));
                return Err(HeapError::DoubleFree);
            }
            Resolved::Unknown => {
                reports.push(BadAccessReport::new(BadAccessKind::InvalidFree, user, None));
                return Err(HeapError::InvalidParameter);
            }
        };

        let Some(record) = state.blocks.get_mut(&base) else {
            return Err(HeapError::InvalidParameter);
        };

        let view = match self.open_live(base, record) {
            Ok(view) => view,
            Err(rep) => {
                reports.push(rep);
                return Err(HeapError::CorruptBlock);
            }
        };

        if self.config.check_on_free {
            if let Some(fault) = view.check_redzones() {
                let kind = match fault.side {
                    RedzoneSide::Leading => BadAccessKind::HeapBufferUnderflow,
                    RedzoneSide::Trailing => BadAccessKind::HeapBufferOverflow,
                };
                reports.push(self.make_report(kind, fault.address, base, record));
            } else if !view.footer_intact() {
                let footer = base + view.layout().footer_offset();
                reports.push(self.make_report(BadAccessKind::CorruptBlock, footer, base, record));
            }
        }

        view.set_state(BlockState::Freed);
        if self.config.poison_freed {
            // SAFETY: the user region belongs to this block
            unsafe { poison_freed(view.user_ptr(), record.user_size) };
        }
        record.free_trace = self.capture_trace();

        view.set_state(BlockState::Quarantined);
        record.state = BlockState::Quarantined;
        state.quarantine.push(QuarantineEntry {
            base,
            padded_size: record.padded_size,
            user_size: record.user_size,
        });

        self.frees.increment();
        self.live_bytes.sub(record.user_size);
        Ok(())
    }

    fn defers_trimming(&self) -> bool {
        self.config.trim_mode == TrimMode::Deferred
            && self
                .deferred
                .as_ref()
                .map_or(false, |hook| hook.signal.is_accepting())
    }

    fn schedule_trim(self: &Arc<Self>) {
        let Some(hook) = self.deferred.as_ref() else {
            self.trim();
            return;
        };
        if !self.trim_requested.swap(true, Ordering::AcqRel) {
            hook.queue.push(self);
            self.deferred_trims.increment();
        }
        hook.signal.signal_work();
    }

    /// Evict over-budget blocks, on whichever thread calls this.
    pub(crate) fn trim(&self) {
        self.trim_requested.store(false, Ordering::Release);
        let evicted = {
            let mut guard = self.state.lock();
            self.take_overflow(&mut guard)
        };
        let mut reports = Vec::new();
        self.release(evicted, &mut reports);
        self.emit(reports);
    }

    fn take_overflow(&self, state: &mut ProxyState) -> Evicted {
        let entries = state.quarantine.take_overflow();
        entries
            .into_iter()
            .filter_map(|entry| state.blocks.remove(&entry.base).map(|record| (entry, record)))
            .collect()
    }

    /// Hand evicted blocks back to the underlying heap, oldest first.
    ///
    /// Blocks are already out of the table, so no other thread can reach
    /// them and the proxy lock is not needed.
    fn release(&self, evicted: Evicted, reports: &mut Vec<BadAccessReport>) {
        for (entry, record) in evicted {
            let (Some(base), Some(layout)) = (
                NonNull::new(entry.base as *mut u8),
                self.layout(record.user_size),
            ) else {
                continue;
            };

            // SAFETY: the layout comes from the side table entry for this block
            let view = unsafe { BlockView::from_parts(base, layout) };
            if self.config.poison_freed {
                // SAFETY: the user region is still owned by the proxy
                let dirty = unsafe { first_unpoisoned(view.user_ptr(), record.user_size) };
                if let Some(offset) = dirty {
                    let address = view.user_ptr() as usize + offset;
                    reports.push(self.make_report(BadAccessKind::UseAfterFree, address, entry.base, &record));
                }
            }
            view.invalidate();
            self.heap.free(base.as_ptr());

            self.evicted_blocks.increment();
            self.evicted_bytes.add(entry.padded_size as u64);

            #[cfg(feature = "log")]
            log::trace!(
                "evicted block {:#x} ({} bytes padded) from quarantine",
                entry.base,
                entry.padded_size
            );
        }
    }

    /// Return every quarantined block to the underlying heap.
    fn flush(&self) {
        let (evicted, live) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let evicted: Evicted = state
                .quarantine
                .drain_all()
                .into_iter()
                .filter_map(|entry| state.blocks.remove(&entry.base).map(|record| (entry, record)))
                .collect();
            (evicted, state.blocks.len())
        };

        #[cfg(feature = "log")]
        if live > 0 {
            log::debug!("heap destroyed with {} live blocks", live);
        }
        #[cfg(not(feature = "log"))]
        let _ = live;

        let mut reports = Vec::new();
        self.release(evicted, &mut reports);
        self.emit(reports);
    }

    fn size(&self, mem: *const u8) -> Option<usize> {
        let state = self.state.lock();
        match self.resolve(&state.blocks, mem as usize) {
            Resolved::Live(base) => Some(state.blocks[&base].user_size),
            Resolved::Retired(_) | Resolved::Unknown => {
                set_last_error(HeapError::InvalidParameter);
                None
            }
        }
    }

    fn validate(&self, mem: *const u8) -> bool {
        let state = self.state.lock();

        if mem.is_null() {
            let ok = state
                .blocks
                .iter()
                .filter(|(_, record)| record.state == BlockState::Allocated)
                .all(|(&base, record)| self.block_intact(base, record));
            if !ok {
                set_last_error(HeapError::CorruptBlock);
            }
            return ok;
        }

        match self.resolve(&state.blocks, mem as usize) {
            Resolved::Live(base) => {
                let ok = self.block_intact(base, &state.blocks[&base]);
                if !ok {
                    set_last_error(HeapError::CorruptBlock);

                    #[cfg(feature = "log")]
                    log::warn!("block {:#x} failed validation", mem as usize);
                }
                ok
            }
            Resolved::Retired(_) | Resolved::Unknown => {
                set_last_error(HeapError::InvalidParameter);
                false
            }
        }
    }

    fn classify(&self, addr: usize) -> Option<BadAccessReport> {
        let state = self.state.lock();
        let (&base, record) = state.blocks.range(..=addr).next_back()?;
        let info = self.block_info(base, record);
        if !info.contains(addr) {
            return None;
        }
        Some(self.make_report(classify_access(&info, addr), addr, base, record))
    }
}
