//! Underlying heap consumed by the proxy.
//!
//! The proxy only needs the primitive allocate/free/size surface of a
//! platform heap. [`SystemHeap`] provides it on top of `std::alloc`.

use std::alloc::{alloc, dealloc, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Condvar;

use crate::allocators::block::ALIGNMENT;
use crate::api::flags::{HeapEntry, HeapInformation, HeapOptions};
use crate::sync::mutex::Mutex;

/// Primitive heap operations the proxy builds on.
///
/// Implementations must be internally thread-safe. Every pointer returned by
/// `alloc` must be aligned to [`ALIGNMENT`]. Dropping the heap releases it
/// along with any memory still allocated from it.
pub trait UnderlyingHeap: Send + Sync {
    /// Allocate `size` bytes, returning null on failure.
    fn alloc(&self, size: usize) -> *mut u8;

    /// Release memory returned by `alloc`. Returns false for unknown pointers.
    fn free(&self, ptr: *mut u8) -> bool;

    /// Size of an allocation returned by `alloc`.
    fn size(&self, ptr: *const u8) -> Option<usize>;

    /// Coalesce free space, returning the largest free block available.
    fn compact(&self) -> usize;

    /// Acquire the heap's enumeration lock.
    fn lock(&self) -> bool;

    /// Release the heap's enumeration lock.
    fn unlock(&self) -> bool;

    /// Snapshot of the allocations currently held by the heap.
    fn walk(&self) -> Vec<HeapEntry>;

    /// Change a heap setting.
    fn set_information(&self, info: HeapInformation, value: u64) -> bool;

    /// Read a heap setting.
    fn query_information(&self, info: HeapInformation) -> Option<u64>;
}

/// Heap backed by the global system allocator.
///
/// Uses a mutex for thread safety; allocations are recorded in a side
/// table so they can be sized, walked and released on drop.
pub struct SystemHeap {
    options: HeapOptions,
    initial_size: usize,
    max_size: usize,

    /// Live allocations, address -> size
    blocks: Mutex<HashMap<usize, usize>>,

    /// Total bytes currently allocated
    allocated_bytes: AtomicUsize,

    /// Total allocation count
    allocation_count: AtomicUsize,

    enum_locked: std::sync::Mutex<bool>,
    enum_cvar: Condvar,

    compatibility_mode: AtomicU64,
    terminate_on_corruption: AtomicBool,
}

impl SystemHeap {
    /// Create a heap with the given sizing hints.
    ///
    /// `max_size` of 0 means growable; otherwise allocations that would push
    /// the heap past `max_size` fail. Returns `None` if `initial_size`
    /// exceeds a nonzero `max_size`.
    pub fn create(options: HeapOptions, initial_size: usize, max_size: usize) -> Option<Self> {
        if max_size != 0 && initial_size > max_size {
            return None;
        }

        Some(Self {
            options,
            initial_size,
            max_size,
            blocks: Mutex::new(HashMap::new()),
            allocated_bytes: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            enum_locked: std::sync::Mutex::new(false),
            enum_cvar: Condvar::new(),
            compatibility_mode: AtomicU64::new(0),
            terminate_on_corruption: AtomicBool::new(false),
        })
    }

    /// Options the heap was created with.
    pub fn options(&self) -> HeapOptions {
        self.options
    }

    /// Get total bytes currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Get total allocation count.
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    fn layout_for(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), ALIGNMENT).ok()
    }
}

impl UnderlyingHeap for SystemHeap {
    fn alloc(&self, size: usize) -> *mut u8 {
        let Some(layout) = Self::layout_for(size) else {
            return std::ptr::null_mut();
        };

        let mut blocks = self.blocks.lock();
        let in_use = self.allocated_bytes.load(Ordering::Relaxed);
        if self.max_size != 0 && in_use.saturating_add(size) > self.max_size {
            return std::ptr::null_mut();
        }

        // SAFETY: layout has a nonzero size and a power-of-two alignment
        let ptr = unsafe { alloc(layout) };

        if !ptr.is_null() {
            blocks.insert(ptr as usize, size);
            self.allocated_bytes.fetch_add(size, Ordering::Relaxed);
            self.allocation_count.fetch_add(1, Ordering::Relaxed);
        }

        ptr
    }

    fn free(&self, ptr: *mut u8) -> bool {
        let mut blocks = self.blocks.lock();
        let Some(size) = blocks.remove(&(ptr as usize)) else {
            return false;
        };

        if let Some(layout) = Self::layout_for(size) {
            // SAFETY: ptr was returned by `alloc` with this layout and is
            // removed from the table, so it is released exactly once
            unsafe { dealloc(ptr, layout) };
        }
        self.allocated_bytes.fetch_sub(size, Ordering::Relaxed);
        true
    }

    fn size(&self, ptr: *const u8) -> Option<usize> {
        self.blocks.lock().get(&(ptr as usize)).copied()
    }

    fn compact(&self) -> usize {
        // Freed memory is returned to the system allocator right away, so
        // there is never any free space left to coalesce here.
        if self.max_size == 0 {
            0
        } else {
            self.max_size.saturating_sub(self.allocated_bytes())
        }
    }

    fn lock(&self) -> bool {
        let mut locked = self.enum_locked.lock().unwrap_or_else(|e| e.into_inner());
        while *locked {
            locked = self
                .enum_cvar
                .wait(locked)
                .unwrap_or_else(|e| e.into_inner());
        }
        *locked = true;
        true
    }

    fn unlock(&self) -> bool {
        let mut locked = self.enum_locked.lock().unwrap_or_else(|e| e.into_inner());
        if !*locked {
            return false;
        }
        *locked = false;
        self.enum_cvar.notify_one();
        true
    }

    fn walk(&self) -> Vec<HeapEntry> {
        let blocks = self.blocks.lock();
        let mut entries: Vec<HeapEntry> = blocks
            .iter()
            .map(|(&address, &size)| HeapEntry {
                address,
                size,
                busy: true,
            })
            .collect();
        entries.sort_by_key(|e| e.address);
        entries
    }

    fn set_information(&self, info: HeapInformation, value: u64) -> bool {
        match info {
            HeapInformation::CompatibilityMode => {
                // 0 = standard, 2 = low-fragmentation
                if value != 0 && value != 2 {
                    return false;
                }
                self.compatibility_mode.store(value, Ordering::Relaxed);
                true
            }
            HeapInformation::EnableTerminationOnCorruption => {
                self.terminate_on_corruption.store(true, Ordering::Relaxed);
                true
            }
            HeapInformation::ReservedSize | HeapInformation::MaximumSize => false,
        }
    }

    fn query_information(&self, info: HeapInformation) -> Option<u64> {
        Some(match info {
            HeapInformation::CompatibilityMode => self.compatibility_mode.load(Ordering::Relaxed),
            HeapInformation::EnableTerminationOnCorruption => {
                self.terminate_on_corruption.load(Ordering::Relaxed) as u64
            }
            HeapInformation::ReservedSize => self.initial_size as u64,
            HeapInformation::MaximumSize => self.max_size as u64,
        })
    }
}

impl Drop for SystemHeap {
    fn drop(&mut self) {
        let blocks = std::mem::take(&mut *self.blocks.lock());
        for (addr, size) in blocks {
            if let Some(layout) = Self::layout_for(size) {
                // SAFETY: every table entry is a live allocation with this layout
                unsafe { dealloc(addr as *mut u8, layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocation() {
        let heap = SystemHeap::create(HeapOptions::NONE, 0, 0).unwrap();

        let ptr = heap.alloc(64);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % ALIGNMENT, 0);
        assert_eq!(heap.allocated_bytes(), 64);
        assert_eq!(heap.size(ptr), Some(64));

        assert!(heap.free(ptr));
        assert_eq!(heap.allocated_bytes(), 0);
        assert!(!heap.free(ptr));
    }

    #[test]
    fn test_max_size_enforced() {
        let heap = SystemHeap::create(HeapOptions::NONE, 0, 128).unwrap();
        let a = heap.alloc(100);
        assert!(!a.is_null());
        assert!(heap.alloc(100).is_null());
        assert!(heap.free(a));
        assert!(!heap.alloc(100).is_null());
    }

    #[test]
    fn test_invalid_sizing_hints() {
        assert!(SystemHeap::create(HeapOptions::NONE, 4096, 1024).is_none());
    }

    #[test]
    fn test_walk_sorted() {
        let heap = SystemHeap::create(HeapOptions::NONE, 0, 0).unwrap();
        let ptrs: Vec<_> = (0..4).map(|i| heap.alloc(16 * (i + 1))).collect();
        let entries = heap.walk();
        assert_eq!(entries.len(), 4);
        assert!(entries.windows(2).all(|w| w[0].address < w[1].address));
        assert!(entries.iter().all(|e| e.busy));
        for p in ptrs {
            heap.free(p);
        }
    }

    #[test]
    fn test_lock_unlock() {
        let heap = SystemHeap::create(HeapOptions::NONE, 0, 0).unwrap();
        assert!(!heap.unlock());
        assert!(heap.lock());
        assert!(heap.unlock());
    }

    #[test]
    fn test_information() {
        let heap = SystemHeap::create(HeapOptions::NONE, 4096, 0).unwrap();
        assert!(heap.set_information(HeapInformation::CompatibilityMode, 2));
        assert!(!heap.set_information(HeapInformation::CompatibilityMode, 1));
        assert_eq!(heap.query_information(HeapInformation::CompatibilityMode), Some(2));
        assert_eq!(heap.query_information(HeapInformation::ReservedSize), Some(4096));
        assert!(!heap.set_information(HeapInformation::MaximumSize, 1));
    }
}
