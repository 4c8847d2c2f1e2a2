//! Tracked heap
//!
//! Every allocation made through [`TrackedHeap`] is recorded so compiled code
//! may "leak" freely: whatever is still tracked when the process exits is
//! released by a finalizer registered with the C runtime's `atexit`.
//!
//! Storage comes from the C allocator so pointers handed across the ABI can be
//! resized or freed by either side. `free` of an untracked pointer is a no-op,
//! which makes double frees of tracked pointers harmless, while `realloc` of an
//! untracked pointer adopts the result as a new record.

use crate::error::{RuntimeError, RuntimeResult};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of an allocation record, stable across `realloc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

/// Process-wide allocation registry.
pub struct TrackedHeap {
    /// Live records keyed by pointer address
    records: Mutex<HashMap<usize, RecordId>>,
    next_id: AtomicU64,
    /// Register `finalize_global` on first allocation
    exit_hook: bool,
    hook_registered: AtomicBool,
    releasing: AtomicBool,
}

impl TrackedHeap {
    /// Create a private heap with no exit hook
    pub fn new() -> Self {
        Self::build(false)
    }

    fn build(exit_hook: bool) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            exit_hook,
            hook_registered: AtomicBool::new(false),
            releasing: AtomicBool::new(false),
        }
    }

    /// Allocate `n` bytes (at least 1) and track the result.
    pub fn alloc(&self, n: usize) -> RuntimeResult<NonNull<u8>> {
        let ptr = NonNull::new(unsafe { libc::malloc(n.max(1)) } as *mut u8)
            .ok_or(RuntimeError::OutOfMemory)?;
        self.register_exit_hook();
        self.track(ptr.as_ptr());
        Ok(ptr)
    }

    /// Resize `ptr` to `n` bytes (at least 1).
    ///
    /// A null `ptr` behaves as [`alloc`](Self::alloc). A tracked pointer keeps
    /// its record, now pointing at the new address. An untracked pointer is
    /// adopted as a brand-new record.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer obtained from the C allocator.
    pub unsafe fn realloc(&self, ptr: *mut u8, n: usize) -> RuntimeResult<NonNull<u8>> {
        if ptr.is_null() {
            return self.alloc(n);
        }
        let mut records = self.records.lock();
        let resized = NonNull::new(libc::realloc(ptr as *mut libc::c_void, n.max(1)) as *mut u8)
            .ok_or(RuntimeError::OutOfMemory)?;

        let id = match records.remove(&(ptr as usize)) {
            Some(id) => id,
            None => {
                self.register_exit_hook();
                self.fresh_id()
            }
        };
        records.insert(resized.as_ptr() as usize, id);
        Ok(resized)
    }

    /// Release a tracked pointer. Untracked and null pointers are ignored.
    ///
    /// # Safety
    /// If `ptr` is tracked it must not be used after this call.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let tracked = self.records.lock().remove(&(ptr as usize)).is_some();
        if tracked {
            libc::free(ptr as *mut libc::c_void);
        }
    }

    /// Check if `ptr` is currently tracked
    pub fn is_tracked(&self, ptr: *const u8) -> bool {
        self.records.lock().contains_key(&(ptr as usize))
    }

    /// Record identity for a tracked pointer
    pub fn record_id(&self, ptr: *const u8) -> Option<RecordId> {
        self.records.lock().get(&(ptr as usize)).copied()
    }

    /// Number of tracked allocations
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free every tracked allocation exactly once, newest first.
    ///
    /// Re-entrant calls return 0 without touching the registry. Returns the
    /// number of allocations released.
    pub fn release_all(&self) -> usize {
        if self.releasing.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let mut drained: Vec<(usize, RecordId)> = self.records.lock().drain().collect();
        drained.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        for &(addr, _) in &drained {
            unsafe { libc::free(addr as *mut libc::c_void) };
        }
        self.releasing.store(false, Ordering::SeqCst);
        drained.len()
    }

    fn track(&self, ptr: *mut u8) {
        let id = self.fresh_id();
        self.records.lock().insert(ptr as usize, id);
    }

    fn fresh_id(&self) -> RecordId {
        RecordId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register_exit_hook(&self) {
        if !self.exit_hook || self.hook_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        if unsafe { libc::atexit(finalize_global) } != 0 {
            crate::host::host_panic("register atexit cleanup failed");
        }
    }
}

impl Default for TrackedHeap {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: Lazy<Arc<TrackedHeap>> = Lazy::new(|| Arc::new(TrackedHeap::build(true)));

/// The process-wide heap whose leftovers are freed at exit.
pub fn global() -> &'static Arc<TrackedHeap> {
    &GLOBAL
}

extern "C" fn finalize_global() {
    if let Some(heap) = Lazy::get(&GLOBAL) {
        heap.release_all();
    }
}
