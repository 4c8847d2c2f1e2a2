//! Atomic cells behind checked handles
//!
//! Compiled code never touches an atomic directly. It asks the
//! [`HandleTable`] for a cell and gets back an opaque handle; every later
//! operation checks that the handle is still live before touching memory, and
//! all operations use sequentially-consistent ordering.
//!
//! Cell storage comes from the [`TrackedHeap`], so cells leaked by compiled
//! code are reclaimed at process exit like any other tracked allocation.

use crate::error::{HandleKind, RuntimeError, RuntimeResult};
use crate::heap::{self, TrackedHeap};
use crate::registry::{GenerationalTable, Handle};
use once_cell::sync::Lazy;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

/// Width of a cell's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellWidth {
    I32,
    I64,
}

/// Integer types that can live in an atomic cell.
pub trait CellValue: Copy + Send + Sync + 'static {
    /// Backing atomic type
    type Atomic: Send + Sync + 'static;
    const WIDTH: CellWidth;

    /// # Safety
    /// `ptr` must point at an initialised, live `Self::Atomic`.
    unsafe fn atomic<'a>(ptr: NonNull<u8>) -> &'a Self::Atomic;
    fn init(ptr: NonNull<u8>, value: Self);
    fn load(a: &Self::Atomic) -> Self;
    fn store(a: &Self::Atomic, value: Self);
    fn fetch_add(a: &Self::Atomic, delta: Self) -> Self;
    fn swap(a: &Self::Atomic, value: Self) -> Self;
    fn compare_exchange(a: &Self::Atomic, expected: Self, desired: Self) -> bool;
}

macro_rules! cell_value {
    ($ty:ty, $atomic:ty, $width:expr) => {
        impl CellValue for $ty {
            type Atomic = $atomic;
            const WIDTH: CellWidth = $width;

            unsafe fn atomic<'a>(ptr: NonNull<u8>) -> &'a $atomic {
                &*(ptr.as_ptr() as *const $atomic)
            }

            fn init(ptr: NonNull<u8>, value: Self) {
                unsafe { (ptr.as_ptr() as *mut $atomic).write(<$atomic>::new(0)) };
                let a = unsafe { Self::atomic(ptr) };
                a.store(value, Ordering::SeqCst);
            }

            fn load(a: &$atomic) -> Self {
                a.load(Ordering::SeqCst)
            }

            fn store(a: &$atomic, value: Self) {
                a.store(value, Ordering::SeqCst)
            }

            fn fetch_add(a: &$atomic, delta: Self) -> Self {
                a.fetch_add(delta, Ordering::SeqCst)
            }

            fn swap(a: &$atomic, value: Self) -> Self {
                a.swap(value, Ordering::SeqCst)
            }

            fn compare_exchange(a: &$atomic, expected: Self, desired: Self) -> bool {
                a.compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            }
        }
    };
}

cell_value!(i32, AtomicI32, CellWidth::I32);
cell_value!(i64, AtomicI64, CellWidth::I64);

/// Heap-resident cell owned by the table.
struct CellSlot {
    width: CellWidth,
    ptr: NonNull<u8>,
}

// The pointee is an atomic; sharing the pointer across threads is sound.
unsafe impl Send for CellSlot {}
unsafe impl Sync for CellSlot {}

/// Registry of live atomic cells.
pub struct HandleTable {
    cells: GenerationalTable<CellSlot>,
    heap: Arc<TrackedHeap>,
}

impl HandleTable {
    /// Create a table allocating from `heap`
    pub fn new(heap: Arc<TrackedHeap>) -> Self {
        Self {
            cells: GenerationalTable::new(),
            heap,
        }
    }

    /// Allocate a cell holding `value` and return its handle.
    pub fn new_cell<T: CellValue>(&self, value: T) -> RuntimeResult<Handle> {
        let size = std::mem::size_of::<i64>();
        let ptr = self.heap.alloc(size)?;
        T::init(ptr, value);
        match self.cells.insert(CellSlot {
            width: T::WIDTH,
            ptr,
        }) {
            Some(handle) => Ok(handle),
            None => {
                unsafe { self.heap.free(ptr.as_ptr()) };
                Err(RuntimeError::Unsupported(
                    "atomic handle space exhausted".to_string(),
                ))
            }
        }
    }

    /// Sequentially-consistent load
    pub fn load<T: CellValue>(&self, handle: Handle) -> RuntimeResult<T> {
        self.with_cell::<T, _, _>(handle, |a| T::load(a))
    }

    /// Sequentially-consistent store
    pub fn store<T: CellValue>(&self, handle: Handle, value: T) -> RuntimeResult<()> {
        self.with_cell::<T, _, _>(handle, |a| T::store(a, value))
    }

    /// Add `delta`, returning the previous value
    pub fn fetch_add<T: CellValue>(&self, handle: Handle, delta: T) -> RuntimeResult<T> {
        self.with_cell::<T, _, _>(handle, |a| T::fetch_add(a, delta))
    }

    /// Replace the value, returning the previous one
    pub fn swap<T: CellValue>(&self, handle: Handle, value: T) -> RuntimeResult<T> {
        self.with_cell::<T, _, _>(handle, |a| T::swap(a, value))
    }

    /// Strong compare-and-swap. The current value is not reported on failure.
    pub fn cas<T: CellValue>(&self, handle: Handle, expected: T, desired: T) -> RuntimeResult<bool> {
        self.with_cell::<T, _, _>(handle, |a| T::compare_exchange(a, expected, desired))
    }

    /// Release a cell. Unknown or already-dropped handles are ignored.
    pub fn drop_cell(&self, handle: Handle) {
        if let Some(slot) = self.cells.remove(handle) {
            unsafe { self.heap.free(slot.ptr.as_ptr()) };
        }
    }

    /// Check whether `handle` names a live cell of width `T`
    pub fn is_live<T: CellValue>(&self, handle: Handle) -> bool {
        self.cells
            .with(handle, |slot| slot.width == T::WIDTH)
            .unwrap_or(false)
    }

    /// Number of live cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if no cells are live
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn with_cell<T, R, F>(&self, handle: Handle, f: F) -> RuntimeResult<R>
    where
        T: CellValue,
        F: FnOnce(&T::Atomic) -> R,
    {
        self.cells
            .with(handle, |slot| {
                if slot.width != T::WIDTH {
                    return None;
                }
                // The table's read lock keeps the slot from being freed while `f` runs.
                Some(f(unsafe { T::atomic(slot.ptr) }))
            })
            .flatten()
            .ok_or(RuntimeError::InvalidHandle(HandleKind::Atomic))
    }
}

static GLOBAL: Lazy<HandleTable> = Lazy::new(|| HandleTable::new(Arc::clone(heap::global())));

/// The process-wide cell table used by the C ABI and the event loop.
pub fn global() -> &'static HandleTable {
    &GLOBAL
}
