//! Generational handle table
//!
//! Maps opaque pointer-sized handles to values. A handle packs a slot index
//! and the slot's generation; removing a value bumps the generation, so a
//! stale handle can never be mistaken for whatever later reuses the slot.
//! Generation 0 is never issued, which keeps the raw value 0 permanently
//! invalid. A slot whose generation reaches the maximum is retired rather
//! than wrapped, so no handle is ever issued twice.

use parking_lot::RwLock;

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1usize << INDEX_BITS) - 1;
const GEN_MASK: usize = usize::MAX >> INDEX_BITS;

/// Opaque handle into a [`GenerationalTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Handle(usize);

impl Handle {
    fn pack(index: usize, generation: usize) -> Self {
        Handle(((generation & GEN_MASK) << INDEX_BITS) | (index & INDEX_MASK))
    }

    fn index(self) -> usize {
        self.0 & INDEX_MASK
    }

    fn generation(self) -> usize {
        self.0 >> INDEX_BITS
    }

    /// Rebuild a handle from its ABI representation.
    pub const fn from_raw(raw: isize) -> Self {
        Handle(raw as usize)
    }

    /// ABI representation (`intptr_t`).
    pub const fn into_raw(self) -> isize {
        self.0 as isize
    }
}

struct Entry<T> {
    generation: usize,
    value: Option<T>,
}

struct Inner<T> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    live: usize,
}

/// Slab of values addressed by generational handles.
///
/// Lookups take a shared lock for the duration of the caller's closure, so a
/// concurrent [`remove`](Self::remove) cannot free a value while it is in use.
pub struct GenerationalTable<T> {
    inner: RwLock<Inner<T>>,
}

impl<T> GenerationalTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Store a value and return its handle.
    ///
    /// Returns `None` once every index representable in a handle is live or
    /// retired.
    pub fn insert(&self, value: T) -> Option<Handle> {
        let mut inner = self.inner.write();
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                let index = inner.entries.len();
                if index > INDEX_MASK {
                    return None;
                }
                inner.entries.push(Entry {
                    generation: 1,
                    value: None,
                });
                index
            }
        };
        let entry = &mut inner.entries[index];
        entry.value = Some(value);
        let handle = Handle::pack(index, entry.generation);
        inner.live += 1;
        Some(handle)
    }

    /// Run `f` against the value behind `handle`, if it is live.
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&T) -> R) -> Option<R> {
        let inner = self.inner.read();
        let entry = inner.entries.get(handle.index())?;
        if entry.generation != handle.generation() {
            return None;
        }
        entry.value.as_ref().map(f)
    }

    /// Remove the value behind `handle`. Stale or unknown handles are a no-op.
    pub fn remove(&self, handle: Handle) -> Option<T> {
        let mut inner = self.inner.write();
        let index = handle.index();
        let entry = inner.entries.get_mut(index)?;
        if entry.generation != handle.generation() {
            return None;
        }
        let value = entry.value.take()?;
        if entry.generation < GEN_MASK {
            entry.generation += 1;
            inner.free.push(index);
        }
        inner.live -= 1;
        Some(value)
    }

    /// Check whether `handle` refers to a live value
    pub fn contains(&self, handle: Handle) -> bool {
        self.with(handle, |_| ()).is_some()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for GenerationalTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
