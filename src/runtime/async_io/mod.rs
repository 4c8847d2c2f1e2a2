//! Event loop core and socket readiness
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    EVENT LOOP CORE                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WakeSlots: 256 (token: i64 cell, pending: i32 cell) pairs      │
//! │  Poller: one per process, wake() / wait(timeout_ms)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    SOCKETS                                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  TcpTable: handle -> socket (connect/recv/send/close/...)       │
//! │  readiness: call-scoped epoll/kqueue/poll/select per wait       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Two readiness paths
//!
//! The two halves above do not share a multiplexer, and that is deliberate.
//! The [`Poller`] only carries scheduler wake-ups: a scheduler built on top
//! publishes work into the wake slots, calls [`EventLoopCore::wake`], and the
//! thread parked in [`EventLoopCore::wait`] inspects the slots. Socket
//! readiness is asked per call through [`readiness`], which builds and tears
//! down its own multiplexer, so a blocked socket wait never consumes or
//! delays an event-loop wake-up.
//!
//! # Usage
//!
//! ```ignore
//! let core = EventLoopCore::init()?;
//! let token = core.token_handle(3)?;
//! cells::global().store(token, 42i64)?;
//! core.wake()?;
//!
//! // elsewhere
//! core.wait(100)?;
//! ```

pub mod poller;
pub mod readiness;
pub mod socket;

pub use poller::Poller;
pub use readiness::{wait_readable_fd, wait_writable_fd, RawDescriptor};
pub use socket::TcpTable;

use crate::cells::{self, HandleTable};
use crate::config::{self, EventLoopConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::registry::Handle;
use once_cell::sync::OnceCell;

/// Number of wake slots
pub const N_SLOTS: usize = 256;

/// One (token, pending-count) pair of atomic cell handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeSlot {
    /// `i64` cell
    pub token: Handle,
    /// `i32` cell
    pub pending: Handle,
}

/// Process-wide wake-slot table plus its poller.
pub struct EventLoopCore {
    slots: Box<[WakeSlot]>,
    poller: Poller,
}

static CORE: OnceCell<EventLoopCore> = OnceCell::new();

impl EventLoopCore {
    /// Initialise the event loop on first call; later calls return the same core.
    ///
    /// Safe under concurrent first calls: exactly one caller allocates the
    /// slots and constructs the poller.
    pub fn init() -> RuntimeResult<&'static EventLoopCore> {
        CORE.get_or_try_init(|| Self::build(cells::global(), &config::current().event_loop))
    }

    /// The core, if [`init`](Self::init) has completed
    pub fn get() -> Option<&'static EventLoopCore> {
        CORE.get()
    }

    fn build(cells: &HandleTable, config: &EventLoopConfig) -> RuntimeResult<Self> {
        let poller = Poller::new(config)
            .map_err(|e| RuntimeError::exhausted("event loop poller creation failed", e))?;

        let mut slots = Vec::with_capacity(N_SLOTS);
        for _ in 0..N_SLOTS {
            match new_slot(cells) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in &slots {
                        cells.drop_cell(slot.token);
                        cells.drop_cell(slot.pending);
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(slots = N_SLOTS, backend = Poller::backend(), "event loop initialised");
        Ok(Self {
            slots: slots.into_boxed_slice(),
            poller,
        })
    }

    /// Number of wake slots (always 256)
    pub fn n_slots(&self) -> usize {
        self.slots.len()
    }

    /// Slot `index`
    pub fn slot(&self, index: i64) -> RuntimeResult<&WakeSlot> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get(i))
            .ok_or(RuntimeError::IndexOutOfRange {
                what: "wake slot",
                index,
            })
    }

    /// Handle of slot `index`'s `i64` token cell
    pub fn token_handle(&self, index: i64) -> RuntimeResult<Handle> {
        self.slot(index).map(|s| s.token)
    }

    /// Handle of slot `index`'s `i32` pending-count cell
    pub fn pending_handle(&self, index: i64) -> RuntimeResult<Handle> {
        self.slot(index).map(|s| s.pending)
    }

    /// Wake a thread blocked in [`wait`](Self::wait), or the next one to call it.
    pub fn wake(&self) -> RuntimeResult<()> {
        tracing::trace!("event loop wake");
        self.poller
            .wake()
            .map_err(|e| RuntimeError::exhausted("event loop wake failed", e))
    }

    /// Block until woken or `timeout_ms` elapses (negative means poll).
    pub fn wait(&self, timeout_ms: i32) -> RuntimeResult<()> {
        tracing::trace!(timeout_ms, "event loop wait");
        self.poller
            .wait(timeout_ms)
            .map_err(|e| RuntimeError::exhausted("event loop wait failed", e))
    }
}

fn new_slot(cells: &HandleTable) -> RuntimeResult<WakeSlot> {
    let token = cells.new_cell(0i64)?;
    let pending = match cells.new_cell(0i32) {
        Ok(h) => h,
        Err(e) => {
            cells.drop_cell(token);
            return Err(e);
        }
    };
    Ok(WakeSlot { token, pending })
}
