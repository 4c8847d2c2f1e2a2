//! vox-rt - native runtime substrate for compiled Vox programs
//!
//! The primitives compiled code cannot express in itself because they need
//! direct OS or hardware access.
//!
//! # Features
//!
//! - **Tracked heap**: allocations compiled code may leak, reclaimed at exit
//! - **Atomic cells**: `i32`/`i64` cells behind generational handles, every
//!   operation sequentially consistent and liveness-checked
//! - **Event loop core**: 256 wake slots plus one epoll/kqueue/IOCP poller
//! - **Sockets**: TCP connect/listen/accept/recv/send and readiness waits
//! - **Clock**: monotonic nanoseconds with OS fallbacks
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Compiled program (links vox_rt_* C ABI) │
//! └────────────────────┬─────────────────────┘
//!                      │
//!      ┌───────────────┼────────────────┬──────────────┐
//!      ▼               ▼                ▼              ▼
//! ┌─────────┐   ┌─────────────┐   ┌───────────┐   ┌─────────┐
//! │  cells  │   │ EventLoop-  │   │ TcpTable  │   │  clock  │
//! │         │◄──│    Core     │   │ readiness │   │         │
//! └────┬────┘   └──────┬──────┘   └───────────┘   └─────────┘
//!      ▼               ▼
//! ┌─────────┐   ┌─────────────┐
//! │  heap   │   │   Poller    │
//! └─────────┘   └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use vox_rt::cells;
//!
//! let table = cells::global();
//! let h = table.new_cell(5i64).unwrap();
//! assert_eq!(table.fetch_add(h, 3i64).unwrap(), 5);
//! assert!(table.cas(h, 8i64, 100).unwrap());
//! table.drop_cell(h);
//! assert!(table.load::<i64>(h).is_err());
//! ```

pub mod abi;
pub mod cells;
pub mod clock;
pub mod config;
pub mod error;
pub mod heap;
pub mod host;
pub mod registry;
pub mod runtime;

pub use cells::{CellValue, HandleTable};
pub use config::{ConfigError, RuntimeConfig};
pub use error::{HandleKind, RuntimeError, RuntimeResult};
pub use heap::TrackedHeap;
pub use registry::{GenerationalTable, Handle};
pub use runtime::async_io::{EventLoopCore, Poller, TcpTable, WakeSlot, N_SLOTS};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
