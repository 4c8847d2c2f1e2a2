//! Runtime module
//!
//! # Async I/O
//!
//! The async_io module holds the event loop core and the TCP socket table,
//! with platform-specific pollers:
//! - Linux: epoll
//! - macOS/BSD: kqueue
//! - Windows: IOCP

pub mod async_io;

pub use async_io::{EventLoopCore, Poller, TcpTable, WakeSlot, N_SLOTS};
