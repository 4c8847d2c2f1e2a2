//! C ABI exports
//!
//! The entry points compiled programs link against. Handles cross the
//! boundary as `intptr_t`.
//!
//! Error policy:
//! - fatal errors (out of memory, invalid handle, index out of range,
//!   unsupported value) go to [`host_panic`]: message plus newline on stderr,
//!   exit status 1
//! - environmental TCP failures return `-1` or `false` so generated code can
//!   retry, unless `net.strict_errors` is set, in which case they panic too

use crate::cells;
use crate::clock;
use crate::config;
use crate::error::{RuntimeError, RuntimeResult};
use crate::heap;
use crate::host::{self, host_panic};
use crate::registry::Handle;
use crate::runtime::async_io::socket;
use crate::runtime::async_io::EventLoopCore;
use std::ffi::CStr;
use std::os::raw::c_char;

fn ok_or_panic<T>(result: RuntimeResult<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => host_panic(&e.to_string()),
    }
}

fn net_or<T>(result: RuntimeResult<T>, sentinel: T) -> T {
    match result {
        Ok(v) => v,
        Err(e) if e.is_fatal() || config::current().net.strict_errors => {
            host_panic(&e.to_string())
        }
        Err(e) => {
            tracing::debug!(error = %e, "tcp operation failed");
            sentinel
        }
    }
}

fn c_str<'a>(ptr: *const c_char, what: &str) -> RuntimeResult<&'a str> {
    if ptr.is_null() {
        return Err(RuntimeError::Unsupported(format!("null {}", what)));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| RuntimeError::Unsupported(format!("{} is not valid UTF-8", what)))
}

fn port_arg(port: i64) -> RuntimeResult<u16> {
    u16::try_from(port).map_err(|_| RuntimeError::Unsupported(format!("tcp port out of range: {}", port)))
}

fn len_arg(len: i64) -> RuntimeResult<usize> {
    if (0..=i32::MAX as i64).contains(&len) {
        Ok(len as usize)
    } else {
        Err(RuntimeError::Unsupported(format!("buffer length out of range: {}", len)))
    }
}

// ========== Process ==========

/// Run start-up hooks (stack limit) with the process-wide config
#[no_mangle]
pub extern "C" fn vox_rt_startup() {
    host::startup(config::current());
}

// ========== Tracked heap ==========

/// Allocate `n` bytes (0 is treated as 1)
#[no_mangle]
pub extern "C" fn vox_rt_alloc(n: usize) -> *mut u8 {
    ok_or_panic(heap::global().alloc(n)).as_ptr()
}

/// Resize a pointer; untracked pointers are adopted
#[no_mangle]
pub extern "C" fn vox_rt_realloc(ptr: *mut u8, n: usize) -> *mut u8 {
    ok_or_panic(unsafe { heap::global().realloc(ptr, n) }).as_ptr()
}

/// Free a tracked pointer; anything else is ignored
#[no_mangle]
pub extern "C" fn vox_rt_free(ptr: *mut u8) {
    unsafe { heap::global().free(ptr) }
}

// ========== Atomic cells ==========

macro_rules! atomic_exports {
    ($ty:ty, $new:ident, $load:ident, $store:ident, $fetch_add:ident, $swap:ident, $cas:ident, $drop:ident) => {
        #[no_mangle]
        pub extern "C" fn $new(value: $ty) -> isize {
            ok_or_panic(cells::global().new_cell(value)).into_raw()
        }

        #[no_mangle]
        pub extern "C" fn $load(handle: isize) -> $ty {
            ok_or_panic(cells::global().load::<$ty>(Handle::from_raw(handle)))
        }

        #[no_mangle]
        pub extern "C" fn $store(handle: isize, value: $ty) {
            ok_or_panic(cells::global().store(Handle::from_raw(handle), value))
        }

        #[no_mangle]
        pub extern "C" fn $fetch_add(handle: isize, delta: $ty) -> $ty {
            ok_or_panic(cells::global().fetch_add(Handle::from_raw(handle), delta))
        }

        #[no_mangle]
        pub extern "C" fn $swap(handle: isize, value: $ty) -> $ty {
            ok_or_panic(cells::global().swap(Handle::from_raw(handle), value))
        }

        #[no_mangle]
        pub extern "C" fn $cas(handle: isize, expected: $ty, desired: $ty) -> bool {
            ok_or_panic(cells::global().cas(Handle::from_raw(handle), expected, desired))
        }

        #[no_mangle]
        pub extern "C" fn $drop(handle: isize) {
            cells::global().drop_cell(Handle::from_raw(handle))
        }
    };
}

atomic_exports!(
    i32,
    vox_rt_atomic_i32_new,
    vox_rt_atomic_i32_load,
    vox_rt_atomic_i32_store,
    vox_rt_atomic_i32_fetch_add,
    vox_rt_atomic_i32_swap,
    vox_rt_atomic_i32_cas,
    vox_rt_atomic_i32_drop
);

atomic_exports!(
    i64,
    vox_rt_atomic_i64_new,
    vox_rt_atomic_i64_load,
    vox_rt_atomic_i64_store,
    vox_rt_atomic_i64_fetch_add,
    vox_rt_atomic_i64_swap,
    vox_rt_atomic_i64_cas,
    vox_rt_atomic_i64_drop
);

// ========== Event loop ==========

fn event_loop() -> &'static EventLoopCore {
    ok_or_panic(EventLoopCore::init())
}

/// Initialise the event loop (idempotent)
#[no_mangle]
pub extern "C" fn vox_rt_eventloop_init() {
    event_loop();
}

#[no_mangle]
pub extern "C" fn vox_rt_eventloop_n_slots() -> i64 {
    event_loop().n_slots() as i64
}

#[no_mangle]
pub extern "C" fn vox_rt_eventloop_token_handle(index: i64) -> isize {
    ok_or_panic(event_loop().token_handle(index)).into_raw()
}

#[no_mangle]
pub extern "C" fn vox_rt_eventloop_pending_handle(index: i64) -> isize {
    ok_or_panic(event_loop().pending_handle(index)).into_raw()
}

#[no_mangle]
pub extern "C" fn vox_rt_eventloop_wake() {
    ok_or_panic(event_loop().wake())
}

#[no_mangle]
pub extern "C" fn vox_rt_eventloop_wait(timeout_ms: i32) {
    ok_or_panic(event_loop().wait(timeout_ms))
}

// ========== Clock ==========

/// Monotonic nanoseconds; 0 when the platform has no clock
#[no_mangle]
pub extern "C" fn vox_rt_clock_now_ns() -> i64 {
    clock::now_ns()
}

// ========== TCP ==========

/// Connect to `host:port`. Returns a socket handle, or -1.
#[no_mangle]
pub extern "C" fn vox_rt_tcp_connect(host: *const c_char, port: i64) -> isize {
    let host = ok_or_panic(c_str(host, "tcp host"));
    let port = ok_or_panic(port_arg(port));
    net_or(socket::global().connect(host, port).map(Handle::into_raw), -1)
}

/// Listen on `host:port`. Returns a listener handle, or -1.
#[no_mangle]
pub extern "C" fn vox_rt_tcp_listen(host: *const c_char, port: i64) -> isize {
    let host = ok_or_panic(c_str(host, "tcp host"));
    let port = ok_or_panic(port_arg(port));
    net_or(socket::global().listen(host, port).map(Handle::into_raw), -1)
}

/// Accept on a listener. Returns a socket handle, or -1.
#[no_mangle]
pub extern "C" fn vox_rt_tcp_accept(listener: isize) -> isize {
    net_or(
        socket::global()
            .accept(Handle::from_raw(listener))
            .map(Handle::into_raw),
        -1,
    )
}

/// Read up to `max` bytes into `buf`. Returns the count (0 on peer close), or -1.
#[no_mangle]
pub extern "C" fn vox_rt_tcp_recv(handle: isize, buf: *mut u8, max: i64) -> i64 {
    let max = ok_or_panic(len_arg(max));
    if max == 0 {
        return 0;
    }
    if buf.is_null() {
        host_panic("unsupported: null recv buffer");
    }
    let buffer = unsafe { std::slice::from_raw_parts_mut(buf, max) };
    net_or(
        socket::global()
            .recv_into(Handle::from_raw(handle), buffer)
            .map(|n| n as i64),
        -1,
    )
}

/// Send up to `len` bytes from `buf`. Returns the count sent, or -1.
#[no_mangle]
pub extern "C" fn vox_rt_tcp_send(handle: isize, buf: *const u8, len: i64) -> i64 {
    let len = ok_or_panic(len_arg(len));
    if len == 0 {
        return 0;
    }
    if buf.is_null() {
        host_panic("unsupported: null send buffer");
    }
    let buffer = unsafe { std::slice::from_raw_parts(buf, len) };
    net_or(
        socket::global()
            .send(Handle::from_raw(handle), buffer)
            .map(|n| n as i64),
        -1,
    )
}

/// Close a socket; no-op on an invalid handle
#[no_mangle]
pub extern "C" fn vox_rt_tcp_close(handle: isize) {
    socket::global().close(Handle::from_raw(handle))
}

#[no_mangle]
pub extern "C" fn vox_rt_tcp_wait_read(handle: isize, timeout_ms: i32) -> bool {
    net_or(
        socket::global().wait_readable(Handle::from_raw(handle), timeout_ms),
        false,
    )
}

#[no_mangle]
pub extern "C" fn vox_rt_tcp_wait_write(handle: isize, timeout_ms: i32) -> bool {
    net_or(
        socket::global().wait_writable(Handle::from_raw(handle), timeout_ms),
        false,
    )
}

/// Returns 0, or -1 on failure
#[no_mangle]
pub extern "C" fn vox_rt_tcp_set_nonblocking(handle: isize, nonblocking: bool) -> i32 {
    net_or(
        socket::global()
            .set_nonblocking(Handle::from_raw(handle), nonblocking)
            .map(|()| 0),
        -1,
    )
}

/// Local port of a socket, or -1
#[no_mangle]
pub extern "C" fn vox_rt_tcp_local_port(handle: isize) -> i32 {
    net_or(
        socket::global()
            .local_port(Handle::from_raw(handle))
            .map(i32::from),
        -1,
    )
}
