//! Call-scoped readiness waits
//!
//! Each wait builds a throwaway multiplexer, registers the one descriptor,
//! blocks up to the timeout and tears the multiplexer down again. Nothing here
//! touches the event loop's poller or wake slots; see the `async_io` module
//! docs for why the two paths stay apart.
//!
//! - Linux: a fresh epoll instance
//! - macOS/BSD: a fresh kqueue
//! - other Unix: `poll(2)`
//! - Windows: `select` on a one-socket set
//!
//! Error and hang-up conditions count as ready: the caller's next read or
//! write reports them.

use std::io;

/// Raw OS socket descriptor
#[cfg(unix)]
pub type RawDescriptor = std::os::unix::io::RawFd;

/// Raw OS socket descriptor
#[cfg(windows)]
pub type RawDescriptor = std::os::windows::io::RawSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

/// Wait until `fd` is readable or `timeout_ms` elapses. Negative timeouts poll.
pub fn wait_readable_fd(fd: RawDescriptor, timeout_ms: i32) -> io::Result<bool> {
    wait(fd, Direction::Read, timeout_ms.max(0))
}

/// Wait until `fd` is writable or `timeout_ms` elapses. Negative timeouts poll.
pub fn wait_writable_fd(fd: RawDescriptor, timeout_ms: i32) -> io::Result<bool> {
    wait(fd, Direction::Write, timeout_ms.max(0))
}

#[cfg(target_os = "linux")]
fn wait(fd: RawDescriptor, direction: Direction, timeout_ms: i32) -> io::Result<bool> {
    use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

    let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let epoll = unsafe { OwnedFd::from_raw_fd(raw) };

    let interest = match direction {
        Direction::Read => libc::EPOLLIN,
        Direction::Write => libc::EPOLLOUT,
    };
    let mut event = libc::epoll_event {
        events: interest as u32,
        u64: fd as u64,
    };
    if unsafe { libc::epoll_ctl(epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut out: libc::epoll_event = unsafe { std::mem::zeroed() };
    let count = unsafe { libc::epoll_wait(epoll.as_raw_fd(), &mut out, 1, timeout_ms) };
    ready_count(count)
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
fn wait(fd: RawDescriptor, direction: Direction, timeout_ms: i32) -> io::Result<bool> {
    use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

    let raw = unsafe { libc::kqueue() };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let kq = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut change: libc::kevent = unsafe { std::mem::zeroed() };
    change.ident = fd as _;
    change.filter = match direction {
        Direction::Read => libc::EVFILT_READ,
        Direction::Write => libc::EVFILT_WRITE,
    };
    change.flags = libc::EV_ADD | libc::EV_ONESHOT;

    let timeout = libc::timespec {
        tv_sec: (timeout_ms / 1000) as libc::time_t,
        tv_nsec: ((timeout_ms % 1000) as libc::c_long) * 1_000_000,
    };
    let mut out: libc::kevent = unsafe { std::mem::zeroed() };
    let count = unsafe { libc::kevent(kq.as_raw_fd(), &change, 1, &mut out, 1, &timeout) };
    // Registration errors come back as an event rather than a failed call.
    if count > 0 && out.flags & libc::EV_ERROR != 0 && out.data != 0 {
        return Err(io::Error::from_raw_os_error(out.data as i32));
    }
    ready_count(count)
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "openbsd",
        target_os = "netbsd"
    ))
))]
fn wait(fd: RawDescriptor, direction: Direction, timeout_ms: i32) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: match direction {
            Direction::Read => libc::POLLIN,
            Direction::Write => libc::POLLOUT,
        },
        revents: 0,
    };
    let count = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    ready_count(count)
}

#[cfg(unix)]
fn ready_count(count: libc::c_int) -> io::Result<bool> {
    if count < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(count > 0)
}

#[cfg(windows)]
fn wait(fd: RawDescriptor, direction: Direction, timeout_ms: i32) -> io::Result<bool> {
    use winapi::um::winsock2::{fd_set, select, timeval, WSAGetLastError, SOCKET, SOCKET_ERROR};

    let mut set: fd_set = unsafe { std::mem::zeroed() };
    set.fd_count = 1;
    set.fd_array[0] = fd as SOCKET;

    let timeout = timeval {
        tv_sec: timeout_ms / 1000,
        tv_usec: (timeout_ms % 1000) * 1000,
    };
    let (read_set, write_set) = match direction {
        Direction::Read => (&mut set as *mut fd_set, std::ptr::null_mut()),
        Direction::Write => (std::ptr::null_mut(), &mut set as *mut fd_set),
    };

    let count = unsafe { select(0, read_set, write_set, std::ptr::null_mut(), &timeout) };
    if count == SOCKET_ERROR {
        return Err(io::Error::from_raw_os_error(unsafe { WSAGetLastError() }));
    }
    Ok(count > 0)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    #[test]
    fn test_readable_after_peer_writes() {
        let (mut a, b) = UnixStream::pair().unwrap();
        assert!(!wait_readable_fd(b.as_raw_fd(), 20).unwrap());

        a.write_all(b"x").unwrap();
        assert!(wait_readable_fd(b.as_raw_fd(), 1000).unwrap());
    }

    #[test]
    fn test_fresh_stream_is_writable() {
        let (_a, b) = UnixStream::pair().unwrap();
        assert!(wait_writable_fd(b.as_raw_fd(), 1000).unwrap());
    }

    #[test]
    fn test_timeout_is_honoured() {
        let (_a, b) = UnixStream::pair().unwrap();
        let start = Instant::now();
        assert!(!wait_readable_fd(b.as_raw_fd(), 50).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_negative_timeout_polls() {
        let (_a, b) = UnixStream::pair().unwrap();
        let start = Instant::now();
        assert!(!wait_readable_fd(b.as_raw_fd(), -5).unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_peer_close_counts_as_readable() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        assert!(wait_readable_fd(b.as_raw_fd(), 1000).unwrap());
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
    #[test]
    fn test_bad_descriptor_errors() {
        assert!(wait_readable_fd(-1, 0).is_err());
    }
}
