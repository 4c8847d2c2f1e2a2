//! Platform-specific pollers
//!
//! One blocking multiplexer per build, all with the same two operations:
//! - [`Poller::wake`] makes the current or next [`Poller::wait`] return promptly
//! - [`Poller::wait`] blocks until woken or until the timeout elapses
//!
//! Backends:
//! - Linux: epoll watching an eventfd
//! - macOS/BSD: kqueue with an `EVFILT_USER` event
//! - Windows: an I/O completion port
//! - anything else: busy-poll fallback (see [`fallback`])
//!
//! Waits carry no payload. Callers inspect the wake slots afterwards.

use crate::config::EventLoopConfig;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

static CREATED: AtomicUsize = AtomicUsize::new(0);

/// OS blocking multiplexer used by the event loop
pub struct Poller {
    #[cfg(target_os = "linux")]
    inner: linux::EpollPoller,

    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    ))]
    inner: kqueue::KqueuePoller,

    #[cfg(target_os = "windows")]
    inner: windows::IocpPoller,

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "windows"
    )))]
    inner: fallback::BusyPoller,
}

impl Poller {
    /// Create the poller for this platform
    #[cfg_attr(
        any(
            target_os = "linux",
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "windows"
        ),
        allow(unused_variables)
    )]
    pub fn new(config: &EventLoopConfig) -> io::Result<Self> {
        let poller = Self {
            #[cfg(target_os = "linux")]
            inner: linux::EpollPoller::new()?,

            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "dragonfly"
            ))]
            inner: kqueue::KqueuePoller::new()?,

            #[cfg(target_os = "windows")]
            inner: windows::IocpPoller::new()?,

            #[cfg(not(any(
                target_os = "linux",
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "dragonfly",
                target_os = "windows"
            )))]
            inner: fallback::BusyPoller::new(config.fallback_poll_ms),
        };
        CREATED.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(backend = Self::backend(), "poller created");
        Ok(poller)
    }

    /// Wake the current or next waiter. Safe from any thread.
    pub fn wake(&self) -> io::Result<()> {
        self.inner.wake()
    }

    /// Block until woken or `timeout_ms` elapses. Negative timeouts poll.
    pub fn wait(&self, timeout_ms: i32) -> io::Result<()> {
        self.inner.wait(timeout_ms.max(0))
    }

    /// Name of the backend compiled into this build
    pub fn backend() -> &'static str {
        #[cfg(target_os = "linux")]
        return "epoll";

        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "dragonfly"
        ))]
        return "kqueue";

        #[cfg(target_os = "windows")]
        return "iocp";

        #[cfg(not(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "windows"
        )))]
        return "fallback";
    }

    /// Number of pollers constructed in this process
    pub fn created() -> usize {
        CREATED.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Linux: epoll + eventfd
// =============================================================================

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use std::os::unix::io::RawFd;

    pub struct EpollPoller {
        epoll_fd: RawFd,
        event_fd: RawFd,
    }

    impl EpollPoller {
        pub fn new() -> io::Result<Self> {
            let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if epoll_fd < 0 {
                return Err(io::Error::last_os_error());
            }

            let event_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
            if event_fd < 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(epoll_fd) };
                return Err(err);
            }

            // Level-triggered: an undrained counter keeps the next wait from blocking.
            let mut event = libc::epoll_event {
                events: libc::EPOLLIN as u32,
                u64: 0,
            };
            let result =
                unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, event_fd, &mut event) };
            if result < 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(event_fd);
                    libc::close(epoll_fd);
                }
                return Err(err);
            }

            Ok(Self { epoll_fd, event_fd })
        }

        pub fn wake(&self) -> io::Result<()> {
            let one: u64 = 1;
            let n = unsafe {
                libc::write(
                    self.event_fd,
                    &one as *const u64 as *const libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                // Counter saturated: a wake is already pending.
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(());
                }
                return Err(err);
            }
            Ok(())
        }

        pub fn wait(&self, timeout_ms: i32) -> io::Result<()> {
            let mut event: libc::epoll_event = unsafe { std::mem::zeroed() };
            let count = unsafe { libc::epoll_wait(self.epoll_fd, &mut event, 1, timeout_ms) };

            if count < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(());
                }
                return Err(err);
            }

            if count > 0 {
                self.drain();
            }
            Ok(())
        }

        fn drain(&self) {
            let mut counter: u64 = 0;
            // EAGAIN here means another waiter already drained it.
            unsafe {
                libc::read(
                    self.event_fd,
                    &mut counter as *mut u64 as *mut libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
        }
    }

    impl Drop for EpollPoller {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.event_fd);
                libc::close(self.epoll_fd);
            }
        }
    }
}

// =============================================================================
// macOS/BSD: kqueue + EVFILT_USER
// =============================================================================

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
mod kqueue {
    use super::*;
    use std::os::unix::io::RawFd;

    const WAKE_IDENT: usize = 1;

    pub struct KqueuePoller {
        kqueue_fd: RawFd,
    }

    fn user_event(flags: u16, fflags: u32) -> libc::kevent {
        let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
        ev.ident = WAKE_IDENT as _;
        ev.filter = libc::EVFILT_USER;
        ev.flags = flags;
        ev.fflags = fflags;
        ev
    }

    impl KqueuePoller {
        pub fn new() -> io::Result<Self> {
            let kqueue_fd = unsafe { libc::kqueue() };
            if kqueue_fd < 0 {
                return Err(io::Error::last_os_error());
            }
            unsafe { libc::fcntl(kqueue_fd, libc::F_SETFD, libc::FD_CLOEXEC) };

            let poller = Self { kqueue_fd };
            poller.submit(&user_event(libc::EV_ADD | libc::EV_CLEAR, 0))?;
            Ok(poller)
        }

        pub fn wake(&self) -> io::Result<()> {
            self.submit(&user_event(0, libc::NOTE_TRIGGER))
        }

        pub fn wait(&self, timeout_ms: i32) -> io::Result<()> {
            let timeout = libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) as libc::c_long) * 1_000_000,
            };
            let mut out: libc::kevent = unsafe { std::mem::zeroed() };

            let count = unsafe {
                libc::kevent(
                    self.kqueue_fd,
                    std::ptr::null(),
                    0,
                    &mut out,
                    1,
                    &timeout,
                )
            };

            if count < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(());
                }
                return Err(err);
            }
            Ok(())
        }

        fn submit(&self, change: &libc::kevent) -> io::Result<()> {
            let result = unsafe {
                libc::kevent(
                    self.kqueue_fd,
                    change,
                    1,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null(),
                )
            };
            if result < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }

    impl Drop for KqueuePoller {
        fn drop(&mut self) {
            unsafe { libc::close(self.kqueue_fd) };
        }
    }
}

// =============================================================================
// Windows: I/O completion port
// =============================================================================

#[cfg(target_os = "windows")]
mod windows {
    use super::*;
    use winapi::shared::minwindef::DWORD;
    use winapi::shared::winerror::WAIT_TIMEOUT;
    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::ioapiset::{
        CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus,
    };
    use winapi::um::minwinbase::OVERLAPPED;
    use winapi::um::winnt::HANDLE;

    const WAKE_KEY: usize = 1;

    pub struct IocpPoller {
        port: HANDLE,
    }

    // A completion port handle may be used from any thread.
    unsafe impl Send for IocpPoller {}
    unsafe impl Sync for IocpPoller {}

    impl IocpPoller {
        pub fn new() -> io::Result<Self> {
            let port =
                unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, std::ptr::null_mut(), 0, 1) };
            if port.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { port })
        }

        pub fn wake(&self) -> io::Result<()> {
            let ok =
                unsafe { PostQueuedCompletionStatus(self.port, 0, WAKE_KEY, std::ptr::null_mut()) };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn wait(&self, timeout_ms: i32) -> io::Result<()> {
            let mut bytes: DWORD = 0;
            let mut key: usize = 0;
            let mut overlapped: *mut OVERLAPPED = std::ptr::null_mut();

            let ok = unsafe {
                GetQueuedCompletionStatus(
                    self.port,
                    &mut bytes,
                    &mut key,
                    &mut overlapped,
                    timeout_ms as DWORD,
                )
            };
            if ok == 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(WAIT_TIMEOUT as i32) {
                    return Ok(());
                }
                return Err(err);
            }
            Ok(())
        }
    }

    impl Drop for IocpPoller {
        fn drop(&mut self) {
            unsafe { CloseHandle(self.port) };
        }
    }
}

// =============================================================================
// Fallback: busy-poll
// =============================================================================

/// Degraded backend for targets without a native multiplexer.
///
/// This is busy-polling, not wake-driven blocking: `wake` sets a pending flag
/// and `wait` spins with backoff until the flag is seen or
/// min(timeout, `fallback_poll_ms`) has elapsed.
#[cfg_attr(
    any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "windows"
    ),
    allow(dead_code)
)]
pub(crate) mod fallback {
    use super::*;
    use crossbeam::utils::Backoff;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    pub struct BusyPoller {
        pending: AtomicBool,
        max_sleep: Duration,
    }

    impl BusyPoller {
        pub fn new(fallback_poll_ms: u64) -> Self {
            Self {
                pending: AtomicBool::new(false),
                max_sleep: Duration::from_millis(fallback_poll_ms),
            }
        }

        pub fn wake(&self) -> io::Result<()> {
            self.pending.store(true, Ordering::SeqCst);
            Ok(())
        }

        pub fn wait(&self, timeout_ms: i32) -> io::Result<()> {
            let budget = Duration::from_millis(timeout_ms.max(0) as u64).min(self.max_sleep);
            let deadline = Instant::now() + budget;
            let backoff = Backoff::new();

            loop {
                if self.pending.swap(false, Ordering::SeqCst) || Instant::now() >= deadline {
                    return Ok(());
                }
                if backoff.is_completed() {
                    std::thread::yield_now();
                } else {
                    backoff.snooze();
                }
            }
        }
    }
}
