//! TCP socket table
//!
//! Compiled code holds sockets only as opaque handles. Operations look the
//! socket up, clone its reference out from under the table lock and run the
//! (possibly blocking) OS call without holding the lock, so a slow `recv` or
//! readiness wait never stalls other sockets. Closing a handle removes it from
//! the table and shuts the connection down at once, which sends FIN to the
//! peer and wakes any thread still blocked on it. The descriptor itself is
//! released when the last in-flight operation on it finishes.

use super::readiness::{self, RawDescriptor};
use crate::config::{self, NetConfig};
use crate::error::{HandleKind, RuntimeError, RuntimeResult};
use crate::registry::{GenerationalTable, Handle};
use once_cell::sync::Lazy;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Registry of open TCP sockets (streams and listeners)
pub struct TcpTable {
    sockets: GenerationalTable<Arc<Socket>>,
    net: NetConfig,
}

impl TcpTable {
    /// Create an empty table applying `net` to new streams
    pub fn new(net: NetConfig) -> Self {
        Self {
            sockets: GenerationalTable::new(),
            net,
        }
    }

    /// Settings applied to new streams
    pub fn net_config(&self) -> &NetConfig {
        &self.net
    }

    /// Resolve `host:port` and connect to the first candidate that accepts.
    ///
    /// Candidates are tried in resolver order.
    pub fn connect(&self, host: &str, port: u16) -> RuntimeResult<Handle> {
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| RuntimeError::exhausted("tcp connect resolve failed", e))?
            .collect();
        if candidates.is_empty() {
            return Err(RuntimeError::exhausted_bare("tcp connect resolve failed"));
        }

        let mut last_err = None;
        for addr in candidates {
            match self.connect_one(addr) {
                Ok(socket) => {
                    let handle = self.register(socket)?;
                    tracing::debug!(%addr, handle = handle.into_raw(), "tcp connected");
                    return Ok(handle);
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "tcp connect candidate failed");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => RuntimeError::exhausted("tcp connect failed", e),
            None => RuntimeError::exhausted_bare("tcp connect failed"),
        })
    }

    fn connect_one(&self, addr: SocketAddr) -> io::Result<Socket> {
        let socket = new_stream_socket(&addr)?;
        let target = SockAddr::from(addr);
        match self.net.connect_timeout_ms {
            Some(ms) => socket.connect_timeout(&target, Duration::from_millis(ms))?,
            None => socket.connect(&target)?,
        }
        socket.set_nodelay(self.net.tcp_nodelay)?;
        Ok(socket)
    }

    /// Bind a listener on `host:port` (port 0 picks a free port).
    pub fn listen(&self, host: &str, port: u16) -> RuntimeResult<Handle> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| RuntimeError::exhausted("tcp listen failed", e))?
            .next()
            .ok_or_else(|| RuntimeError::exhausted_bare("tcp listen failed"))?;

        let socket = bind_listener(&addr, self.net.listen_backlog)
            .map_err(|e| RuntimeError::exhausted("tcp listen failed", e))?;
        let handle = self.register(socket)?;
        tracing::debug!(%addr, handle = handle.into_raw(), "tcp listening");
        Ok(handle)
    }

    /// Accept one connection on a listener, blocking unless it is non-blocking.
    pub fn accept(&self, listener: Handle) -> RuntimeResult<Handle> {
        let socket = self.get(listener)?;
        let (stream, peer) = socket
            .accept()
            .map_err(|e| RuntimeError::exhausted("tcp accept failed", e))?;
        stream
            .set_nodelay(self.net.tcp_nodelay)
            .map_err(|e| RuntimeError::exhausted("tcp accept failed", e))?;

        let handle = self.register(stream)?;
        tracing::debug!(peer = ?peer.as_socket(), handle = handle.into_raw(), "tcp accepted");
        Ok(handle)
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed the stream.
    pub fn recv_into(&self, handle: Handle, buf: &mut [u8]) -> RuntimeResult<usize> {
        let socket = self.get(handle)?;
        loop {
            match (&*socket).read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RuntimeError::exhausted("tcp recv failed", e)),
            }
        }
    }

    /// Read up to `max_bytes` bytes. An empty result means the peer closed the stream.
    pub fn recv(&self, handle: Handle, max_bytes: usize) -> RuntimeResult<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        let n = self.recv_into(handle, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Send as much of `data` as the socket takes in one call.
    pub fn send(&self, handle: Handle, data: &[u8]) -> RuntimeResult<usize> {
        let socket = self.get(handle)?;
        loop {
            match socket.send(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RuntimeError::exhausted("tcp send failed", e)),
            }
        }
    }

    /// Close a socket. Unknown or already-closed handles are ignored.
    pub fn close(&self, handle: Handle) {
        if let Some(socket) = self.sockets.remove(handle) {
            // Listeners and never-connected sockets report ENOTCONN here
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                tracing::trace!(handle = handle.into_raw(), error = %e, "tcp shutdown skipped");
            }
            tracing::debug!(handle = handle.into_raw(), "tcp closed");
        }
    }

    /// Switch a socket between blocking and non-blocking mode
    pub fn set_nonblocking(&self, handle: Handle, nonblocking: bool) -> RuntimeResult<()> {
        self.get(handle)?
            .set_nonblocking(nonblocking)
            .map_err(|e| RuntimeError::exhausted("tcp set nonblocking failed", e))
    }

    /// Local port the socket is bound to
    pub fn local_port(&self, handle: Handle) -> RuntimeResult<u16> {
        let socket = self.get(handle)?;
        let addr = socket
            .local_addr()
            .map_err(|e| RuntimeError::exhausted("tcp local address failed", e))?;
        addr.as_socket()
            .map(|a| a.port())
            .ok_or_else(|| RuntimeError::exhausted_bare("tcp local address failed"))
    }

    /// Wait until the socket is readable or `timeout_ms` elapses.
    pub fn wait_readable(&self, handle: Handle, timeout_ms: i32) -> RuntimeResult<bool> {
        let socket = self.get(handle)?;
        readiness::wait_readable_fd(raw_descriptor(&socket), timeout_ms)
            .map_err(|e| RuntimeError::exhausted("tcp wait failed", e))
    }

    /// Wait until the socket is writable or `timeout_ms` elapses.
    pub fn wait_writable(&self, handle: Handle, timeout_ms: i32) -> RuntimeResult<bool> {
        let socket = self.get(handle)?;
        readiness::wait_writable_fd(raw_descriptor(&socket), timeout_ms)
            .map_err(|e| RuntimeError::exhausted("tcp wait failed", e))
    }

    /// OS descriptor behind a handle, for callers doing their own polling
    pub fn descriptor(&self, handle: Handle) -> RuntimeResult<RawDescriptor> {
        self.get(handle).map(|s| raw_descriptor(&s))
    }

    /// Number of open sockets
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Check if no sockets are open
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    fn get(&self, handle: Handle) -> RuntimeResult<Arc<Socket>> {
        self.sockets
            .with(handle, Arc::clone)
            .ok_or(RuntimeError::InvalidHandle(HandleKind::Socket))
    }

    fn register(&self, socket: Socket) -> RuntimeResult<Handle> {
        self.sockets
            .insert(Arc::new(socket))
            .ok_or_else(|| RuntimeError::Unsupported("socket handle space exhausted".to_string()))
    }
}

fn new_stream_socket(addr: &SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    socket.set_nosigpipe(true)?;
    Ok(socket)
}

fn bind_listener(addr: &SocketAddr, backlog: i32) -> io::Result<Socket> {
    let socket = new_stream_socket(addr)?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(*addr))?;
    socket.listen(backlog)?;
    Ok(socket)
}

#[cfg(unix)]
fn raw_descriptor(socket: &Socket) -> RawDescriptor {
    use std::os::unix::io::AsRawFd;
    socket.as_raw_fd()
}

#[cfg(windows)]
fn raw_descriptor(socket: &Socket) -> RawDescriptor {
    use std::os::windows::io::AsRawSocket;
    socket.as_raw_socket()
}

static GLOBAL: Lazy<TcpTable> = Lazy::new(|| TcpTable::new(config::current().net.clone()));

/// The process-wide socket table used by the C ABI.
pub fn global() -> &'static TcpTable {
    &GLOBAL
}
