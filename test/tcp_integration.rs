//! Integration Tests for TCP Sockets
//!
//! Tests the socket table and readiness waits over loopback:
//! - Connect to a listening port, fail on a closed one
//! - Readable/writable waits with and without activity
//! - Orderly peer close and idempotent close

use std::io::Write;
use std::net::TcpListener;
use std::time::{Duration, Instant};
use vox_rt::config::NetConfig;
use vox_rt::{HandleKind, RuntimeError, TcpTable};

fn table() -> TcpTable {
    TcpTable::new(NetConfig::default())
}

/// A loopback port with nothing listening on it
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// =============================================================================
// Connect Tests
// =============================================================================

#[test]
fn test_connect_to_listening_port() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let t = table();
    let h = t.connect("127.0.0.1", port).unwrap();
    assert!(t.wait_writable(h, 2000).unwrap());
    t.close(h);
}

#[test]
fn test_connect_to_closed_port_fails() {
    let port = closed_port();
    let err = table().connect("127.0.0.1", port).unwrap_err();

    assert!(matches!(err, RuntimeError::ResourceExhausted { .. }));
    assert_eq!(err.to_string(), "tcp connect failed");
    assert!(!err.is_fatal());
}

#[test]
fn test_connect_tries_each_candidate() {
    // "localhost" may resolve to ::1 first; the IPv4 candidate must still win.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let t = table();
    let h = t.connect("localhost", port).unwrap();
    let (_peer, _) = listener.accept().unwrap();
    t.close(h);
}

// =============================================================================
// Readiness Tests
// =============================================================================

#[test]
fn test_readable_only_after_peer_writes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let t = table();
    let h = t.connect("127.0.0.1", port).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    let start = Instant::now();
    assert!(!t.wait_readable(h, 50).unwrap());
    assert!(start.elapsed() >= Duration::from_millis(40));

    crossbeam::scope(|s| {
        s.spawn(|_| {
            std::thread::sleep(Duration::from_millis(20));
            peer.write_all(b"ready").unwrap();
        });
        assert!(t.wait_readable(h, 5000).unwrap());
    })
    .unwrap();

    assert_eq!(t.recv(h, 64).unwrap(), b"ready");
    t.close(h);
}

#[test]
fn test_wait_on_closed_handle_is_invalid() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let t = table();
    let h = t.connect("127.0.0.1", port).unwrap();
    t.close(h);

    assert!(matches!(
        t.wait_readable(h, 0),
        Err(RuntimeError::InvalidHandle(HandleKind::Socket))
    ));
}

#[cfg(unix)]
#[test]
fn test_raw_descriptor_waits() {
    use std::os::unix::io::AsRawFd;
    use vox_rt::runtime::async_io::{wait_readable_fd, wait_writable_fd};

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (mut server, _) = listener.accept().unwrap();

    assert!(wait_writable_fd(client.as_raw_fd(), 1000).unwrap());
    assert!(!wait_readable_fd(client.as_raw_fd(), 10).unwrap());
    server.write_all(b"x").unwrap();
    assert!(wait_readable_fd(client.as_raw_fd(), 1000).unwrap());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_recv_zero_on_peer_close() {
    let t = table();
    let listener = t.listen("127.0.0.1", 0).unwrap();
    let port = t.local_port(listener).unwrap();

    let client = t.connect("127.0.0.1", port).unwrap();
    let server = t.accept(listener).unwrap();

    t.send(server, b"bye").unwrap();
    t.close(server);

    let mut got = Vec::new();
    loop {
        let chunk = t.recv(client, 2).unwrap();
        if chunk.is_empty() {
            break;
        }
        got.extend_from_slice(&chunk);
    }
    assert_eq!(got, b"bye");

    t.close(client);
    t.close(listener);
}

#[test]
fn test_close_releases_blocked_reader_and_peer() {
    let t = table();
    let listener = t.listen("127.0.0.1", 0).unwrap();
    let port = t.local_port(listener).unwrap();
    let client = t.connect("127.0.0.1", port).unwrap();
    let server = t.accept(listener).unwrap();

    crossbeam::scope(|s| {
        let reader = s.spawn(|_| t.recv(client, 16));
        std::thread::sleep(Duration::from_millis(50));
        t.close(client);

        // Either the reader saw the shutdown or it lost the race to the lookup
        match reader.join().unwrap() {
            Ok(bytes) => assert!(bytes.is_empty()),
            Err(e) => assert!(matches!(e, RuntimeError::InvalidHandle(HandleKind::Socket))),
        }
    })
    .unwrap();

    assert!(t.wait_readable(server, 2000).unwrap());
    assert!(t.recv(server, 16).unwrap().is_empty());
    t.close(server);
    t.close(listener);
}

#[test]
fn test_close_is_idempotent() {
    let t = table();
    let listener = t.listen("127.0.0.1", 0).unwrap();
    assert_eq!(t.len(), 1);

    t.close(listener);
    t.close(listener);
    t.close(vox_rt::Handle::from_raw(0));
    assert!(t.is_empty());
}

#[test]
fn test_nodelay_off_still_connects() {
    let mut net = NetConfig::default();
    net.tcp_nodelay = false;
    net.listen_backlog = 4;
    let t = TcpTable::new(net);

    let listener = t.listen("127.0.0.1", 0).unwrap();
    let port = t.local_port(listener).unwrap();
    let client = t.connect("127.0.0.1", port).unwrap();
    let server = t.accept(listener).unwrap();

    assert_eq!(t.send(client, &[7u8; 100]).unwrap(), 100);
    let mut total = 0;
    while total < 100 {
        total += t.recv(server, 100).unwrap().len();
    }
    assert_eq!(total, 100);
}
