//! CLI Integration Tests
//!
//! Runs the `vox-rt` binary end to end. Every command that touches the event
//! loop exits with live tracked allocations (the slot cells) still held.

use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};

fn vox_rt(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vox-rt"))
        .current_dir(dir)
        .env_remove("VOX_RT_FALLBACK_POLL_MS")
        .env_remove("VOX_RT_STRICT_NET")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to run vox-rt")
}

#[test]
fn test_info_reports_backend_and_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("custom.toml"),
        "[event_loop]\nfallback_poll_ms = 3\n",
    )
    .unwrap();

    let out = vox_rt(dir.path(), &["info", "--config", "custom.toml"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Poller backend:"));
    assert!(stdout.contains("Wake slots:     256"));
    assert!(stdout.contains("fallback_poll_ms = 3"));
}

#[test]
fn test_exit_with_live_slot_cells_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let out = vox_rt(dir.path(), &["info"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(out.stderr.is_empty(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn test_info_finds_config_in_parent() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("vox-rt.toml"), "[net]\nlisten_backlog = 7\n").unwrap();
    let nested = dir.path().join("sub");
    std::fs::create_dir(&nested).unwrap();

    let out = vox_rt(&nested, &["info"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("listen_backlog = 7"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = vox_rt(dir.path(), &["info", "--config", "nope.toml"]);
    assert!(!out.status.success());
}

#[test]
fn test_probe_listening_port() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();

    let out = vox_rt(dir.path(), &["probe", "127.0.0.1", &port, "--timeout-ms", "2000"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Writable:      true"));
}

#[test]
fn test_probe_closed_port_fails() {
    let dir = tempfile::tempdir().unwrap();
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port().to_string()
    };

    let out = vox_rt(dir.path(), &["probe", "127.0.0.1", &port]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("tcp connect failed"));
}

#[test]
fn test_wake_latency_runs() {
    let dir = tempfile::tempdir().unwrap();
    let out = vox_rt(dir.path(), &["wake-latency", "--iterations", "50"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Iterations: 50"));
}
