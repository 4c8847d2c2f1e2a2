//! Integration Tests for the Event Loop Core
//!
//! Tests:
//! - One-shot initialisation under a concurrent first call
//! - Slot table bounds
//! - Wake-ups are not lost and cross threads
//! - The publish-to-slot / wake / inspect pattern a scheduler uses
//!
//! The core is process-wide, so tests that wait on it are serialized.

use parking_lot::Mutex;
use std::sync::Barrier;
use std::time::{Duration, Instant};
use vox_rt::{cells, EventLoopCore, Poller, RuntimeError, N_SLOTS};

static SERIAL: Mutex<()> = parking_lot::const_mutex(());

#[test]
fn test_concurrent_init_has_one_winner() {
    const THREADS: usize = 16;
    let barrier = Barrier::new(THREADS);

    let cores: Vec<usize> = crossbeam::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let barrier = &barrier;
                s.spawn(move |_| {
                    barrier.wait();
                    EventLoopCore::init().unwrap() as *const EventLoopCore as usize
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    assert!(cores.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(Poller::created(), 1);
    assert_eq!(EventLoopCore::init().unwrap().n_slots(), N_SLOTS);
}

#[test]
fn test_slot_bounds() {
    let core = EventLoopCore::init().unwrap();
    assert_eq!(core.n_slots(), 256);

    let mut seen = std::collections::HashSet::new();
    for i in 0..256 {
        assert!(seen.insert(core.token_handle(i).unwrap()));
        assert!(seen.insert(core.pending_handle(i).unwrap()));
    }

    for bad in [256, -1, i64::MIN, i64::MAX] {
        assert!(matches!(
            core.token_handle(bad),
            Err(RuntimeError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            core.pending_handle(bad),
            Err(RuntimeError::IndexOutOfRange { .. })
        ));
    }
    assert_eq!(
        core.token_handle(256).unwrap_err().to_string(),
        "wake slot index out of range: 256"
    );
}

#[test]
fn test_wake_before_wait_is_not_lost() {
    let _guard = SERIAL.lock();
    let core = EventLoopCore::init().unwrap();

    core.wake().unwrap();
    let start = Instant::now();
    core.wait(5_000).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_wake_from_another_thread() {
    let _guard = SERIAL.lock();
    let core = EventLoopCore::init().unwrap();
    // Absorb anything left over so the wait below really blocks
    core.wait(0).unwrap();

    let start = Instant::now();
    crossbeam::scope(|s| {
        s.spawn(|_| {
            std::thread::sleep(Duration::from_millis(30));
            core.wake().unwrap();
        });
        core.wait(10_000).unwrap();
    })
    .unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_publish_wake_inspect() {
    let _guard = SERIAL.lock();
    let core = EventLoopCore::init().unwrap();
    let table = cells::global();
    let token = core.token_handle(42).unwrap();
    let pending = core.pending_handle(42).unwrap();
    table.store(token, 0i64).unwrap();
    table.store(pending, 0i32).unwrap();

    crossbeam::scope(|s| {
        s.spawn(|_| {
            table.store(token, 0xfeed_i64).unwrap();
            table.fetch_add(pending, 1i32).unwrap();
            core.wake().unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while table.load::<i32>(pending).unwrap() == 0 {
            assert!(Instant::now() < deadline, "slot never became pending");
            core.wait(100).unwrap();
        }
    })
    .unwrap();

    assert_eq!(table.load::<i64>(token).unwrap(), 0xfeed);
    assert_eq!(table.swap(pending, 0i32).unwrap(), 1);
}

#[test]
fn test_negative_timeout_is_a_poll() {
    let _guard = SERIAL.lock();
    let core = EventLoopCore::init().unwrap();
    let start = Instant::now();
    core.wait(-100).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}
