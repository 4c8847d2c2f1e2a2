//! Monotonic nanosecond clock
//!
//! Sources are tried in order: the OS monotonic clock, the realtime clock,
//! then the platform tick counter. With no source at all the clock reads 0.
//! Whatever the source, [`now_ns`] never goes backwards within a process.

use std::sync::atomic::{AtomicI64, Ordering};

static LAST: AtomicI64 = AtomicI64::new(0);

/// Nanoseconds since an arbitrary fixed point. Never decreases.
pub fn now_ns() -> i64 {
    let sample = raw_now_ns().unwrap_or(0);
    clamp_monotonic(&LAST, sample)
}

fn clamp_monotonic(last: &AtomicI64, sample: i64) -> i64 {
    let prev = last.fetch_max(sample, Ordering::SeqCst);
    prev.max(sample)
}

#[cfg(unix)]
fn raw_now_ns() -> Option<i64> {
    clock_gettime_ns(libc::CLOCK_MONOTONIC).or_else(|| clock_gettime_ns(libc::CLOCK_REALTIME))
}

#[cfg(unix)]
fn clock_gettime_ns(clock: libc::clockid_t) -> Option<i64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(clock, &mut ts) } != 0 {
        return None;
    }
    Some((ts.tv_sec as i64).saturating_mul(1_000_000_000) + ts.tv_nsec as i64)
}

#[cfg(windows)]
fn raw_now_ns() -> Option<i64> {
    use winapi::um::profileapi::{QueryPerformanceCounter, QueryPerformanceFrequency};
    use winapi::um::sysinfoapi::GetTickCount64;

    unsafe {
        let mut freq = std::mem::zeroed();
        let mut count = std::mem::zeroed();
        if QueryPerformanceFrequency(&mut freq) != 0 && QueryPerformanceCounter(&mut count) != 0 {
            let freq = *freq.QuadPart() as i128;
            let count = *count.QuadPart() as i128;
            if freq > 0 {
                return Some((count * 1_000_000_000 / freq) as i64);
            }
        }
        Some((GetTickCount64() as i64).saturating_mul(1_000_000))
    }
}

#[cfg(not(any(unix, windows)))]
fn raw_now_ns() -> Option<i64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_decreases() {
        let mut prev = now_ns();
        for _ in 0..1000 {
            let next = now_ns();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn test_advances_across_sleep() {
        let a = now_ns();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_ns();
        assert!(b - a >= 4_000_000, "elapsed {}ns", b - a);
    }

    #[test]
    fn test_clamp_ignores_backwards_sample() {
        let last = AtomicI64::new(0);
        assert_eq!(clamp_monotonic(&last, 100), 100);
        assert_eq!(clamp_monotonic(&last, 40), 100);
        assert_eq!(clamp_monotonic(&last, 150), 150);
    }

    #[test]
    fn test_missing_source_reads_zero() {
        let last = AtomicI64::new(0);
        assert_eq!(clamp_monotonic(&last, 0), 0);
    }
}
