//! Host process hooks
//!
//! The panic channel is the only way an invariant violation leaves this layer:
//! write the message and a newline to stderr, then exit with status 1.

use std::io::Write;

/// Report a fatal runtime error and terminate the process.
pub fn host_panic(msg: &str) -> ! {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = out.write_all(panic_line(msg).as_bytes());
    let _ = out.flush();
    std::process::exit(1);
}

fn panic_line(msg: &str) -> String {
    format!("{}\n", msg)
}

/// Raise the soft stack limit to `want` bytes, capped at the hard limit.
///
/// Never lowers an existing limit. Returns the soft limit in effect afterwards.
#[cfg(unix)]
pub fn raise_stack_limit(want: u64) -> std::io::Result<u64> {
    use nix::sys::resource::{getrlimit, setrlimit, Resource, RLIM_INFINITY};

    let (soft, hard) = getrlimit(Resource::RLIMIT_STACK)?;
    if soft == RLIM_INFINITY || soft >= want {
        return Ok(soft);
    }
    let target = if hard != RLIM_INFINITY { want.min(hard) } else { want };
    if target <= soft {
        return Ok(soft);
    }
    setrlimit(Resource::RLIMIT_STACK, target, hard)?;
    tracing::debug!(from = soft, to = target, "raised stack limit");
    Ok(target)
}

/// Stack size is fixed at link time on this platform.
#[cfg(not(unix))]
pub fn raise_stack_limit(_want: u64) -> std::io::Result<u64> {
    Ok(0)
}

/// Process start-up hook run once by the embedding program before `main`.
pub fn startup(config: &crate::config::RuntimeConfig) {
    if config.process.raise_stack_limit {
        if let Err(e) = raise_stack_limit(config.process.stack_limit_bytes) {
            tracing::warn!(error = %e, "could not raise stack limit");
        }
    }
}
