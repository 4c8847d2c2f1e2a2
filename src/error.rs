//! Runtime error taxonomy
//!
//! Every failure the runtime can report falls into one of five kinds. The
//! first four are invariant violations: they mean the compiler or its
//! generated code is broken, and the C ABI layer turns them into a host panic.
//! `ResourceExhausted` covers environmental failures (resolve, connect, recv)
//! that a caller above this layer may retry or fall back from.

use std::fmt;
use std::io;
use thiserror::Error;

/// Which registry a handle was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Atomic cell handle (`cells` module)
    Atomic,
    /// TCP socket handle (`socket` module)
    Socket,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Atomic => write!(f, "atomic"),
            HandleKind::Socket => write!(f, "socket"),
        }
    }
}

/// Errors produced by the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid or dropped {0} handle")]
    InvalidHandle(HandleKind),

    #[error("{what} index out of range: {index}")]
    IndexOutOfRange { what: &'static str, index: i64 },

    #[error("{context}")]
    ResourceExhausted {
        context: &'static str,
        #[source]
        source: Option<io::Error>,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    /// Environmental failure carrying the OS error that caused it.
    pub fn exhausted(context: &'static str, source: io::Error) -> Self {
        RuntimeError::ResourceExhausted {
            context,
            source: Some(source),
        }
    }

    /// Environmental failure with no underlying OS error.
    pub fn exhausted_bare(context: &'static str) -> Self {
        RuntimeError::ResourceExhausted {
            context,
            source: None,
        }
    }

    /// Invariant violations are fatal; only resource exhaustion is recoverable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RuntimeError::ResourceExhausted { .. })
    }
}
