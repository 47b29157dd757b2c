//! Error kinds for the runtime substrate
//!
//! Initialization routines return a structured [`RuntimeError`] so the
//! caller decides whether to abort the process or surface the failure.
//! Operational routines (attach, detach, ensure, release, thread-state
//! creation) instead call [`fatal`], which logs and aborts the process —
//! the runtime cannot continue once these invariants break.

use std::fmt;

/// Structured failure returned by initialization-time operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Any allocation failure.
    #[error("out of memory")]
    NoMemory,

    /// A syscall or OS primitive failed (lock alloc, TLS create, clock read).
    #[error("os error: {0}")]
    Os(String),

    /// A pre-config value was invalid (e.g. malformed `HASHSEED`).
    #[error("invalid configuration: {0}")]
    User(String),

    /// An internal invariant was violated.
    #[error("assertion failed: {0}")]
    Assertion(String),
}

impl RuntimeError {
    pub fn os(msg: impl Into<String>) -> Self {
        RuntimeError::Os(msg.into())
    }

    pub fn user(msg: impl Into<String>) -> Self {
        RuntimeError::User(msg.into())
    }
}

/// A failure that cannot be represented as a recoverable return value.
///
/// Mirrors `Py_FatalError`: logs the broken invariant, then aborts the
/// process. In debug builds this path is always compiled in; invariant
/// checks that would feed it are still evaluated in release builds, but the
/// runtime considers this acceptable since `abort()` itself is the contract,
/// not the surrounding check.
pub fn fatal(context: &str, detail: impl fmt::Display) -> ! {
    tracing::error!(context, %detail, "fatal runtime error");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(RuntimeError::NoMemory.to_string(), "out of memory");
        assert_eq!(
            RuntimeError::os("mmap failed").to_string(),
            "os error: mmap failed"
        );
        assert_eq!(
            RuntimeError::user("HASHSEED must fit in u32").to_string(),
            "invalid configuration: HASHSEED must fit in u32"
        );
    }
}
