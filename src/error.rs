//! Error types and error handling strategy for Fibrous.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Programmer errors (ownership, barrier violations) are fatal to the
//!   calling operation
//! - Backend failures carry the originating `io::Error` as their source
//! - Tolerated races (readiness for an unknown fd) are logged and
//!   dropped, never surfaced as errors
//!
//! # Error policy
//!
//! | Kind | Policy |
//! |---|---|
//! | `OwnershipViolation` | returned by [`Scheduler::run`](crate::sched::Scheduler::run) |
//! | `InvalidResume` | returned by [`resume_fiber`](crate::fiber::resume_fiber) |
//! | `ContinuationBarrier` | panics; suspending past a foreign prompt is unrecoverable |
//! | `UnknownFd` | logged at `warn`, event dropped |
//! | `Backend` | terminates the scheduler loop with the original error |
//! | `Config` | invalid environment configuration |

use core::fmt;
use std::sync::Arc;

use crate::types::{FiberId, SchedulerId, ThreadToken};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A scheduler was asked to run on one thread while owned by another.
    OwnershipViolation,
    /// `resume_fiber` was called on a fiber that is not suspended.
    InvalidResume,
    /// Suspension was attempted without the owning scheduler's prompt
    /// installed on the current thread.
    ContinuationBarrier,
    /// Readiness was delivered for an fd absent from the wait-source
    /// table. Tolerated (close race); never fatal.
    UnknownFd,
    /// The readiness backend reported an unrecoverable failure.
    Backend,
    /// Configuration error (invalid env var or option value).
    Config,
    /// Internal invariant violation (bug).
    Internal,
}

impl ErrorKind {
    /// Returns true if this kind represents a programmer error that is
    /// fatal to the calling operation.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OwnershipViolation | Self::ContinuationBarrier | Self::Internal
        )
    }
}

/// The main error type for Fibrous operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates an ownership-violation error.
    #[must_use]
    pub fn ownership_violation(sched: SchedulerId, owner: ThreadToken, caller: ThreadToken) -> Self {
        Self::new(ErrorKind::OwnershipViolation).with_message(format!(
            "{sched} is owned by {owner}, cannot run on {caller}"
        ))
    }

    /// Creates an invalid-resume error.
    #[must_use]
    pub fn invalid_resume(fiber: FiberId, state: &'static str) -> Self {
        Self::new(ErrorKind::InvalidResume)
            .with_message(format!("{fiber} is {state}, not suspended"))
    }

    /// Creates a continuation-barrier error.
    #[must_use]
    pub fn continuation_barrier(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContinuationBarrier).with_message(detail)
    }

    /// Creates a backend error wrapping an `io::Error`.
    #[must_use]
    pub fn backend(source: std::io::Error) -> Self {
        Self::new(ErrorKind::Backend)
            .with_message("readiness backend failed")
            .with_source(source)
    }

    /// Creates an internal error (bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns true if this error represents a backend failure.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self.kind, ErrorKind::Backend)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::backend(e)
    }
}

/// A specialized Result type for Fibrous operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_message() {
        let err = Error::new(ErrorKind::InvalidResume).with_message("not suspended");
        assert_eq!(err.to_string(), "InvalidResume: not suspended");
    }

    #[test]
    fn backend_exposes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "epoll gone");
        let err = Error::backend(io);
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.is_backend());
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "epoll gone");
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn fatal_classification() {
        assert!(ErrorKind::OwnershipViolation.is_fatal());
        assert!(ErrorKind::ContinuationBarrier.is_fatal());
        assert!(ErrorKind::Internal.is_fatal());
        assert!(!ErrorKind::InvalidResume.is_fatal());
        assert!(!ErrorKind::UnknownFd.is_fatal());
        assert!(!ErrorKind::Backend.is_fatal());
    }

    #[test]
    fn convenience_constructors_mention_ids() {
        let fiber = FiberId::next();
        let err = Error::invalid_resume(fiber, "running");
        assert!(err.to_string().contains(&fiber.to_string()));
        assert!(err.to_string().contains("running"));
    }
}
