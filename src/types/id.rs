//! Identifier types.
//!
//! All identifiers are process-unique integers handed out from atomic
//! counters. They are cheap to copy and hash, and their `Display`
//! output is stable enough to appear in tracing fields.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Allocates the next process-unique identifier.
            #[must_use]
            pub fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            /// Returns the raw integer value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Constructs an identifier from a raw value, for tests.
            #[cfg(test)]
            #[must_use]
            pub const fn new_for_test(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

counter_id!(
    /// Identifier of a scheduler.
    SchedulerId,
    "sched-"
);

counter_id!(
    /// Identifier of a fiber.
    FiberId,
    "fiber-"
);

counter_id!(
    /// Identity of the prompt delimiting a scheduler's fibers.
    ///
    /// Each scheduler owns exactly one prompt. A fiber may only suspend
    /// while its owning scheduler's prompt is the one installed on the
    /// current thread; see the continuation-barrier check in
    /// [`crate::fiber::suspend`].
    PromptId,
    "prompt-"
);

/// Identity of a kernel thread, used for scheduler ownership.
///
/// `std::thread::ThreadId` cannot be stored in an atomic cell, so each
/// thread is assigned a process-unique non-zero integer on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(u64);

impl ThreadToken {
    /// Returns the token of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        thread_local! {
            static TOKEN: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
        }
        Self(TOKEN.with(|t| *t))
    }

    /// Returns the raw integer value. Never zero.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Reconstructs a token from a raw value previously obtained via
    /// [`ThreadToken::as_u64`]. Returns `None` for the unowned sentinel.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = FiberId::next();
        let b = FiberId::next();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn thread_token_stable_within_thread() {
        let a = ThreadToken::current();
        let b = ThreadToken::current();
        assert_eq!(a, b);
        assert_ne!(a.as_u64(), 0);
    }

    #[test]
    fn thread_token_differs_across_threads() {
        let here = ThreadToken::current();
        let there = std::thread::spawn(ThreadToken::current)
            .join()
            .expect("join");
        assert_ne!(here, there);
    }

    #[test]
    fn thread_token_round_trips() {
        let token = ThreadToken::current();
        assert_eq!(ThreadToken::from_u64(token.as_u64()), Some(token));
        assert_eq!(ThreadToken::from_u64(0), None);
    }

    #[test]
    fn display_formats() {
        let id = SchedulerId::new_for_test(7);
        assert_eq!(id.to_string(), "sched-7");
        let id = PromptId::new_for_test(3);
        assert_eq!(id.to_string(), "prompt-3");
    }
}
