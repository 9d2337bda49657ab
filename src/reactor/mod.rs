//! Readiness backend abstraction.
//!
//! This module defines the kernel-facing interface the scheduler polls
//! for fd readiness. Arming is *oneshot*: after one readiness
//! notification an fd is disarmed until re-armed via [`Reactor::modify`],
//! making the scheduler the sole re-arming authority.
//!
//! Two bindings ship: [`EpollReactor`] over native epoll with
//! `EPOLLONESHOT` (Linux), and [`PollReactor`] over `poll(2)` with
//! oneshot emulated by clearing the armed mask on delivery.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub mod mask;
pub mod poll;

#[cfg(target_os = "linux")]
pub mod epoll;

#[cfg(target_os = "linux")]
pub use epoll::EpollReactor;
pub use mask::EventMask;
pub use poll::PollReactor;

use crate::config::{BackendKind, SchedulerConfig};

/// A readiness event produced by a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// The fd that became ready.
    pub fd: RawFd,
    /// The events the kernel reported.
    pub ready: EventMask,
}

/// Buffer of readiness events returned by a reactor poll.
#[derive(Debug, Clone)]
pub struct Events {
    inner: Vec<Event>,
    capacity: usize,
}

impl Events {
    /// Creates an empty events buffer with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Clears all events in the buffer.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Returns the number of events stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the maximum number of events this buffer can hold.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempts to push a new event, returning false if capacity is
    /// exceeded.
    pub fn push(&mut self, event: Event) -> bool {
        if self.inner.len() >= self.capacity {
            return false;
        }
        self.inner.push(event);
        true
    }

    /// Returns an iterator over events.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

/// Readiness backend contract.
///
/// All arming is oneshot. `wake` may be called from any thread and
/// causes a concurrent or subsequent `poll` to return promptly; wake
/// traffic never appears in the returned events.
pub trait Reactor: Send + Sync {
    /// Registers an fd with the given interest, oneshot-armed.
    fn add(&self, fd: RawFd, mask: EventMask) -> io::Result<()>;

    /// Re-arms an already-registered fd with a new mask.
    fn modify(&self, fd: RawFd, mask: EventMask) -> io::Result<()>;

    /// Removes an fd from the backend.
    fn remove(&self, fd: RawFd) -> io::Result<()>;

    /// Polls for events, filling `events` up to its capacity.
    ///
    /// Blocks up to `timeout`; `None` waits indefinitely and
    /// `Some(Duration::ZERO)` returns immediately. The buffer is
    /// cleared before filling. Returns the number of events stored.
    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize>;

    /// Wakes a concurrent or subsequent `poll` from any thread.
    fn wake(&self) -> io::Result<()>;
}

/// Constructs the backend selected by the configuration.
pub fn reactor_for(config: &SchedulerConfig) -> io::Result<Box<dyn Reactor>> {
    match config.backend {
        #[cfg(target_os = "linux")]
        BackendKind::Epoll => Ok(Box::new(EpollReactor::new()?)),
        BackendKind::Poll => Ok(Box::new(PollReactor::new()?)),
    }
}

/// Converts a poll timeout to the millisecond convention used by the
/// kernel interfaces: `-1` waits indefinitely, `0` returns at once.
/// Sub-millisecond remainders round up so a deadline is never polled
/// past with a zero wait.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let millis = d.as_millis();
            let rounded = if Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX)) < d {
                millis + 1
            } else {
                millis
            };
            i32::try_from(rounded).unwrap_or(i32::MAX)
        }
    }
}
