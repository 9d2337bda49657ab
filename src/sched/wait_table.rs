//! Wait-source table: fd -> waiting fibers.
//!
//! Each registered fd carries the aggregate event mask currently armed
//! at the backend (`None` once a delivery has drained it) and the
//! ordered records of waiters. The table is pure bookkeeping; the
//! owning scheduler performs the backend calls an [`ArmAction`] asks
//! for, keeping this module independently testable.
//!
//! Readiness is a single broadcast per arming: oneshot delivery clears
//! the armed state, matching waiters are resumed with the reported
//! events, and a waiter that resumes without consuming its event is
//! responsible for re-registering.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use smallvec::SmallVec;

use crate::reactor::EventMask;
use crate::tracing_compat::warn;

/// Backend call the caller must perform after a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmAction {
    /// The fd is new; register it with the given mask, oneshot-armed.
    Add(EventMask),
    /// The fd is known to the backend; re-arm with the given mask.
    Rearm(EventMask),
    /// The armed aggregate already covers the request.
    None,
}

#[derive(Debug)]
struct SourceRecord<W> {
    mask: EventMask,
    waiter: W,
}

#[derive(Debug)]
struct WaitSource<W> {
    /// Aggregate mask armed at the backend; `None` when drained since
    /// the last delivery.
    armed: Option<EventMask>,
    records: Vec<SourceRecord<W>>,
}

/// Outcome of dispatching a readiness event.
#[derive(Debug)]
pub struct FdDispatch<W> {
    /// Waiters to resume, each with the reported events, in
    /// registration order.
    pub resumed: SmallVec<[(W, EventMask); 4]>,
    /// True when the entry was removed and the fd must be removed
    /// from the backend (non-error delivery).
    pub remove_backend: bool,
}

/// Table of fd wait sources with the active-fd count.
#[derive(Debug)]
pub struct WaitTable<W> {
    sources: HashMap<RawFd, WaitSource<W>>,
    active_fds: usize,
}

impl<W> WaitTable<W> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            active_fds: 0,
        }
    }

    /// Number of fds whose aggregate mask is currently armed.
    #[must_use]
    pub fn active_fds(&self) -> usize {
        self.active_fds
    }

    /// Number of fds present in the table (armed or drained).
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no fds are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Returns the armed aggregate for `fd`: `None` if unknown,
    /// `Some(None)` if present but drained.
    #[must_use]
    pub fn armed_mask(&self, fd: RawFd) -> Option<Option<EventMask>> {
        self.sources.get(&fd).map(|s| s.armed)
    }

    /// Records `waiter` waiting for `mask` on `fd` and returns the
    /// backend call to perform.
    pub fn register(&mut self, fd: RawFd, mask: EventMask, waiter: W) -> ArmAction {
        let record = SourceRecord { mask, waiter };
        match self.sources.entry(fd) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(WaitSource {
                    armed: Some(mask),
                    records: vec![record],
                });
                self.active_fds += 1;
                ArmAction::Add(mask)
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let source = slot.get_mut();
                source.records.push(record);
                match source.armed {
                    // Drained since the last delivery: the fd is still
                    // known to the backend, disarmed. Re-arm it.
                    None => {
                        source.armed = Some(mask);
                        self.active_fds += 1;
                        ArmAction::Rearm(mask)
                    }
                    Some(aggregate) if !aggregate.contains(mask) => {
                        let union = aggregate | mask;
                        source.armed = Some(union);
                        ArmAction::Rearm(union)
                    }
                    Some(_) => ArmAction::None,
                }
            }
        }
    }

    /// Dispatches reported readiness for `fd`.
    ///
    /// Returns `None` for an fd absent from the table (tolerated close
    /// race; the caller logs and drops it). Otherwise resumes every
    /// record whose mask overlaps the report (error reports match all
    /// records) and either removes the entry (non-error) or leaves it
    /// drained and errored for re-registration.
    pub fn dispatch(&mut self, fd: RawFd, ready: EventMask) -> Option<FdDispatch<W>> {
        let source = self.sources.get_mut(&fd)?;
        if source.armed.take().is_some() {
            self.active_fds -= 1;
        }

        let mut resumed = SmallVec::new();
        let mut dropped = 0usize;
        for record in source.records.drain(..) {
            if ready.intersects(record.mask) || ready.is_error() {
                resumed.push((record.waiter, ready));
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(fd, ?ready, dropped, "wait records did not match delivery");
        }

        let remove_backend = !ready.is_error();
        if remove_backend {
            self.sources.remove(&fd);
        }
        Some(FdDispatch {
            resumed,
            remove_backend,
        })
    }
}

impl<W> Default for WaitTable<W> {
    fn default() -> Self {
        Self::new()
    }
}
