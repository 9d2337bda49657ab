//! Timer heap for deadline-ordered callbacks.
//!
//! A min-heap of `(deadline, callback)` pairs. Callbacks fire at most
//! once, in non-decreasing deadline order; equal deadlines fire in
//! insertion order via a sequence number. Callbacks must never block;
//! they either enqueue a fiber or do nothing.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::types::Time;

/// A timer callback. Runs on the scheduler's owning thread.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

struct TimerSlot {
    deadline: Time,
    seq: u64,
    callback: TimerCallback,
}

impl TimerSlot {
    /// Total order: deadline first, then arrival. The callback takes
    /// no part in comparisons.
    fn key(&self) -> (Time, u64) {
        (self.deadline, self.seq)
    }
}

impl PartialEq for TimerSlot {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TimerSlot {}

impl Ord for TimerSlot {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for TimerSlot {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for TimerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSlot")
            .field("deadline", &self.deadline)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// A min-heap of timer callbacks ordered by deadline.
///
/// `BinaryHeap` pops its maximum, so slots are stored under
/// [`Reverse`] and the slot ordering itself stays the natural
/// `(deadline, seq)` one.
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<TimerSlot>>,
    next_seq: u64,
}

impl TimerHeap {
    /// Creates a new empty timer heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if no timers are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a callback to fire at `deadline`. Duplicate deadlines are
    /// permitted.
    pub fn insert(&mut self, deadline: Time, callback: TimerCallback) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(TimerSlot {
            deadline,
            seq,
            callback,
        }));
    }

    /// Returns the earliest deadline, if any.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|Reverse(slot)| slot.deadline)
    }

    /// Removes every callback whose deadline is `<= now` and returns
    /// them in firing order. The callbacks are not invoked here; the
    /// caller runs them outside any scheduler locks.
    pub fn pop_expired(&mut self, now: Time) -> Vec<TimerCallback> {
        let mut due = Vec::new();
        while self
            .heap
            .peek()
            .is_some_and(|Reverse(slot)| slot.deadline <= now)
        {
            if let Some(Reverse(slot)) = self.heap.pop() {
                due.push(slot.callback);
            }
        }
        due
    }

    /// Drops all pending timers without firing them.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Callback that appends `label` to a shared trace when invoked.
    fn tracer(trace: &Arc<parking_lot::Mutex<Vec<&'static str>>>, label: &'static str) -> TimerCallback {
        let trace = Arc::clone(trace);
        Box::new(move || trace.lock().push(label))
    }

    #[test]
    fn no_deadline_while_idle() {
        init_test("timer_no_deadline_while_idle");
        let mut heap = TimerHeap::new();
        crate::assert_with_log!(
            heap.peek_deadline().is_none(),
            "idle heap reports no deadline",
            None::<Time>,
            heap.peek_deadline()
        );
        let due = heap.pop_expired(Time::from_millis(1_000));
        crate::assert_with_log!(due.is_empty(), "nothing due on an idle heap", 0, due.len());
        crate::test_complete!("timer_no_deadline_while_idle");
    }

    #[test]
    fn pop_expired_hands_back_callbacks_without_running_them() {
        init_test("timer_pop_does_not_invoke");
        let mut heap = TimerHeap::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            heap.insert(
                Time::from_millis(10),
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let due = heap.pop_expired(Time::from_millis(10));
        crate::assert_with_log!(due.len() == 3, "all three due", 3, due.len());
        crate::assert_with_log!(
            fired.load(Ordering::SeqCst) == 0,
            "popping must not invoke; the scheduler fires outside its locks",
            0,
            fired.load(Ordering::SeqCst)
        );

        for callback in due {
            callback();
        }
        crate::assert_with_log!(
            fired.load(Ordering::SeqCst) == 3,
            "explicit firing runs each callback once",
            3,
            fired.load(Ordering::SeqCst)
        );
        crate::test_complete!("timer_pop_does_not_invoke");
    }

    #[test]
    fn shuffled_deadlines_fire_earliest_first() {
        init_test("timer_shuffled_deadlines");
        let mut heap = TimerHeap::new();
        let trace = Arc::new(parking_lot::Mutex::new(Vec::new()));

        // Arrival order deliberately disagrees with deadline order.
        heap.insert(Time::from_millis(30), tracer(&trace, "late"));
        heap.insert(Time::from_millis(10), tracer(&trace, "early"));
        heap.insert(Time::from_millis(20), tracer(&trace, "middle"));

        crate::assert_with_log!(
            heap.peek_deadline() == Some(Time::from_millis(10)),
            "earliest insertion wins the peek",
            Some(Time::from_millis(10)),
            heap.peek_deadline()
        );

        for callback in heap.pop_expired(Time::from_millis(30)) {
            callback();
        }
        let order = trace.lock().clone();
        crate::assert_with_log!(
            order == vec!["early", "middle", "late"],
            "firing order follows deadlines, not arrival",
            vec!["early", "middle", "late"],
            order
        );
        crate::test_complete!("timer_shuffled_deadlines");
    }

    #[test]
    fn equal_deadlines_keep_arrival_order() {
        init_test("timer_equal_deadlines_arrival_order");
        let mut heap = TimerHeap::new();
        let trace = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let deadline = Time::from_millis(40);

        for label in ["first", "second", "third"] {
            heap.insert(deadline, tracer(&trace, label));
        }

        for callback in heap.pop_expired(deadline) {
            callback();
        }
        let order = trace.lock().clone();
        crate::assert_with_log!(
            order == vec!["first", "second", "third"],
            "a deadline tie breaks by arrival",
            vec!["first", "second", "third"],
            order
        );
        crate::test_complete!("timer_equal_deadlines_arrival_order");
    }

    #[test]
    fn pop_splits_due_from_future() {
        init_test("timer_pop_splits_due_from_future");
        let mut heap = TimerHeap::new();
        let trace = Arc::new(parking_lot::Mutex::new(Vec::new()));

        heap.insert(Time::from_millis(5), tracer(&trace, "past"));
        heap.insert(Time::from_millis(25), tracer(&trace, "boundary"));
        heap.insert(Time::from_millis(80), tracer(&trace, "future"));

        // A deadline equal to `now` is due: the poll timeout already
        // waited for it.
        for callback in heap.pop_expired(Time::from_millis(25)) {
            callback();
        }
        let order = trace.lock().clone();
        crate::assert_with_log!(
            order == vec!["past", "boundary"],
            "due set includes the exact boundary",
            vec!["past", "boundary"],
            order
        );
        crate::assert_with_log!(heap.len() == 1, "future timer retained", 1, heap.len());
        crate::assert_with_log!(
            heap.peek_deadline() == Some(Time::from_millis(80)),
            "retained timer drives the next timeout",
            Some(Time::from_millis(80)),
            heap.peek_deadline()
        );

        // A later turn picks it up.
        for callback in heap.pop_expired(Time::from_millis(80)) {
            callback();
        }
        crate::assert_with_log!(heap.is_empty(), "drained across turns", true, heap.is_empty());
        crate::test_complete!("timer_pop_splits_due_from_future");
    }

    /// Invariant: clear drops pending callbacks without firing them,
    /// matching the resource policy for a scheduler torn down with
    /// undelivered timers.
    #[test]
    fn clear_drops_without_firing() {
        init_test("timer_clear_drops_without_firing");
        let mut heap = TimerHeap::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in = Arc::clone(&fired);
        heap.insert(
            Time::from_millis(1),
            Box::new(move || {
                fired_in.fetch_add(1, Ordering::SeqCst);
            }),
        );

        heap.clear();
        crate::assert_with_log!(heap.is_empty(), "empty after clear", true, heap.is_empty());
        crate::assert_with_log!(
            fired.load(Ordering::SeqCst) == 0,
            "callback never fired",
            0,
            fired.load(Ordering::SeqCst)
        );
        crate::test_complete!("timer_clear_drops_without_firing");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Callbacks always fire in non-decreasing deadline order,
            /// whatever the insertion order.
            #[test]
            fn fires_in_non_decreasing_deadline_order(deadlines in proptest::collection::vec(0u64..1000, 1..64)) {
                let mut heap = TimerHeap::new();
                let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
                for &ms in &deadlines {
                    let seen = Arc::clone(&seen);
                    heap.insert(Time::from_millis(ms), Box::new(move || seen.lock().push(ms)));
                }

                for callback in heap.pop_expired(Time::from_millis(1000)) {
                    callback();
                }

                let fired = seen.lock().clone();
                prop_assert_eq!(fired.len(), deadlines.len());
                for pair in fired.windows(2) {
                    prop_assert!(pair[0] <= pair[1], "out of order: {:?}", fired);
                }
            }
        }
    }
}
