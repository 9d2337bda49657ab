//! Run queue of runnable fibers.
//!
//! A FIFO deque with two operations: `enqueue`, safe against concurrent
//! remote threads, and `drain`, which atomically swaps out the entire
//! contents as one batch. Draining whole batches is load-bearing for
//! fairness: fibers awoken during a turn land in the next batch, so a
//! chain of self-rewakes cannot starve I/O dispatch or timers.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// A FIFO queue with atomic batch drain.
#[derive(Debug)]
pub struct RunQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> RunQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an item. Callable from any thread.
    pub fn enqueue(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    /// Swaps out the current contents as a batch, leaving the queue
    /// empty. Items enqueued concurrently land in a later batch.
    #[must_use]
    pub fn drain(&self) -> VecDeque<T> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Returns true if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl<T> Default for RunQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
