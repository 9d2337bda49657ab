//! Fibers: suspended computations bound to one scheduler.
//!
//! A fiber is a continuation slot plus a reference to its owning
//! scheduler, fixed at creation. Rust has no first-class delimited
//! continuations, so the suspension point is an explicit yield: a fiber
//! body is a [`Continuation`] that either completes or returns a
//! [`FiberStep::Yield`] carrying the rest of the computation and an
//! `after_suspend` callback. The scheduler re-installs the continuation
//! into the slot before running `after_suspend`, which is expected to
//! register the fiber with a wake source.
//!
//! State machine:
//!
//! ```text
//! Queued --run--> Running --Complete--> Done
//!    ^               |
//!    |            Yield: slot refilled, after_suspend runs
//!    |               v
//!    +--resume-- Suspended
//! ```
//!
//! Invariant: a fiber is present in at most one run queue (only the
//! `Suspended -> Queued` transition enqueues), and the continuation
//! slot is non-empty iff the fiber is not currently running.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::sched::{self, Scheduler};
use crate::tracing_compat::trace;
use crate::types::FiberId;

/// The value a resumed fiber receives from its suspension point.
pub type ResumeValue = Box<dyn Any + Send>;

/// Produces the resume value; evaluated on the owning scheduler's
/// thread just before the fiber re-enters.
pub type ResumeThunk = Box<dyn FnOnce() -> ResumeValue + Send>;

/// The rest of a fiber's computation, entered with the resume value.
pub type Continuation = Box<dyn FnOnce(ResumeValue) -> FiberStep + Send>;

/// Runs in the scheduler's dynamic extent right after a suspension is
/// captured; expected to register the fiber with a wake source.
pub type AfterSuspend = Box<dyn FnOnce(&Arc<Fiber>) + Send>;

/// Outcome of one fiber step.
pub enum FiberStep {
    /// The body returned normally; the fiber is terminated.
    Complete,
    /// The body suspended. Built by [`suspend`].
    Yield {
        /// Callback run after the continuation is stored.
        after_suspend: AfterSuspend,
        /// Continuation stored into the slot.
        resume_with: Continuation,
    },
}

impl fmt::Debug for FiberStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "Complete"),
            Self::Yield { .. } => write!(f, "Yield"),
        }
    }
}

pub(crate) enum FiberState {
    Suspended(Continuation),
    Queued(Continuation, ResumeThunk),
    Running,
    Done,
}

impl FiberState {
    const fn label(&self) -> &'static str {
        match self {
            Self::Suspended(_) => "suspended",
            Self::Queued(..) => "queued",
            Self::Running => "running",
            Self::Done => "done",
        }
    }
}

impl fmt::Debug for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A lightweight cooperative thread owned by one scheduler.
pub struct Fiber {
    id: FiberId,
    name: Option<String>,
    scheduler: Arc<Scheduler>,
    state: Mutex<FiberState>,
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Fiber {
    /// Creates a fiber in the runnable state, holding its initial
    /// continuation and a unit resume value. The caller enqueues it.
    pub(crate) fn new_runnable(
        scheduler: Arc<Scheduler>,
        name: Option<String>,
        initial: Continuation,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: FiberId::next(),
            name,
            scheduler,
            state: Mutex::new(FiberState::Queued(initial, unit_thunk())),
        })
    }

    /// Returns the fiber's identifier.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Returns the fiber's name, if it was created with one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the owning scheduler. Fixed at creation; pins the fiber
    /// to that scheduler's kernel thread.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Returns true if the fiber's body has returned.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(*self.state.lock(), FiberState::Done)
    }

    /// Moves the continuation and resume thunk out of a queued fiber,
    /// leaving it running. Returns `None` if the fiber is not queued.
    pub(crate) fn take_runnable(&self) -> Option<(Continuation, ResumeThunk)> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, FiberState::Running) {
            FiberState::Queued(continuation, thunk) => Some((continuation, thunk)),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Stores the continuation of a suspending fiber back into the
    /// slot.
    pub(crate) fn park(&self, continuation: Continuation) {
        let mut state = self.state.lock();
        debug_assert!(matches!(*state, FiberState::Running));
        *state = FiberState::Suspended(continuation);
    }

    /// Marks a running fiber's body as returned.
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        debug_assert!(matches!(*state, FiberState::Running));
        *state = FiberState::Done;
    }
}

thread_local! {
    static CURRENT_FIBER: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };
}

/// Returns the fiber currently executing on this thread, if any.
#[must_use]
pub fn current_fiber() -> Option<Arc<Fiber>> {
    CURRENT_FIBER.with(|slot| slot.borrow().clone())
}

/// Guard installing a fiber as current; restores the previous binding
/// on drop.
pub(crate) struct CurrentFiberGuard {
    prev: Option<Arc<Fiber>>,
}

impl CurrentFiberGuard {
    pub(crate) fn install(fiber: &Arc<Fiber>) -> Self {
        let prev = CURRENT_FIBER.with(|slot| slot.replace(Some(Arc::clone(fiber))));
        Self { prev }
    }
}

impl Drop for CurrentFiberGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_FIBER.with(|slot| {
            *slot.borrow_mut() = prev;
        });
    }
}

/// A resume thunk delivering the unit value.
#[must_use]
pub fn unit_thunk() -> ResumeThunk {
    Box::new(|| Box::new(()) as ResumeValue)
}

/// Creates a fiber on `sched` running `body` and enqueues it.
pub fn create_fiber<F>(sched: &Arc<Scheduler>, body: F) -> Arc<Fiber>
where
    F: FnOnce() -> FiberStep + Send + 'static,
{
    sched.spawn(body)
}

/// Sets a suspended fiber's resume thunk and enqueues it on its owning
/// scheduler's run queue, waking that scheduler when the caller is not
/// its owner thread. Callable from any thread.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidResume`](crate::ErrorKind::InvalidResume)
/// if the fiber's continuation slot is empty (running, already queued,
/// or done).
pub fn resume_fiber(fiber: &Arc<Fiber>, thunk: ResumeThunk) -> Result<()> {
    {
        let mut state = fiber.state.lock();
        match std::mem::replace(&mut *state, FiberState::Running) {
            FiberState::Suspended(continuation) => {
                *state = FiberState::Queued(continuation, thunk);
            }
            other => {
                let label = other.label();
                *state = other;
                return Err(Error::invalid_resume(fiber.id, label));
            }
        }
    }
    // The slot write is published by the run-queue lock handoff; the
    // draining thread observes the Queued state before running it.
    trace!(fiber = %fiber.id, "fiber resumed");
    fiber.scheduler.enqueue_runnable(Arc::clone(fiber));
    Ok(())
}

/// Suspends the current fiber.
///
/// Captures the rest of the computation as `resume_with`, to be stored
/// in the fiber's continuation slot, and arranges for `after_suspend`
/// to run in the scheduler's dynamic extent right after the capture.
/// The value passed to [`resume_fiber`]'s thunk becomes the argument of
/// `resume_with`.
///
/// The returned step must be the fiber body's return value; it is the
/// abort to the scheduler's prompt.
///
/// # Panics
///
/// Panics with a `ContinuationBarrier` error when called outside a
/// fiber, or when the prompt installed on the current thread is not
/// the one delimiting the current fiber's scheduler (a non-re-enterable
/// boundary sits between the fiber body and its prompt).
#[must_use]
pub fn suspend<A, K>(after_suspend: A, resume_with: K) -> FiberStep
where
    A: FnOnce(&Arc<Fiber>) + Send + 'static,
    K: FnOnce(ResumeValue) -> FiberStep + Send + 'static,
{
    let Some(fiber) = current_fiber() else {
        panic!(
            "{}",
            Error::continuation_barrier("suspend called outside a fiber")
        );
    };
    let expected = fiber.scheduler.prompt_id();
    match sched::installed_prompt() {
        Some(installed) if installed == expected => {}
        installed => panic!(
            "{}",
            Error::continuation_barrier(format!(
                "{} is delimited by {expected}, but the current prompt is {installed:?}",
                fiber.id
            ))
        ),
    }
    FiberStep::Yield {
        after_suspend: Box::new(after_suspend),
        resume_with: Box::new(resume_with),
    }
}

/// Suspends and immediately re-enqueues the current fiber, deferring
/// the rest of the computation to the next turn.
#[must_use]
pub fn yield_now<K>(resume_with: K) -> FiberStep
where
    K: FnOnce(ResumeValue) -> FiberStep + Send + 'static,
{
    suspend(
        |fiber| {
            // The fiber is suspended with its slot filled; this cannot
            // fail.
            let _ = resume_fiber(fiber, unit_thunk());
        },
        resume_with,
    )
}

/// Suspends the current fiber until `deadline`, then resumes it with
/// the unit value.
#[must_use]
pub fn sleep_until<K>(deadline: crate::types::Time, resume_with: K) -> FiberStep
where
    K: FnOnce(ResumeValue) -> FiberStep + Send + 'static,
{
    suspend(
        move |fiber| {
            let sched = Arc::clone(fiber.scheduler());
            let target = Arc::clone(fiber);
            if let Err(err) = sched.resume_on_timer(target, deadline, || Some(unit_thunk())) {
                crate::tracing_compat::warn!(%err, "sleep timer registration failed");
            }
        },
        resume_with,
    )
}
