//! The per-thread scheduler: run queue, wait sources, timers, and the
//! turn loop.
//!
//! A scheduler drives fibers pinned to one kernel thread. Each **turn**
//! drains the readiness backend with a computed timeout, fires expired
//! timers in deadline order, atomically swaps out the run queue as a
//! batch, and runs every fiber in the batch to its next suspension
//! point. The loop terminates at quiescence: an empty batch with no
//! armed fds and no pending timers.
//!
//! Batch swapping is load-bearing: fibers awoken during a turn are
//! deferred to the next one, bounding the work between kernel polls.
//!
//! All internal state except the run queue is mutated only from the
//! owning thread; the run queue and the backend `wake` are the sole
//! cross-thread surfaces.

pub mod run_queue;
pub mod timer;
pub mod wait_table;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::fiber::{resume_fiber, Continuation, CurrentFiberGuard, Fiber, FiberStep, ResumeThunk, ResumeValue};
use crate::reactor::{reactor_for, EventMask, Events, Reactor};
use crate::registry;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{PromptId, SchedulerId, ThreadToken, Time};

pub use run_queue::RunQueue;
pub use timer::TimerHeap;
pub use wait_table::{ArmAction, WaitTable};

/// Owner-thread state: wait sources and timers. Guarded by a mutex for
/// `Sync`, but only the owning thread takes it while the scheduler
/// runs.
struct Core {
    waits: WaitTable<Arc<Fiber>>,
    timers: TimerHeap,
}

/// Per-kernel-thread fiber scheduler.
pub struct Scheduler {
    id: SchedulerId,
    name: Option<String>,
    prompt: PromptId,
    run_queue: RunQueue<Arc<Fiber>>,
    core: Mutex<Core>,
    reactor: Box<dyn Reactor>,
    /// `ThreadToken` of the running owner; 0 while not running.
    owner: AtomicU64,
    max_events: usize,
    max_poll_interval: Option<Duration>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("prompt", &self.prompt)
            .field("owner", &self.kernel_thread())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    pub fn new() -> Result<Arc<Self>> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a named scheduler with the default configuration and
    /// registers it in the process-wide registry.
    pub fn new_named(name: impl Into<String>) -> Result<Arc<Self>> {
        let mut sched = Self::build(SchedulerConfig::default())?;
        sched.name = Some(name.into());
        let sched = Arc::new(sched);
        if let Some(name) = sched.name.clone() {
            registry::register_scheduler(name, &sched);
        }
        Ok(sched)
    }

    /// Creates a scheduler from a configuration, constructing the
    /// backend the configuration selects.
    pub fn with_config(config: SchedulerConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::build(config)?))
    }

    /// Creates a scheduler over a caller-supplied backend.
    pub fn with_reactor(config: SchedulerConfig, reactor: Box<dyn Reactor>) -> Result<Arc<Self>> {
        config.validate().map_err(Error::from)?;
        Ok(Arc::new(Self::assemble(config, reactor)))
    }

    fn build(config: SchedulerConfig) -> Result<Self> {
        config.validate().map_err(Error::from)?;
        let reactor = reactor_for(&config).map_err(Error::backend)?;
        Ok(Self::assemble(config, reactor))
    }

    fn assemble(config: SchedulerConfig, reactor: Box<dyn Reactor>) -> Self {
        Self {
            id: SchedulerId::next(),
            name: None,
            prompt: PromptId::next(),
            run_queue: RunQueue::new(),
            core: Mutex::new(Core {
                waits: WaitTable::new(),
                timers: TimerHeap::new(),
            }),
            reactor,
            owner: AtomicU64::new(0),
            max_events: config.max_events,
            max_poll_interval: config.max_poll_interval,
        }
    }

    /// Returns the scheduler's identifier.
    #[must_use]
    pub fn id(&self) -> SchedulerId {
        self.id
    }

    /// Returns the scheduler's name, if it was created with one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn prompt_id(&self) -> PromptId {
        self.prompt
    }

    /// Returns the kernel thread currently running this scheduler.
    #[must_use]
    pub fn kernel_thread(&self) -> Option<ThreadToken> {
        ThreadToken::from_u64(self.owner.load(Ordering::Acquire))
    }

    /// Number of fds with an armed wait source.
    #[must_use]
    pub fn active_fd_count(&self) -> usize {
        self.core.lock().waits.active_fds()
    }

    /// Number of pending timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.core.lock().timers.len()
    }

    /// Returns true if the scheduler has nothing left to do: an empty
    /// run queue, no armed fds, and no pending timers.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.run_queue.is_empty() && self.core_quiescent()
    }

    fn core_quiescent(&self) -> bool {
        let core = self.core.lock();
        core.waits.active_fds() == 0 && core.timers.is_empty()
    }

    /// Creates a fiber running `body` and enqueues it.
    pub fn spawn<F>(self: &Arc<Self>, body: F) -> Arc<Fiber>
    where
        F: FnOnce() -> FiberStep + Send + 'static,
    {
        self.spawn_inner(None, body)
    }

    /// Creates a named fiber, registering it in the process-wide
    /// registry.
    pub fn spawn_named<F>(self: &Arc<Self>, name: impl Into<String>, body: F) -> Arc<Fiber>
    where
        F: FnOnce() -> FiberStep + Send + 'static,
    {
        self.spawn_inner(Some(name.into()), body)
    }

    fn spawn_inner<F>(self: &Arc<Self>, name: Option<String>, body: F) -> Arc<Fiber>
    where
        F: FnOnce() -> FiberStep + Send + 'static,
    {
        let initial: Continuation = Box::new(move |_| body());
        let fiber = Fiber::new_runnable(Arc::clone(self), name, initial);
        if let Some(name) = fiber.name() {
            registry::register_fiber(name.to_owned(), &fiber);
        }
        trace!(sched = %self.id, fiber = %fiber.id(), "fiber spawned");
        self.enqueue_runnable(Arc::clone(&fiber));
        fiber
    }

    /// Enqueues a runnable fiber and wakes the backend when the caller
    /// is not the owning thread, so a loop blocked in `poll` observes
    /// the new work promptly.
    pub(crate) fn enqueue_runnable(&self, fiber: Arc<Fiber>) {
        self.run_queue.enqueue(fiber);
        let owner = self.owner.load(Ordering::Acquire);
        if owner != ThreadToken::current().as_u64() {
            if let Err(err) = self.reactor.wake() {
                warn!(sched = %self.id, %err, "backend wake failed");
            }
        }
    }

    /// Arms a oneshot readable (plus remote-close) wait resuming
    /// `fiber` when `fd` becomes ready.
    pub fn resume_on_readable(&self, fd: RawFd, fiber: Arc<Fiber>) -> Result<()> {
        self.resume_on_fd_events(fd, EventMask::READABLE | EventMask::REMOTE_CLOSE, fiber)
    }

    /// Arms a oneshot writable wait resuming `fiber` when `fd` becomes
    /// ready.
    pub fn resume_on_writable(&self, fd: RawFd, fiber: Arc<Fiber>) -> Result<()> {
        self.resume_on_fd_events(fd, EventMask::WRITABLE, fiber)
    }

    /// Arms a oneshot wait for `mask` on `fd`, resuming `fiber` with
    /// the reported events.
    pub fn resume_on_fd_events(&self, fd: RawFd, mask: EventMask, fiber: Arc<Fiber>) -> Result<()> {
        self.check_owner_access()?;
        let action = self.core.lock().waits.register(fd, mask, fiber);
        trace!(sched = %self.id, fd, ?mask, ?action, "fd wait registered");
        match action {
            ArmAction::Add(mask) => self.reactor.add(fd, mask).map_err(Error::backend),
            ArmAction::Rearm(mask) => self.reactor.modify(fd, mask).map_err(Error::backend),
            ArmAction::None => Ok(()),
        }
    }

    /// Schedules a resumption of `fiber` at `deadline`.
    ///
    /// When the deadline passes, `get_thunk` is consulted: a thunk
    /// claims the resumption, `None` cedes it to whichever operation
    /// won the race. The callback never blocks; it either enqueues the
    /// fiber or does nothing.
    pub fn resume_on_timer<G>(&self, fiber: Arc<Fiber>, deadline: Time, get_thunk: G) -> Result<()>
    where
        G: FnOnce() -> Option<ResumeThunk> + Send + 'static,
    {
        self.check_owner_access()?;
        self.core.lock().timers.insert(
            deadline,
            Box::new(move || {
                if let Some(thunk) = get_thunk() {
                    if let Err(err) = resume_fiber(&fiber, thunk) {
                        warn!(fiber = %fiber.id(), %err, "timer could not resume fiber");
                    }
                }
            }),
        );
        Ok(())
    }

    /// Drives the scheduler until quiescence.
    ///
    /// # Errors
    ///
    /// Returns `OwnershipViolation` when another thread currently owns
    /// the scheduler, and `Backend` when the readiness backend fails.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let _owner = self.claim_owner()?;
        let _current = CurrentSchedulerGuard::install(self);
        debug!(sched = %self.id, "scheduler running");

        let mut events = Events::with_capacity(self.max_events);
        loop {
            let timeout = self.poll_timeout();
            self.reactor
                .poll(&mut events, timeout)
                .map_err(Error::backend)?;

            for event in events.iter() {
                self.dispatch_ready(event.fd, event.ready);
            }
            self.fire_expired_timers();

            let batch = self.run_queue.drain();
            let batch_was_empty = batch.is_empty();
            self.run_batch(batch);

            if batch_was_empty && self.core_quiescent() {
                debug!(sched = %self.id, "scheduler quiescent");
                return Ok(());
            }
        }
    }

    /// Computes how long the next poll may block.
    ///
    /// Zero when runnables are pending; with no timers, zero when no
    /// fds are armed (the loop is about to terminate) and indefinite
    /// otherwise; else the time to the earliest deadline.
    pub(crate) fn poll_timeout(&self) -> Option<Duration> {
        let computed = if self.run_queue.is_empty() {
            let core = self.core.lock();
            match core.timers.peek_deadline() {
                Some(deadline) => Some(deadline.saturating_since(Time::now())),
                None if core.waits.active_fds() == 0 => Some(Duration::ZERO),
                None => None,
            }
        } else {
            Some(Duration::ZERO)
        };
        match self.max_poll_interval {
            Some(cap) => Some(computed.map_or(cap, |t| t.min(cap))),
            None => computed,
        }
    }

    fn dispatch_ready(&self, fd: RawFd, ready: EventMask) {
        let dispatch = self.core.lock().waits.dispatch(fd, ready);
        let Some(dispatch) = dispatch else {
            // Tolerated race with fd close; drop the event.
            warn!(sched = %self.id, fd, ?ready, "readiness for unknown fd dropped");
            return;
        };
        trace!(sched = %self.id, fd, ?ready, waiters = dispatch.resumed.len(), "fd dispatch");

        if dispatch.remove_backend {
            if let Err(err) = self.reactor.remove(fd) {
                warn!(sched = %self.id, fd, %err, "backend remove failed");
            }
        }
        for (fiber, reported) in dispatch.resumed {
            let thunk: ResumeThunk = Box::new(move || Box::new(reported) as ResumeValue);
            if let Err(err) = resume_fiber(&fiber, thunk) {
                warn!(fiber = %fiber.id(), %err, "fd delivery could not resume fiber");
            }
        }
    }

    fn fire_expired_timers(&self) {
        // Callbacks run outside the core lock: they enqueue fibers and
        // may consult claim cells, never touch the timer heap.
        let expired = self.core.lock().timers.pop_expired(Time::now());
        for callback in expired {
            callback();
        }
    }

    fn run_batch(self: &Arc<Self>, batch: VecDeque<Arc<Fiber>>) {
        for fiber in batch {
            self.run_fiber(fiber);
        }
    }

    /// Runs one fiber to its next suspension point.
    ///
    /// Installs this scheduler's prompt, moves the continuation out of
    /// the slot (the fiber is now running), and enters it with the
    /// resume value. A completed body terminates the fiber; a yield
    /// refills the slot and then runs `after_suspend` in the
    /// scheduler's dynamic extent.
    fn run_fiber(self: &Arc<Self>, fiber: Arc<Fiber>) {
        let Some((continuation, thunk)) = fiber.take_runnable() else {
            warn!(fiber = %fiber.id(), "dequeued fiber was not runnable");
            return;
        };

        let _prompt = PromptGuard::install(self.prompt);
        let _current = CurrentFiberGuard::install(&fiber);
        match continuation(thunk()) {
            FiberStep::Complete => {
                trace!(fiber = %fiber.id(), "fiber completed");
                fiber.finish();
            }
            FiberStep::Yield {
                after_suspend,
                resume_with,
            } => {
                fiber.park(resume_with);
                after_suspend(&fiber);
            }
        }
    }

    fn claim_owner(&self) -> Result<OwnerGuard<'_>> {
        let me = ThreadToken::current();
        match self
            .owner
            .compare_exchange(0, me.as_u64(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(OwnerGuard { owner: &self.owner }),
            Err(held) => {
                let holder = ThreadToken::from_u64(held).unwrap_or(me);
                Err(Error::ownership_violation(self.id, holder, me))
            }
        }
    }

    /// While the scheduler runs, only its owner thread may touch the
    /// wait-source table or timer heap.
    fn check_owner_access(&self) -> Result<()> {
        match self.kernel_thread() {
            None => Ok(()),
            Some(owner) if owner == ThreadToken::current() => Ok(()),
            Some(owner) => Err(Error::ownership_violation(
                self.id,
                owner,
                ThreadToken::current(),
            )),
        }
    }
}

struct OwnerGuard<'a> {
    owner: &'a AtomicU64,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.owner.store(0, Ordering::Release);
    }
}

thread_local! {
    static CURRENT_SCHEDULER: RefCell<Option<Arc<Scheduler>>> = const { RefCell::new(None) };
    static INSTALLED_PROMPT: Cell<Option<PromptId>> = const { Cell::new(None) };
}

/// Returns the scheduler bound to this thread, if any.
#[must_use]
pub fn current_scheduler() -> Option<Arc<Scheduler>> {
    CURRENT_SCHEDULER.with(|slot| slot.borrow().clone())
}

pub(crate) fn installed_prompt() -> Option<PromptId> {
    INSTALLED_PROMPT.with(Cell::get)
}

struct CurrentSchedulerGuard {
    prev: Option<Arc<Scheduler>>,
}

impl CurrentSchedulerGuard {
    fn install(sched: &Arc<Scheduler>) -> Self {
        let prev = CURRENT_SCHEDULER.with(|slot| slot.replace(Some(Arc::clone(sched))));
        Self { prev }
    }
}

impl Drop for CurrentSchedulerGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_SCHEDULER.with(|slot| {
            *slot.borrow_mut() = prev;
        });
    }
}

struct PromptGuard {
    prev: Option<PromptId>,
}

impl PromptGuard {
    fn install(prompt: PromptId) -> Self {
        let prev = INSTALLED_PROMPT.with(|slot| slot.replace(Some(prompt)));
        Self { prev }
    }
}

impl Drop for PromptGuard {
    fn drop(&mut self) {
        let prev = self.prev;
        INSTALLED_PROMPT.with(|slot| slot.set(prev));
    }
}

/// Installs `sched` as the current scheduler for the extent of `body`,
/// restoring the previous binding on every exit path.
pub fn with_scheduler<R>(sched: &Arc<Scheduler>, body: impl FnOnce() -> R) -> R {
    let _guard = CurrentSchedulerGuard::install(sched);
    body()
}

/// Drives `sched` until quiescence. See [`Scheduler::run`].
pub fn run_scheduler(sched: &Arc<Scheduler>) -> Result<()> {
    sched.run()
}
