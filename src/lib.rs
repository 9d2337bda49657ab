//! Fibrous: a cooperative, event-driven fiber scheduler.
//!
//! A fiber is a lightweight thread of control suspended and resumed by
//! its scheduler in response to three categories of events: fd
//! readiness, timer expiry, and explicit wake-ups from other fibers,
//! possibly on other kernel threads.
//!
//! Each [`Scheduler`] is pinned to one kernel thread while running and
//! owns a run queue, a wait-source table keyed by fd, a timer heap,
//! and a readiness backend ([`reactor::Reactor`]). The loop drives
//! *turns*: drain readiness, fire timers, run a batch of runnables.
//! Multiple schedulers may run in parallel threads; the run queue and
//! the backend wake are the only cross-thread surfaces.
//!
//! # Example
//!
//! ```no_run
//! use fibrous::{create_fiber, suspend, FiberStep, Scheduler};
//!
//! let sched = Scheduler::new().expect("scheduler");
//! create_fiber(&sched, || {
//!     suspend(
//!         |fiber| {
//!             // Register the fiber with a wake source here.
//!             let _ = fiber;
//!         },
//!         |_value| FiberStep::Complete,
//!     )
//! });
//! sched.run().expect("run");
//! ```

pub mod config;
pub mod error;
pub mod fiber;
pub mod reactor;
pub mod registry;
pub mod sched;
pub mod types;

pub(crate) mod tracing_compat;

#[cfg(test)]
pub mod test_utils;

pub use config::{BackendKind, SchedulerConfig};
pub use error::{Error, ErrorKind, Result};
pub use fiber::{
    create_fiber, current_fiber, resume_fiber, sleep_until, suspend, yield_now, Fiber, FiberStep,
    ResumeThunk, ResumeValue,
};
pub use reactor::{EventMask, Reactor};
pub use sched::{current_scheduler, run_scheduler, with_scheduler, Scheduler};
pub use types::Time;
