//! Process-wide name registries for schedulers and fibers.
//!
//! Introspection only: entries hold weak references, so a name never
//! keeps its object alive. Dead entries are reaped on access.
//! Enumeration order is the name order, deterministically.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::fiber::Fiber;
use crate::sched::Scheduler;

static SCHEDULERS: Mutex<BTreeMap<String, Weak<Scheduler>>> = Mutex::new(BTreeMap::new());
static FIBERS: Mutex<BTreeMap<String, Weak<Fiber>>> = Mutex::new(BTreeMap::new());

pub(crate) fn register_scheduler(name: String, sched: &Arc<Scheduler>) {
    SCHEDULERS.lock().insert(name, Arc::downgrade(sched));
}

pub(crate) fn register_fiber(name: String, fiber: &Arc<Fiber>) {
    FIBERS.lock().insert(name, Arc::downgrade(fiber));
}

fn snapshot<T>(map: &Mutex<BTreeMap<String, Weak<T>>>) -> Vec<(String, Arc<T>)> {
    let mut map = map.lock();
    let mut live = Vec::with_capacity(map.len());
    map.retain(|name, weak| match weak.upgrade() {
        Some(strong) => {
            live.push((name.clone(), strong));
            true
        }
        None => false,
    });
    live
}

fn lookup<T>(map: &Mutex<BTreeMap<String, Weak<T>>>, name: &str) -> Option<Arc<T>> {
    let mut map = map.lock();
    match map.get(name).and_then(Weak::upgrade) {
        Some(strong) => Some(strong),
        None => {
            map.remove(name);
            None
        }
    }
}

/// Returns the live named schedulers, in name order.
#[must_use]
pub fn schedulers() -> Vec<(String, Arc<Scheduler>)> {
    snapshot(&SCHEDULERS)
}

/// Returns the live named fibers, in name order.
#[must_use]
pub fn fibers() -> Vec<(String, Arc<Fiber>)> {
    snapshot(&FIBERS)
}

/// Looks up a scheduler by name.
#[must_use]
pub fn scheduler(name: &str) -> Option<Arc<Scheduler>> {
    lookup(&SCHEDULERS, name)
}

/// Looks up a fiber by name.
#[must_use]
pub fn fiber(name: &str) -> Option<Arc<Fiber>> {
    lookup(&FIBERS, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::FiberStep;
    use crate::test_utils::init_test;

    #[test]
    fn named_scheduler_is_discoverable() {
        init_test("registry_named_scheduler");
        let sched = Scheduler::new_named("registry-test-sched").expect("scheduler");
        let found = scheduler("registry-test-sched").expect("registered");
        crate::assert_with_log!(
            found.id() == sched.id(),
            "lookup returns the scheduler",
            sched.id(),
            found.id()
        );
        crate::test_complete!("registry_named_scheduler");
    }

    #[test]
    fn names_do_not_keep_objects_alive() {
        init_test("registry_weak_reaping");
        {
            let _sched = Scheduler::new_named("registry-reaped-sched").expect("scheduler");
            assert!(scheduler("registry-reaped-sched").is_some());
        }
        let gone = scheduler("registry-reaped-sched").is_none();
        crate::assert_with_log!(gone, "dead entry reaped on lookup", true, gone);
        crate::test_complete!("registry_weak_reaping");
    }

    #[test]
    fn named_fiber_enumerates_until_dropped() {
        init_test("registry_named_fiber");
        let sched = Scheduler::new().expect("scheduler");
        let spawned = sched.spawn_named("registry-test-fiber", || FiberStep::Complete);

        let names: Vec<String> = fibers().into_iter().map(|(name, _)| name).collect();
        crate::assert_with_log!(
            names.contains(&"registry-test-fiber".to_string()),
            "fiber enumerated while alive",
            true,
            names.contains(&"registry-test-fiber".to_string())
        );

        sched.run().expect("run");
        drop(spawned);
        let gone = fiber("registry-test-fiber").is_none();
        crate::assert_with_log!(gone, "fiber reaped after drop", true, gone);
        crate::test_complete!("registry_named_fiber");
    }

    #[test]
    fn snapshot_is_name_ordered() {
        init_test("registry_snapshot_order");
        let _b = Scheduler::new_named("registry-order-b").expect("scheduler");
        let _a = Scheduler::new_named("registry-order-a").expect("scheduler");

        let names: Vec<String> = schedulers()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|n| n.starts_with("registry-order-"))
            .collect();
        crate::assert_with_log!(
            names == vec!["registry-order-a", "registry-order-b"],
            "deterministic name order",
            vec!["registry-order-a", "registry-order-b"],
            names
        );
        crate::test_complete!("registry_snapshot_order");
    }
}
