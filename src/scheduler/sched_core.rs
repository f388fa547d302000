/*
 * Scheduler Core - Mechanism Layer
 *
 * This module implements SchedulerCore, the mechanism layer that:
 * 1. Owns every thread record (arena) and the per-state lists
 * 2. Holds the active scheduling policy (Box<dyn SchedPolicy>)
 * 3. Tracks the current record and the distinguished system record
 * 4. Plans each dispatch step: retire the previous record, consult the
 *    policy, mark the winner RUNNING
 * 5. Reconciles joiners and zombies when a record blocks or terminates
 *
 * The core never switches stacks itself. Runtime (mod.rs) asks it for a
 * dispatch decision, releases the borrow and only then performs the
 * switch. Keeping the two apart lets every transition below be unit tested
 * without leaving the test's own stack.
 *
 * LIST OWNERSHIP:
 * ===============
 *
 *   RUNNABLE  RUNNABLE and RUNNING records (at most one RUNNING)
 *   BLOCKED   records waiting in join
 *   ZOMBIE    terminated records whose value nobody collected yet
 *
 * The system record lives in the arena but never in a list.
 */

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::{
    context::SchedContext,
    thread::{StackRegion, ThreadFlags, ThreadId, ThreadRecord, ThreadState},
    thread_list::{Handle, ThreadArena, ThreadList, contract_violation},
    traits::SchedPolicy,
    types::{ListKind, SchedStats, Timestamp},
};
use crate::arch::ExecContext;
use crate::error::Error;

/// Outcome of one dispatch step
#[derive(Debug)]
pub struct Dispatch {
    /// Record to switch into, `None` when nothing is runnable
    pub next: Option<Handle>,

    /// Zombie reclaimed during this step; its stack must go back to the
    /// allocator
    pub reclaimed: Option<ThreadRecord>,
}

/// Scheduler Core - The Mechanism Layer
pub struct SchedulerCore {
    arena: ThreadArena,
    lists: [ThreadList; ListKind::COUNT],

    /// The dispatch loop's own record
    system: Handle,

    /// Currently running record; the system record while no thread runs
    current: Option<Handle>,

    next_id: i64,
    policy: Box<dyn SchedPolicy>,
    levels: usize,
    stats: SchedStats,
}

impl SchedulerCore {
    /// Create a core with the given policy spread over `levels` priorities
    pub fn new(policy: Box<dyn SchedPolicy>, levels: usize) -> Self {
        let mut arena = ThreadArena::new();
        let system = arena.insert(ThreadRecord::system());

        log::info!("SchedulerCore initialized with policy: {}", policy.name());

        Self {
            arena,
            lists: [ThreadList::new(), ThreadList::new(), ThreadList::new()],
            system,
            current: Some(system),
            next_id: 0,
            policy,
            levels,
            stats: SchedStats::default(),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    pub fn system(&self) -> Handle {
        self.system
    }

    pub fn current(&self) -> Option<Handle> {
        self.current
    }

    /// The current record when it is a logical thread
    pub fn current_thread(&self) -> Option<Handle> {
        self.current.filter(|&h| h != self.system)
    }

    pub fn record(&self, handle: Handle) -> &ThreadRecord {
        &self.arena[handle]
    }

    pub fn record_mut(&mut self, handle: Handle) -> &mut ThreadRecord {
        &mut self.arena[handle]
    }

    pub fn list(&self, kind: ListKind) -> &ThreadList {
        &self.lists[kind.as_usize()]
    }

    /// Hand out the next thread identifier
    pub fn next_id(&mut self) -> ThreadId {
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Store a new record; it is not scheduled until added to a list
    pub fn insert(&mut self, record: ThreadRecord) -> Handle {
        self.stats.created += 1;
        self.arena.insert(record)
    }

    /// Set `state` and append the record to the matching list
    ///
    /// RUNNING records go to the runnable list.
    pub fn add_to_scheduler(&mut self, handle: Handle, state: ThreadState) {
        if handle == self.system {
            contract_violation("trying to add the system thread to a scheduler list");
        }
        let kind = list_for(state)
            .unwrap_or_else(|| contract_violation("trying to schedule a record as DEAD or SYSTEM"));

        self.arena[handle].state = state;
        self.lists[kind.as_usize()].add(&mut self.arena, handle);
    }

    /// First record with `id` in the given list
    pub fn find_in(&self, kind: ListKind, id: ThreadId) -> Option<Handle> {
        self.lists[kind.as_usize()].find(&self.arena, id)
    }

    /// Search every state list for `id`
    pub fn find(&self, id: ThreadId) -> Option<(ListKind, Handle)> {
        [ListKind::Runnable, ListKind::Blocked, ListKind::Zombie]
            .into_iter()
            .find_map(|kind| self.find_in(kind, id).map(|h| (kind, h)))
    }

    /// Take a record out of whichever list holds it and drop it from the
    /// arena, without any state transition
    ///
    /// Joiners waiting on it are not told; they find out through the
    /// spurious-wake path the next time reconciliation runs.
    #[cfg(test)]
    pub(crate) fn evict(&mut self, id: ThreadId) -> Option<ThreadRecord> {
        let (kind, handle) = self.find(id)?;
        self.lists[kind.as_usize()].remove(&mut self.arena, handle);
        log::warn!("{} evicted from {:?} list", id, kind);
        Some(self.arena.remove(handle))
    }

    /// Saved-context slots for a switch out of `from` into `to`
    ///
    /// The pointers stay valid until the arena is next modified; the caller
    /// must perform the switch before touching the core again.
    pub fn context_pair(&mut self, from: Handle, to: Handle) -> (*mut ExecContext, *const ExecContext) {
        if from == to {
            contract_violation("switching a context into itself");
        }
        let save = &mut self.arena[from].context as *mut ExecContext;
        let load = &self.arena[to].context as *const ExecContext;
        (save, load)
    }

    /// One pass of the dispatch loop, minus the switch itself
    ///
    /// Runs on the system context. Retires the record that just yielded
    /// back, reconciles it if it blocked or terminated, and picks the next
    /// record. The winner is RUNNING and current on return.
    pub fn dispatch(&mut self, now: Timestamp) -> Dispatch {
        let current = self
            .current
            .take()
            .unwrap_or_else(|| contract_violation("null current record in dispatch"));

        let (state, target) = {
            let record = &mut self.arena[current];
            record.error = None;
            (record.state, record.yield_target.take())
        };

        let mut forced = None;
        if state == ThreadState::Running {
            self.arena[current].state = ThreadState::Runnable;
            if let Some(target) = target {
                forced = self.find_in(ListKind::Runnable, target);
                if forced.is_none() {
                    log::warn!("yield target {} is not runnable", target);
                    self.arena[current].error = Some(Error::InvalidTarget(target));
                }
            }
        }

        let mut reclaimed = None;
        let mut prev = None;
        if current != self.system {
            match self.arena[current].state {
                ThreadState::Blocked | ThreadState::Zombie => {
                    reclaimed = self.handle_non_runnable(current);
                }
                ThreadState::Runnable => prev = Some(current),
                _ => {}
            }
        }

        // A resolved yield target bypasses the policy entirely
        let next = match forced {
            Some(target) => Some(target),
            None => {
                let runnable = &mut self.lists[ListKind::Runnable.as_usize()];
                let mut ctx = SchedContext::new(&mut self.arena, runnable, self.levels);
                self.policy.pick_next(&mut ctx, prev, None)
            }
        };

        if let Some(next) = next {
            let record = &mut self.arena[next];
            record.state = ThreadState::Running;
            record.flags.insert(ThreadFlags::SCHEDULED | ThreadFlags::STARTED);
            record.slice_start = now;
            self.current = Some(next);
            self.stats.switches += 1;
            log::trace!("dispatch -> {} ({})", record.id, record.priority);
        }

        Dispatch { next, reclaimed }
    }

    /// Close the run slice of the record that just yielded back
    pub fn finish_slice(&mut self, now: Timestamp) {
        if let Some(handle) = self.current_thread() {
            self.arena[handle].close_slice(now);
        }
    }

    /// Make the system record current again once the loop ends
    pub fn park(&mut self) {
        self.current = Some(self.system);
    }

    /// Move a record that blocked or terminated to its list and settle joins
    ///
    /// Returns the zombie record reclaimed by a join, if any.
    pub fn handle_non_runnable(&mut self, handle: Handle) -> Option<ThreadRecord> {
        let state = self.arena[handle].state;
        let kind = match state {
            ThreadState::Blocked => ListKind::Blocked,
            ThreadState::Zombie => ListKind::Zombie,
            _ => contract_violation("handle_non_runnable called with invalid state"),
        };

        self.lists[ListKind::Runnable.as_usize()].remove(&mut self.arena, handle);
        self.lists[kind.as_usize()].add(&mut self.arena, handle);

        match kind {
            ListKind::Blocked => self.settle_joiner(handle),
            _ => self.settle_zombie(handle),
        }
    }

    /// A record just blocked in join: resolve it if its target is known
    fn settle_joiner(&mut self, joiner: Handle) -> Option<ThreadRecord> {
        let Some(target) = self.arena[joiner].joined_target else {
            return self.unblock_thread(joiner, None);
        };

        if let Some(zombie) = self.find_in(ListKind::Zombie, target) {
            return self.unblock_thread(joiner, Some(zombie));
        }
        if self.find_in(ListKind::Blocked, target).is_some()
            || self.find_in(ListKind::Runnable, target).is_some()
        {
            log::trace!("{} waits for live {}", self.arena[joiner].id, target);
            return None;
        }
        self.unblock_thread(joiner, None)
    }

    /// A record just terminated: wake whoever joined it
    ///
    /// Only the first matching joiner in BLOCKED order may consume the value
    /// and free the zombie. Any other joiner is woken with an error.
    fn settle_zombie(&mut self, zombie: Handle) -> Option<ThreadRecord> {
        let id = self.arena[zombie].id;
        let joiners: Vec<Handle> = self
            .list(ListKind::Blocked)
            .iter(&self.arena)
            .filter(|&h| self.arena[h].joined_target == Some(id))
            .collect();

        let (&owner, rest) = joiners.split_first()?;
        for &extra in rest {
            self.unblock_thread(extra, None);
        }
        self.unblock_thread(owner, Some(zombie))
    }

    /// Move `blocked` back to RUNNABLE
    ///
    /// With a zombie, the zombie's value is delivered, the zombie leaves its
    /// list and the arena, and its record is returned for stack release.
    /// Without one, this is a spurious wake: the joiner gets an error and
    /// its join target is cleared.
    pub fn unblock_thread(&mut self, blocked: Handle, zombie: Option<Handle>) -> Option<ThreadRecord> {
        if self.arena[blocked].state != ThreadState::Blocked {
            contract_violation("unblock_thread called on a record that is not blocked");
        }
        if let Some(z) = zombie {
            if self.arena[z].state != ThreadState::Zombie {
                contract_violation("unblock_thread called with a zombie in invalid state");
            }
        }

        self.lists[ListKind::Blocked.as_usize()].remove(&mut self.arena, blocked);
        let target = self.arena[blocked].joined_target.take();

        let Some(zombie) = zombie else {
            let record = &mut self.arena[blocked];
            let target = target.unwrap_or(ThreadId::SYSTEM);
            record.error = Some(Error::SpuriousWake(target));
            log::debug!("{} woken spuriously, {} is gone", record.id, target);
            self.add_to_scheduler(blocked, ThreadState::Runnable);
            return None;
        };

        let value = self.arena[zombie].retval;
        {
            let record = &mut self.arena[blocked];
            record.join_recv = value;
            record.error = None;
        }
        self.add_to_scheduler(blocked, ThreadState::Runnable);

        self.lists[ListKind::Zombie.as_usize()].remove(&mut self.arena, zombie);
        let mut dead = self.arena.remove(zombie);
        dead.state = ThreadState::Dead;
        self.stats.reclaimed += 1;
        log::debug!(
            "{} joined {} (value {:?})",
            self.arena[blocked].id,
            dead.id,
            value
        );
        Some(dead)
    }

    /// Take every stack still owned by a record, for teardown
    pub fn take_stacks(&mut self) -> Vec<StackRegion> {
        let handles: Vec<Handle> = self.arena.iter().map(|(h, _)| h).collect();
        handles
            .into_iter()
            .filter_map(|h| self.arena[h].stack.take())
            .collect()
    }
}

impl core::fmt::Debug for SchedulerCore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedulerCore")
            .field("policy", &self.policy.name())
            .field("runnable", &self.lists[0].len())
            .field("blocked", &self.lists[1].len())
            .field("zombie", &self.lists[2].len())
            .field("current", &self.current)
            .field("next_id", &self.next_id)
            .finish()
    }
}

fn list_for(state: ThreadState) -> Option<ListKind> {
    match state {
        ThreadState::Runnable | ThreadState::Running => Some(ListKind::Runnable),
        ThreadState::Blocked => Some(ListKind::Blocked),
        ThreadState::Zombie => Some(ListKind::Zombie),
        ThreadState::Dead | ThreadState::System => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::Cell;
    use core::time::Duration;

    use crate::config::MlfqConfig;
    use crate::scheduler::{
        policies::{MlfqPolicy, RoundRobinPolicy},
        types::Priority,
    };

    /// Round robin that counts how often it is consulted
    struct CountingPolicy(Rc<Cell<u32>>);

    impl SchedPolicy for CountingPolicy {
        fn pick_next(
            &mut self,
            ctx: &mut SchedContext<'_>,
            _prev: Option<Handle>,
            _forced: Option<Handle>,
        ) -> Option<Handle> {
            self.0.set(self.0.get() + 1);
            ctx.rotate()
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn core() -> SchedulerCore {
        SchedulerCore::new(Box::new(RoundRobinPolicy::new()), 1)
    }

    fn spawn(core: &mut SchedulerCore) -> Handle {
        let id = core.next_id();
        let handle = core.insert(ThreadRecord::new(id, Priority::LOWEST));
        core.add_to_scheduler(handle, ThreadState::Runnable);
        handle
    }

    /// Dispatch until `handle` is the running record
    fn run_until(core: &mut SchedulerCore, handle: Handle) {
        for _ in 0..16 {
            if core.current() == Some(handle) {
                return;
            }
            core.dispatch(Timestamp::ZERO);
        }
        panic!("record never dispatched");
    }

    fn block_on(core: &mut SchedulerCore, joiner: Handle, target: ThreadId) {
        run_until(core, joiner);
        let record = core.record_mut(joiner);
        record.state = ThreadState::Blocked;
        record.joined_target = Some(target);
        record.yield_target = Some(target);
    }

    fn terminate(core: &mut SchedulerCore, handle: Handle, value: usize) {
        run_until(core, handle);
        let record = core.record_mut(handle);
        record.retval = Some(value);
        record.state = ThreadState::Zombie;
    }

    #[test]
    fn identifiers_increase_from_zero() {
        let mut core = core();
        let ids: Vec<i64> = (0..4).map(|_| core.next_id().0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn first_dispatch_leaves_system_context() {
        let mut core = core();
        let a = spawn(&mut core);
        assert_eq!(core.current(), Some(core.system()));

        let step = core.dispatch(Timestamp::from_micros(5));
        assert_eq!(step.next, Some(a));
        assert_eq!(core.current(), Some(a));
        assert_eq!(core.record(a).state, ThreadState::Running);
        assert!(core.record(a).flags.contains(ThreadFlags::STARTED));
        assert_eq!(core.stats().switches, 1);
    }

    #[test]
    fn at_most_one_record_is_running() {
        let mut core = core();
        let handles: Vec<Handle> = (0..3).map(|_| spawn(&mut core)).collect();
        for _ in 0..7 {
            core.dispatch(Timestamp::ZERO);
            let running = handles
                .iter()
                .filter(|&&h| core.record(h).state == ThreadState::Running)
                .count();
            assert_eq!(running, 1);
        }
    }

    #[test]
    fn join_on_zombie_delivers_value_and_reclaims() {
        let mut core = core();
        let a = spawn(&mut core);
        let b = spawn(&mut core);
        let b_id = core.record(b).id;

        terminate(&mut core, b, 42);
        let step = core.dispatch(Timestamp::ZERO);
        assert!(step.reclaimed.is_none());
        assert_eq!(core.list(ListKind::Zombie).len(), 1);

        block_on(&mut core, a, b_id);
        let step = core.dispatch(Timestamp::ZERO);

        let dead = step.reclaimed.expect("zombie reclaimed");
        assert_eq!(dead.id, b_id);
        assert_eq!(dead.state, ThreadState::Dead);
        assert_eq!(core.record(a).join_recv, Some(42));
        assert_eq!(core.record(a).error, None);
        assert!(core.find(b_id).is_none());
        assert_eq!(core.stats().reclaimed, 1);
    }

    #[test]
    fn zombie_wakes_a_waiting_joiner() {
        let mut core = core();
        let a = spawn(&mut core);
        let b = spawn(&mut core);
        let b_id = core.record(b).id;

        block_on(&mut core, a, b_id);
        core.dispatch(Timestamp::ZERO);
        assert_eq!(core.record(a).state, ThreadState::Blocked);
        assert_eq!(core.list(ListKind::Blocked).len(), 1);

        terminate(&mut core, b, 7);
        let step = core.dispatch(Timestamp::ZERO);

        assert!(step.reclaimed.is_some());
        assert_eq!(core.record(a).join_recv, Some(7));
        assert!(core.list(ListKind::Blocked).is_empty());
        assert!(core.list(ListKind::Zombie).is_empty());
    }

    #[test]
    fn only_the_first_joiner_reclaims() {
        let mut core = core();
        let a = spawn(&mut core);
        let c = spawn(&mut core);
        let b = spawn(&mut core);
        let b_id = core.record(b).id;

        block_on(&mut core, a, b_id);
        core.dispatch(Timestamp::ZERO);
        block_on(&mut core, c, b_id);
        core.dispatch(Timestamp::ZERO);

        terminate(&mut core, b, 9);
        core.dispatch(Timestamp::ZERO);

        assert_eq!(core.record(a).join_recv, Some(9));
        assert_eq!(core.record(a).error, None);
        assert_eq!(core.record(c).join_recv, None);
        assert_eq!(core.record(c).error, Some(Error::SpuriousWake(b_id)));
        assert_eq!(core.record(c).joined_target, None);
    }

    #[test]
    fn vanished_target_wakes_joiner_with_error() {
        let mut core = core();
        let a = spawn(&mut core);
        let b = spawn(&mut core);
        let b_id = core.record(b).id;

        // The target leaves every list without passing through ZOMBIE
        // before the joiner's blocking step is reconciled
        block_on(&mut core, a, b_id);
        core.evict(b_id);
        let step = core.dispatch(Timestamp::ZERO);

        assert!(step.reclaimed.is_none());
        assert!(core.list(ListKind::Blocked).is_empty());
        assert_eq!(step.next, Some(a));
        let record = core.record(a);
        assert_eq!(record.state, ThreadState::Running);
        assert_eq!(record.error, Some(Error::SpuriousWake(b_id)));
        assert_eq!(record.joined_target, None);
    }

    #[test]
    fn join_on_unknown_target_is_spurious() {
        let mut core = core();
        let a = spawn(&mut core);

        block_on(&mut core, a, ThreadId(77));
        core.dispatch(Timestamp::ZERO);

        assert_eq!(core.record(a).error, Some(Error::SpuriousWake(ThreadId(77))));
        assert_eq!(core.current(), Some(a));
    }

    #[test]
    fn yield_to_runnable_target_bypasses_rotation() {
        let mut core = core();
        let a = spawn(&mut core);
        let _b = spawn(&mut core);
        let c = spawn(&mut core);

        run_until(&mut core, a);
        core.record_mut(a).yield_target = Some(core.record(c).id);
        let step = core.dispatch(Timestamp::ZERO);
        assert_eq!(step.next, Some(c));
    }

    #[test]
    fn yield_to_skips_the_policy() {
        let calls = Rc::new(Cell::new(0));
        let mut core = SchedulerCore::new(Box::new(CountingPolicy(calls.clone())), 1);
        let a = spawn(&mut core);
        let b = spawn(&mut core);

        run_until(&mut core, a);
        let before = calls.get();
        core.record_mut(a).yield_target = Some(core.record(b).id);
        let step = core.dispatch(Timestamp::ZERO);

        assert_eq!(step.next, Some(b));
        assert_eq!(calls.get(), before);

        core.dispatch(Timestamp::ZERO);
        assert_eq!(calls.get(), before + 1);
    }

    #[test]
    fn yield_to_keeps_mlfq_priority() {
        // Zero-length slices: any evaluation by the policy would demote
        let mlfq = MlfqConfig::with_levels(4, Duration::ZERO);
        let mut core = SchedulerCore::new(Box::new(MlfqPolicy::new(mlfq)), 4);
        let top = Priority::top(4);
        let spawn_top = |core: &mut SchedulerCore| {
            let id = core.next_id();
            let handle = core.insert(ThreadRecord::new(id, top));
            core.add_to_scheduler(handle, ThreadState::Runnable);
            handle
        };
        let a = spawn_top(&mut core);
        let b = spawn_top(&mut core);

        assert_eq!(core.dispatch(Timestamp::ZERO).next, Some(a));
        core.finish_slice(Timestamp::ZERO);
        core.record_mut(a).yield_target = Some(core.record(b).id);
        let step = core.dispatch(Timestamp::ZERO);

        assert_eq!(step.next, Some(b));
        assert_eq!(core.record(a).priority, top);
        assert_eq!(core.record(a).state, ThreadState::Runnable);
    }

    #[test]
    fn yield_to_unknown_target_flags_error_and_still_switches() {
        let mut core = core();
        let a = spawn(&mut core);
        let b = spawn(&mut core);

        run_until(&mut core, a);
        core.record_mut(a).yield_target = Some(ThreadId(99));
        let step = core.dispatch(Timestamp::ZERO);

        assert_eq!(step.next, Some(b));
        assert_eq!(core.record(a).error, Some(Error::InvalidTarget(ThreadId(99))));
    }

    #[test]
    fn loop_ends_when_everything_is_blocked() {
        let mut core = core();
        let a = spawn(&mut core);
        let b = spawn(&mut core);
        let (a_id, b_id) = (core.record(a).id, core.record(b).id);

        block_on(&mut core, a, b_id);
        core.dispatch(Timestamp::ZERO);
        block_on(&mut core, b, a_id);
        let step = core.dispatch(Timestamp::ZERO);

        assert_eq!(step.next, None);
        assert_eq!(core.current(), None);
        assert_eq!(core.list(ListKind::Blocked).len(), 2);
        core.park();
        assert_eq!(core.current(), Some(core.system()));
    }

    #[test]
    fn finish_slice_accounts_time() {
        let mut core = core();
        let a = spawn(&mut core);
        core.dispatch(Timestamp::from_micros(100));
        core.finish_slice(Timestamp::from_micros(350));
        assert_eq!(core.record(a).last_slice(), core::time::Duration::from_micros(250));
        assert_eq!(core.record(a).total_time, core::time::Duration::from_micros(250));
    }

    #[test]
    #[should_panic(expected = "system thread")]
    fn scheduling_the_system_record_is_fatal() {
        let mut core = core();
        let system = core.system();
        core.add_to_scheduler(system, ThreadState::Runnable);
    }

    #[test]
    #[should_panic(expected = "null current")]
    fn dispatch_without_current_is_fatal() {
        let mut core = core();
        spawn(&mut core);
        core.current = None;
        core.dispatch(Timestamp::ZERO);
    }

    #[test]
    #[should_panic(expected = "invalid state")]
    fn reconciling_a_runnable_record_is_fatal() {
        let mut core = core();
        let a = spawn(&mut core);
        core.handle_non_runnable(a);
    }
}
