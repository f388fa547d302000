/*
 * Cooperative Scheduler Runtime
 *
 * This module implements the lifecycle API of the corun runtime: logical
 * threads that share one OS thread and switch only when they choose to.
 *
 * COOPERATIVE SCHEDULING EXPLAINED:
 * =================================
 *
 * There is no timer. A thread keeps the CPU until it yields, joins another
 * thread or returns from its entry routine. Every one of those goes back
 * to the system context, which runs the dispatch loop in Runtime::run and
 * picks the next thread with the active policy. A thread that never yields
 * starves the others; that is the contract, not a bug.
 *
 * THREAD LIFECYCLE:
 * ================
 *
 *   create -> RUNNABLE -> RUNNING -> RUNNABLE       (yield)
 *                                 -> BLOCKED        (join on a live thread)
 *                                 -> ZOMBIE         (entry returned / exit)
 *             BLOCKED  -> RUNNABLE                  (target joined or gone)
 *             ZOMBIE   -> DEAD                      (a joiner took the value)
 *
 * CONTEXT SWITCHING:
 * ==================
 *
 * Threads never switch to each other directly:
 * 1. The running thread records why it stops (state, yield target)
 * 2. It switches into the system context
 * 3. The dispatch loop retires it, reconciles joins, asks the policy
 * 4. The loop switches into the chosen thread
 *
 * The scheduler state lives in a RefCell. Every borrow is released before
 * a switch, because the other side of the switch borrows it again.
 *
 * Key features:
 * - Pluggable policies (round robin, shortest time, MLFQ)
 * - Join with value delivery and zombie reclamation
 * - Targeted yields
 * - Stacks from a pluggable region allocator
 * - Explicitly owned runtime: no global state, several runtimes can coexist
 */

use alloc::boxed::Box;
use core::cell::{Cell, RefCell};
use core::marker::PhantomPinned;
use core::pin::Pin;

pub mod context;
pub mod policies;
pub mod sched_core;
pub mod thread;
pub mod thread_list;
pub mod traits;
pub mod types;

pub use context::SchedContext;
pub use sched_core::SchedulerCore;
pub use thread::{ThreadFlags, ThreadId, ThreadRecord, ThreadState};
pub use traits::SchedPolicy;
pub use types::{ListKind, Priority, SchedStats};

use crate::arch::{self, ExecContext};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::memory::{RegionAllocator, SystemAllocator};
use thread::StackRegion;
use thread_list::{Handle, contract_violation};
use types::Clock;

/// Identifier of the system context
pub const SYSTEM_THREAD_ID: ThreadId = ThreadId::SYSTEM;

/// What was left when the dispatch loop ran out of runnable threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Switches into threads performed during this run
    pub switches: u64,

    /// Threads still blocked in join (a deadlock if non-zero)
    pub blocked: usize,

    /// Terminated threads nobody joined
    pub zombies: usize,
}

/// A cooperative multithreading runtime
///
/// Always handled through `Pin<Box<Runtime>>`: every thread's first frame
/// carries the runtime's address, so it must never move.
pub struct Runtime {
    core: RefCell<SchedulerCore>,
    allocator: RefCell<Box<dyn RegionAllocator>>,
    config: RuntimeConfig,
    clock: Clock,

    /// Set while the dispatch loop is active
    running: Cell<bool>,

    _pin: PhantomPinned,
}

impl Runtime {
    /// Build a runtime whose stacks come from the process allocator
    pub fn new(config: RuntimeConfig) -> Result<Pin<Box<Runtime>>> {
        Self::with_allocator(config, Box::new(SystemAllocator::new()))
    }

    /// Build a runtime over the given region allocator
    ///
    /// The allocator is initialized here and torn down when the runtime is
    /// dropped.
    pub fn with_allocator(
        config: RuntimeConfig,
        mut allocator: Box<dyn RegionAllocator>,
    ) -> Result<Pin<Box<Runtime>>> {
        allocator.init()?;

        let policy = policies::from_config(&config);
        let core = SchedulerCore::new(policy, config.priority_levels());

        log::info!(
            "Runtime initialized: policy {}, {} KiB stacks from the {} allocator",
            config.policy,
            config.stack_size / 1024,
            allocator.name()
        );

        Ok(Box::pin(Runtime {
            core: RefCell::new(core),
            allocator: RefCell::new(allocator),
            config,
            clock: Clock::new(),
            running: Cell::new(false),
            _pin: PhantomPinned,
        }))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn policy_name(&self) -> &'static str {
        self.core.borrow().policy_name()
    }

    pub fn stats(&self) -> SchedStats {
        self.core.borrow().stats()
    }

    /// Identifier of the running thread, or [`SYSTEM_THREAD_ID`] outside
    /// of any thread
    pub fn current(&self) -> ThreadId {
        let core = self.core.borrow();
        core.current_thread()
            .map_or(SYSTEM_THREAD_ID, |h| core.record(h).id)
    }

    /// State of a tracked thread; `None` once it has been reclaimed
    pub fn state_of(&self, id: ThreadId) -> Option<ThreadState> {
        if id.is_system() {
            return Some(ThreadState::System);
        }
        let core = self.core.borrow();
        core.find(id).map(|(_, h)| core.record(h).state)
    }

    /// Create a thread running `entry(runtime, arg)`
    pub fn create(&self, entry: fn(&Runtime, usize) -> usize, arg: usize) -> Result<ThreadId> {
        self.spawn(move |rt| entry(rt, arg))
    }

    /// Create a thread running the closure `f`
    ///
    /// The thread starts RUNNABLE at the top priority level. Fails only
    /// when the allocator cannot provide a stack.
    pub fn spawn<F>(&self, f: F) -> Result<ThreadId>
    where
        F: FnOnce(&Runtime) -> usize + 'static,
    {
        let size = self.config.stack_size;
        let base = self.allocator.borrow_mut().allocate(size).ok_or_else(|| {
            log::warn!("No stack available for a new thread ({} bytes)", size);
            Error::OutOfMemory { requested: size }
        })?;

        // SAFETY: the allocator handed out `size` bytes that stay ours until
        // the region is released
        let stack = unsafe { StackRegion::new(base, size) };
        let runtime = self as *const Runtime as usize;
        // SAFETY: the whole region belongs to this thread
        let context = unsafe { ExecContext::prime(stack.top(), thread_start, runtime) };

        let mut core = self.core.borrow_mut();
        let id = core.next_id();
        let mut record = ThreadRecord::new(id, Priority::top(core.levels()));
        record.stack = Some(stack);
        record.context = context;
        record.entry = Some(Box::new(f));

        let handle = core.insert(record);
        core.add_to_scheduler(handle, ThreadState::Runnable);

        log::info!("Created {} ({} KiB stack)", id, size / 1024);
        Ok(id)
    }

    /// Give up the CPU; the policy picks who runs next
    pub fn yield_now(&self) -> Result<()> {
        self.suspend(|record| record.yield_target = None)?;
        Ok(())
    }

    /// Give up the CPU to `target`
    ///
    /// When `target` is not runnable the policy picks instead, and the call
    /// reports `InvalidTarget` once the caller runs again.
    pub fn yield_to(&self, target: ThreadId) -> Result<()> {
        let handle = self.suspend(|record| record.yield_target = Some(target))?;
        match self.core.borrow_mut().record_mut(handle).error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait for `target` to terminate and take its return value
    ///
    /// Only one joiner gets the value; the record is gone afterwards, so a
    /// later join on the same identifier fails with `InvalidTarget`.
    pub fn join(&self, target: ThreadId) -> Result<usize> {
        {
            let core = self.core.borrow();
            let me = core.current_thread().ok_or(Error::NotInThread)?;
            if core.record(me).id == target || core.find(target).is_none() {
                log::warn!("{} cannot join {}", core.record(me).id, target);
                return Err(Error::InvalidTarget(target));
            }
        }

        let handle = self.suspend(|record| {
            record.state = ThreadState::Blocked;
            record.joined_target = Some(target);
            record.yield_target = Some(target);
            record.join_recv = None;
        })?;

        let mut core = self.core.borrow_mut();
        let record = core.record_mut(handle);
        record.joined_target = None;
        if let Some(err) = record.error.take() {
            log::warn!("{} join on {} failed: {}", record.id, target, err);
            return Err(err);
        }
        record.join_recv.take().ok_or(Error::SpuriousWake(target))
    }

    /// Terminate the calling thread with `value`
    ///
    /// Same as returning `value` from the entry routine. Values still alive
    /// in the calling frames are not dropped.
    ///
    /// # Panics
    /// Panics when called outside a logical thread.
    pub fn exit(&self, value: usize) -> ! {
        self.terminate(value)
    }

    /// Drive the dispatch loop until no thread is runnable
    ///
    /// Must be called from outside any logical thread.
    pub fn run(&self) -> Result<RunSummary> {
        if self.running.replace(true) {
            return Err(Error::AlreadyRunning);
        }
        let switches_before = self.stats().switches;
        log::info!("Dispatch loop started ({})", self.policy_name());

        loop {
            let step = {
                let mut core = self.core.borrow_mut();
                if core.list(ListKind::Runnable).is_empty() {
                    break;
                }
                core.dispatch(self.clock.now())
            };

            if let Some(dead) = step.reclaimed {
                self.release_stack(dead.stack);
            }
            let Some(next) = step.next else {
                break;
            };

            let (save, load) = {
                let mut core = self.core.borrow_mut();
                let system = core.system();
                core.context_pair(system, next)
            };
            // SAFETY: `next` was primed by spawn or suspended by a previous
            // switch, and no borrow of the core is held across the call
            unsafe { arch::switch(save, load) };

            self.core.borrow_mut().finish_slice(self.clock.now());
        }

        let summary = {
            let mut core = self.core.borrow_mut();
            core.park();
            RunSummary {
                switches: core.stats().switches - switches_before,
                blocked: core.list(ListKind::Blocked).len(),
                zombies: core.list(ListKind::Zombie).len(),
            }
        };
        self.running.set(false);

        if summary.blocked > 0 {
            log::warn!("Dispatch loop ended with {} blocked thread(s)", summary.blocked);
        }
        log::info!(
            "Dispatch loop finished after {} switches",
            summary.switches
        );
        Ok(summary)
    }

    /// Prepare the current thread with `prepare` and switch to the system
    /// context; returns once the dispatch loop resumes the thread
    fn suspend(&self, prepare: impl FnOnce(&mut ThreadRecord)) -> Result<Handle> {
        let (handle, save, load) = {
            let mut core = self.core.borrow_mut();
            let handle = core.current_thread().ok_or(Error::NotInThread)?;
            prepare(core.record_mut(handle));
            let system = core.system();
            let (save, load) = core.context_pair(handle, system);
            (handle, save, load)
        };
        // SAFETY: the system context is suspended inside run(), and the
        // borrow above has been released
        unsafe { arch::switch(save, load) };
        Ok(handle)
    }

    fn terminate(&self, value: usize) -> ! {
        let (save, load) = {
            let mut core = self.core.borrow_mut();
            let handle = core
                .current_thread()
                .unwrap_or_else(|| contract_violation("exit called outside a logical thread"));
            let record = core.record_mut(handle);
            record.retval = Some(value);
            record.state = ThreadState::Zombie;
            record.yield_target = None;
            log::debug!("{} finished with {}", record.id, value);
            let system = core.system();
            core.context_pair(handle, system)
        };
        // SAFETY: as in suspend
        unsafe { arch::switch(save, load) };

        log::error!("a terminated thread was resumed");
        std::process::abort()
    }

    /// Take the entry routine of the thread that is starting
    fn take_entry(&self) -> thread::ThreadEntry {
        let mut core = self.core.borrow_mut();
        let handle = core
            .current_thread()
            .unwrap_or_else(|| contract_violation("thread started outside the dispatch loop"));
        core.record_mut(handle)
            .entry
            .take()
            .unwrap_or_else(|| contract_violation("thread started twice"))
    }

    fn release_stack(&self, stack: Option<StackRegion>) {
        if let Some(stack) = stack {
            if let Err(err) = self.allocator.borrow_mut().release(stack.base().as_ptr()) {
                log::error!("Stack release failed: {}", err);
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let stacks = self.core.get_mut().take_stacks();
        let allocator = self.allocator.get_mut();
        for stack in stacks {
            if let Err(err) = allocator.release(stack.base().as_ptr()) {
                log::error!("Stack release failed: {}", err);
            }
        }
        allocator.deinit();
        log::debug!("Runtime torn down");
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("config", &self.config)
            .field("running", &self.running.get())
            .finish()
    }
}

/// First Rust code a new thread runs, reached through the trampoline
extern "C" fn thread_start(runtime: usize) -> ! {
    // SAFETY: spawn seeded this with the address of the pinned runtime,
    // which outlives every thread it dispatches
    let runtime = unsafe { &*(runtime as *const Runtime) };
    let entry = runtime.take_entry();
    let value = entry(runtime);
    runtime.terminate(value)
}
