/*
 * Thread Records
 *
 * This module defines the ThreadRecord structure and the types it is made
 * of: identifiers, lifecycle states, scheduling flags and the owned stack
 * region. One record exists per logical thread, plus the distinguished
 * system record that represents the dispatch loop's own context.
 */

use alloc::boxed::Box;
use core::fmt;
use core::ptr::NonNull;
use core::time::Duration;

use bitflags::bitflags;

use super::{
    Runtime,
    thread_list::Handle,
    types::{Priority, Timestamp},
};
use crate::arch::ExecContext;
use crate::error::Error;

/// Thread identifier
///
/// Identifiers are assigned from 0 upwards and never reused within one
/// runtime. `-1` is reserved for the system record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub i64);

impl ThreadId {
    /// Identifier of the system record
    pub const SYSTEM: ThreadId = ThreadId(-1);

    pub fn is_system(self) -> bool {
        self == Self::SYSTEM
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// Thread state
///
/// ```text
/// RUNNABLE -> RUNNING -> RUNNABLE        (yield, MLFQ demotion)
///                     -> BLOCKED         (join on a live target)
///                     -> ZOMBIE          (entry routine returned)
/// BLOCKED  -> RUNNABLE                   (target reclaimed, or vanished)
/// ZOMBIE   -> DEAD                       (joiner consumed the value)
/// ```
///
/// DEAD is never stored: a dead record is removed from the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    Runnable,
    Running,
    Blocked,
    Zombie,
    Dead,
    System,
}

bitflags! {
    /// Per-record scheduling flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u8 {
        /// Dispatched at least once during the current boost epoch
        const SCHEDULED = 1 << 0;
        /// First dispatch already happened
        const STARTED = 1 << 1;
    }
}

/// Entry routine of a logical thread
pub type ThreadEntry = Box<dyn FnOnce(&Runtime) -> usize>;

/// Stack memory owned by a record, obtained from the region allocator
#[derive(Debug, PartialEq, Eq)]
pub struct StackRegion {
    base: NonNull<u8>,
    size: usize,
}

impl StackRegion {
    /// # Safety
    /// `base` must point to `size` writable bytes that stay valid until the
    /// region is handed back to the allocator.
    pub unsafe fn new(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest usable address
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.size
    }
}

/// Thread structure
///
/// The record carries everything the core and the policies need: the
/// saved execution context, MLFQ metadata, join/exit linkage and the
/// `prev`/`next` handles of whichever list currently owns it.
///
/// Linkage invariant: `prev` and `next` are both `None` and `listed` is
/// false whenever the record is not in a list. The list checks this on
/// every insert.
pub struct ThreadRecord {
    pub id: ThreadId,
    pub state: ThreadState,

    // Execution context
    pub stack: Option<StackRegion>,
    pub context: ExecContext,
    pub entry: Option<ThreadEntry>,

    // Scheduling metadata
    pub priority: Priority,
    pub total_time: Duration,
    pub flags: ThreadFlags,
    pub slice_start: Timestamp,
    pub slice_end: Timestamp,

    // Join/exit linkage
    pub yield_target: Option<ThreadId>,
    pub joined_target: Option<ThreadId>,
    pub join_recv: Option<usize>,
    pub retval: Option<usize>,
    pub error: Option<Error>,

    // List linkage
    pub(crate) prev: Option<Handle>,
    pub(crate) next: Option<Handle>,
    pub(crate) listed: bool,
}

impl ThreadRecord {
    /// A fresh RUNNABLE record at `priority`
    pub fn new(id: ThreadId, priority: Priority) -> Self {
        Self {
            id,
            state: ThreadState::Runnable,
            stack: None,
            context: ExecContext::default(),
            entry: None,
            priority,
            total_time: Duration::ZERO,
            flags: ThreadFlags::empty(),
            slice_start: Timestamp::ZERO,
            slice_end: Timestamp::ZERO,
            yield_target: None,
            joined_target: None,
            join_recv: None,
            retval: None,
            error: None,
            prev: None,
            next: None,
            listed: false,
        }
    }

    /// The system record: no stack, no entry, never listed
    pub fn system() -> Self {
        Self {
            state: ThreadState::System,
            ..Self::new(ThreadId::SYSTEM, Priority::LOWEST)
        }
    }

    /// Whether the record is linked into some list
    pub fn is_linked(&self) -> bool {
        self.listed || self.prev.is_some() || self.next.is_some()
    }

    /// Length of the last completed run slice
    pub fn last_slice(&self) -> Duration {
        self.slice_end.saturating_since(self.slice_start)
    }

    /// Close the current run slice at `now` and account it
    pub fn close_slice(&mut self, now: Timestamp) {
        self.slice_end = now;
        self.total_time = self.total_time.saturating_add(self.last_slice());
    }
}

impl fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("total_time", &self.total_time)
            .field("flags", &self.flags)
            .field("joined_target", &self.joined_target)
            .field("stack_size", &self.stack.as_ref().map(StackRegion::size))
            .finish()
    }
}
