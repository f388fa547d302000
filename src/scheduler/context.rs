/*
 * Scheduler Context - Policy View of Scheduler State
 *
 * SchedContext is the bridge between scheduling policies and the core's
 * state. A policy sees the runnable list and the arena its records live
 * in, plus the number of configured priority levels. The blocked and
 * zombie lists, the current record and the system record stay out of
 * reach.
 */

use super::{
    thread::{ThreadFlags, ThreadRecord},
    thread_list::{Handle, ThreadArena, ThreadList},
    types::Priority,
};

/// Scheduling context for policy access
///
/// The 'a lifetime ties the context to the borrow of the core it was
/// split from, so a policy can never keep hold of scheduler state.
pub struct SchedContext<'a> {
    arena: &'a mut ThreadArena,
    runnable: &'a mut ThreadList,
    levels: usize,
}

impl<'a> SchedContext<'a> {
    pub fn new(arena: &'a mut ThreadArena, runnable: &'a mut ThreadList, levels: usize) -> Self {
        Self {
            arena,
            runnable,
            levels,
        }
    }

    /// Top priority level for the configured number of levels
    pub fn top_priority(&self) -> Priority {
        Priority::top(self.levels)
    }

    pub fn record(&self, handle: Handle) -> &ThreadRecord {
        &self.arena[handle]
    }

    pub fn record_mut(&mut self, handle: Handle) -> &mut ThreadRecord {
        &mut self.arena[handle]
    }

    /// Number of records in the runnable list
    pub fn runnable_len(&self) -> usize {
        self.runnable.len()
    }

    /// Move the runnable head to the tail and return it
    pub fn rotate(&mut self) -> Option<Handle> {
        self.runnable.rotate(self.arena)
    }

    pub fn min_total_time(&self) -> Option<Handle> {
        self.runnable.min_total_time(self.arena)
    }

    /// Boost undispatched runnable records to the top level
    ///
    /// Opens a new epoch for every record, including those blocked or
    /// terminated while the boost happens.
    pub fn boost_priority(&mut self) -> usize {
        let top = self.top_priority();
        let boosted = self.runnable.boost_priority(self.arena, top);
        for (_, record) in self.arena.iter_mut() {
            record.flags.remove(ThreadFlags::SCHEDULED);
        }
        boosted
    }

    pub fn select_highest_priority(&self) -> Option<Handle> {
        self.runnable
            .select_highest_priority(self.arena, self.top_priority())
    }
}

impl core::fmt::Debug for SchedContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedContext")
            .field("runnable", &self.runnable.len())
            .field("thread_count", &self.arena.len())
            .field("levels", &self.levels)
            .finish()
    }
}
