/*
 * Multi-Level Feedback Queue Policy
 *
 * Records carry a priority level; the policy always runs the first record
 * at the highest level present. On every invocation:
 *
 * 1. BOOST: when the tick counter wraps to zero, every runnable record that
 *    was not dispatched during the closing epoch goes back to the top level
 *    with its accumulated time cleared.
 * 2. DEMOTE: the record that ran last drops one level (never below the
 *    lowest) if its last slice used the whole allowance of its level, or
 *    its time at the level reached the threshold.
 * 3. SELECT: first record at the highest level, stopping early at the top.
 *
 * A strictly higher-priority runnable record is therefore never skipped in
 * favour of a lower one.
 */

use crate::config::MlfqConfig;
use crate::scheduler::{
    context::SchedContext,
    thread::ThreadFlags,
    thread_list::Handle,
    traits::SchedPolicy,
    types::Priority,
};
use core::time::Duration;

/// Multi-level feedback queue policy
#[derive(Debug)]
pub struct MlfqPolicy {
    config: MlfqConfig,

    /// Invocations since the last boost, modulo the boost period
    ticks: u32,

    /// Number of boosts performed so far
    boosts: u64,
}

impl MlfqPolicy {
    pub fn new(config: MlfqConfig) -> Self {
        Self {
            config,
            ticks: 0,
            boosts: 0,
        }
    }

    pub fn boosts(&self) -> u64 {
        self.boosts
    }

    fn advance_tick(&mut self, ctx: &mut SchedContext<'_>) {
        if self.ticks == 0 {
            let raised = ctx.boost_priority();
            self.boosts += 1;
            log::trace!("[MLFQ] boost #{}: {} thread(s) raised", self.boosts, raised);
        }
        self.ticks = (self.ticks + 1) % self.config.boost_period();
    }

    /// Demote `prev` by one level if it used up its allowance
    fn evaluate(&self, ctx: &mut SchedContext<'_>, prev: Handle) {
        let record = ctx.record_mut(prev);
        if record.priority == Priority::LOWEST {
            return;
        }

        let allowed = self.config.slice_for(record.priority);
        let used_full_slice = record.last_slice() >= allowed;
        let over_threshold = record.total_time >= self.config.level_threshold();

        if used_full_slice || over_threshold {
            let from = record.priority;
            record.priority = from.lowered();
            record.flags.remove(ThreadFlags::SCHEDULED);
            record.total_time = Duration::ZERO;
            log::debug!(
                "[MLFQ] {} demoted {} -> {}",
                record.id,
                from,
                record.priority
            );
        }
    }
}

impl SchedPolicy for MlfqPolicy {
    fn pick_next(
        &mut self,
        ctx: &mut SchedContext<'_>,
        prev: Option<Handle>,
        _forced: Option<Handle>,
    ) -> Option<Handle> {
        self.advance_tick(ctx);

        if let Some(prev) = prev {
            self.evaluate(ctx, prev);
        }
        ctx.select_highest_priority()
    }

    fn name(&self) -> &'static str {
        "MLFQ"
    }
}
