/*
 * Scheduler Trait Definitions
 *
 * This module defines the trait that separates scheduling policy from
 * mechanism:
 *
 * - SchedPolicy: the selection interface that different algorithms implement
 * - SchedContext (context.rs): the view of scheduler state a policy receives
 *
 * This separation allows:
 * 1. Swapping scheduling algorithms without changing the dispatch loop
 * 2. Testing policies in isolation on hand-built thread lists
 * 3. Clear ownership boundaries (policies never touch other state lists)
 */

use super::{context::SchedContext, thread_list::Handle};

/// Scheduling policy trait
///
/// Round robin, shortest accumulated time and MLFQ implement this trait.
/// The SchedulerCore (mechanism) holds a `Box<dyn SchedPolicy>` chosen at
/// construction time and consults it once per dispatch step, except on
/// steps where a yield target was already resolved: those switch straight
/// to the target and the policy is not invoked at all.
pub trait SchedPolicy {
    /// Choose the next RUNNABLE record
    ///
    /// # Arguments
    /// - `ctx`: the runnable list and the records it links
    /// - `prev`: the record that ran last, when it is still runnable
    /// - `forced`: a record the caller already chose. SchedulerCore resolves
    ///   yield targets itself and always passes `None` here
    ///
    /// # Returns
    /// The record to run next, or `None` when nothing is runnable.
    fn pick_next(
        &mut self,
        ctx: &mut SchedContext<'_>,
        prev: Option<Handle>,
        forced: Option<Handle>,
    ) -> Option<Handle>;

    /// Get the policy name for debugging
    fn name(&self) -> &'static str;
}
