/*
 * Round-Robin Scheduling Policy
 *
 * Rotates through the runnable list: the head is moved to the tail and
 * returned. Since running records stay in the runnable list, N consecutive
 * selections over N records visit each exactly once, in arrival order.
 */

use crate::scheduler::{
    context::SchedContext,
    thread_list::Handle,
    traits::SchedPolicy,
};

/// Round-Robin scheduling policy
#[derive(Debug, Default)]
pub struct RoundRobinPolicy;

impl RoundRobinPolicy {
    /// Create a new Round-Robin policy
    pub fn new() -> Self {
        Self
    }
}

impl SchedPolicy for RoundRobinPolicy {
    fn pick_next(
        &mut self,
        ctx: &mut SchedContext<'_>,
        _prev: Option<Handle>,
        forced: Option<Handle>,
    ) -> Option<Handle> {
        if forced.is_some() {
            return forced;
        }
        ctx.rotate()
    }

    fn name(&self) -> &'static str {
        "Round-Robin"
    }
}
