/*
 * Shortest Accumulated Time Policy
 *
 * Picks the runnable record that has consumed the least running time so
 * far. Equal times resolve to the record scanned last (the tail end).
 */

use crate::scheduler::{
    context::SchedContext,
    thread_list::Handle,
    traits::SchedPolicy,
};

#[derive(Debug, Default)]
pub struct ShortestTimePolicy;

impl ShortestTimePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl SchedPolicy for ShortestTimePolicy {
    fn pick_next(
        &mut self,
        ctx: &mut SchedContext<'_>,
        _prev: Option<Handle>,
        forced: Option<Handle>,
    ) -> Option<Handle> {
        if forced.is_some() {
            return forced;
        }
        ctx.min_total_time()
    }

    fn name(&self) -> &'static str {
        "Shortest-Time"
    }
}
