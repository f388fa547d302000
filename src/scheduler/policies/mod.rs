/*
 * Scheduling Policies Module
 *
 * This module contains the scheduling policy implementations. Each policy
 * implements the SchedPolicy trait and is plugged into the SchedulerCore
 * when the runtime is constructed.
 *
 * Available policies:
 * - RoundRobinPolicy: oldest-arrival-first cycling through RUNNABLE
 * - ShortestTimePolicy: least accumulated running time first
 * - MlfqPolicy: multi-level feedback queue with demotion and boosting
 */

pub mod mlfq;
pub mod round_robin;
pub mod shortest_time;

use alloc::boxed::Box;

pub use mlfq::MlfqPolicy;
pub use round_robin::RoundRobinPolicy;
pub use shortest_time::ShortestTimePolicy;

use super::traits::SchedPolicy;
use crate::config::{PolicyKind, RuntimeConfig};

/// Build the policy selected by `config`
pub fn from_config(config: &RuntimeConfig) -> Box<dyn SchedPolicy> {
    match config.policy {
        PolicyKind::RoundRobin => Box::new(RoundRobinPolicy::new()),
        PolicyKind::ShortestTime => Box::new(ShortestTimePolicy::new()),
        PolicyKind::Mlfq => Box::new(MlfqPolicy::new(config.mlfq.clone())),
    }
}
