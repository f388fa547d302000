/*
 * Runtime Configuration
 *
 * Stack sizing, policy selection and MLFQ tuning. Everything has a sane
 * default; `RuntimeConfig::default()` gives 64 KiB stacks and round robin.
 */

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use heapless::Vec;

use crate::scheduler::types::{MAX_PRIORITY_LEVELS, Priority};

/// Default thread stack size (64 KiB per thread)
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Smallest stack a thread may be given
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Which scheduling policy the runtime installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    #[default]
    RoundRobin,
    ShortestTime,
    Mlfq,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::RoundRobin => "round-robin",
            PolicyKind::ShortestTime => "shortest-time",
            PolicyKind::Mlfq => "mlfq",
        };
        f.write_str(name)
    }
}

/// Error returned when a policy name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scheduling policy: {0}")]
pub struct UnknownPolicy(pub alloc::string::String);

impl FromStr for PolicyKind {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rr" | "round-robin" | "roundrobin" => Ok(PolicyKind::RoundRobin),
            "stcf" | "shortest-time" | "shortest" => Ok(PolicyKind::ShortestTime),
            "mlfq" => Ok(PolicyKind::Mlfq),
            _ => Err(UnknownPolicy(s.into())),
        }
    }
}

/// Multi-level feedback queue tuning
///
/// `slices[level]` is the run slice allowed at that level; level 0 is the
/// lowest priority. A thread that uses its whole slice, or whose time at
/// its level reaches `level_threshold`, drops one level. Every
/// `boost_period` policy invocations, undispatched threads return to the
/// top level.
///
/// Fields are only reachable through the builders, which keep at least one
/// level and a non-zero boost period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlfqConfig {
    slices: Vec<Duration, MAX_PRIORITY_LEVELS>,
    level_threshold: Duration,
    boost_period: u32,
}

impl MlfqConfig {
    /// Levels doubling from `top_slice` at the top down to the lowest level
    pub fn with_levels(levels: usize, top_slice: Duration) -> Self {
        let levels = levels.clamp(1, MAX_PRIORITY_LEVELS);
        let mut slices = Vec::new();
        for level in 0..levels {
            let shift = (levels - 1 - level) as u32;
            // Bounded by MAX_PRIORITY_LEVELS, cannot overflow the vec
            let _ = slices.push(top_slice * (1 << shift));
        }
        Self {
            slices,
            ..Self::default()
        }
    }

    pub fn levels(&self) -> usize {
        self.slices.len()
    }

    pub fn slices(&self) -> &[Duration] {
        &self.slices
    }

    pub fn level_threshold(&self) -> Duration {
        self.level_threshold
    }

    pub fn boost_period(&self) -> u32 {
        self.boost_period
    }

    pub fn top_priority(&self) -> Priority {
        Priority::top(self.levels())
    }

    /// Slice allowed at `priority`, clamped to the configured levels
    pub fn slice_for(&self, priority: Priority) -> Duration {
        let index = priority.as_usize().min(self.levels() - 1);
        self.slices[index]
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.level_threshold = threshold;
        self
    }

    pub fn with_boost_period(mut self, period: u32) -> Self {
        self.boost_period = period.max(1);
        self
    }
}

impl Default for MlfqConfig {
    fn default() -> Self {
        let mut slices = Vec::new();
        for ms in [8u64, 4, 2, 1] {
            let _ = slices.push(Duration::from_millis(ms));
        }
        Self {
            slices,
            level_threshold: Duration::from_millis(20),
            boost_period: 64,
        }
    }
}

/// Runtime construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub stack_size: usize,
    pub policy: PolicyKind,
    pub mlfq: MlfqConfig,
}

impl RuntimeConfig {
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    /// Stack size for new threads, raised to [`MIN_STACK_SIZE`] if smaller
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size.max(MIN_STACK_SIZE);
        self
    }

    pub fn with_mlfq(mut self, mlfq: MlfqConfig) -> Self {
        self.mlfq = mlfq;
        self
    }

    /// Number of priority levels records are spread over
    pub fn priority_levels(&self) -> usize {
        match self.policy {
            PolicyKind::Mlfq => self.mlfq.levels(),
            _ => 1,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            policy: PolicyKind::default(),
            mlfq: MlfqConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_names_parse() {
        assert_eq!("rr".parse::<PolicyKind>(), Ok(PolicyKind::RoundRobin));
        assert_eq!(" MLFQ ".parse::<PolicyKind>(), Ok(PolicyKind::Mlfq));
        assert_eq!("stcf".parse::<PolicyKind>(), Ok(PolicyKind::ShortestTime));
        assert!("fifo".parse::<PolicyKind>().is_err());
        assert_eq!(PolicyKind::ShortestTime.to_string(), "shortest-time");
    }

    #[test]
    fn mlfq_levels_double_towards_the_bottom() {
        let cfg = MlfqConfig::with_levels(3, Duration::from_millis(2));
        assert_eq!(cfg.levels(), 3);
        assert_eq!(cfg.top_priority(), Priority(2));
        assert_eq!(cfg.slice_for(Priority(2)), Duration::from_millis(2));
        assert_eq!(cfg.slice_for(Priority(1)), Duration::from_millis(4));
        assert_eq!(cfg.slice_for(Priority(0)), Duration::from_millis(8));
        assert_eq!(cfg.slice_for(Priority(7)), Duration::from_millis(2));
    }

    #[test]
    fn mlfq_always_keeps_a_level() {
        let cfg = MlfqConfig::with_levels(0, Duration::from_millis(1));
        assert_eq!(cfg.levels(), 1);
        assert_eq!(cfg.top_priority(), Priority::LOWEST);
        assert_eq!(cfg.slice_for(Priority(3)), Duration::from_millis(1));

        let cfg = MlfqConfig::with_levels(64, Duration::from_millis(1));
        assert_eq!(cfg.levels(), MAX_PRIORITY_LEVELS);
        assert_eq!(cfg.slices().len(), MAX_PRIORITY_LEVELS);

        let cfg = MlfqConfig::default().with_boost_period(0);
        assert_eq!(cfg.boost_period(), 1);
    }

    #[test]
    fn stack_size_is_floored() {
        let cfg = RuntimeConfig::default().with_stack_size(1024);
        assert_eq!(cfg.stack_size, MIN_STACK_SIZE);
    }
}
