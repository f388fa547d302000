/*
 * Scheduler Type Definitions
 *
 * This module defines the core types used throughout the scheduler subsystem.
 * These types are designed to be lightweight, Copy-able, and suitable for
 * use in both policy and mechanism layers.
 */

use core::fmt;
use core::ops::Sub;
use core::time::Duration;
use std::time::Instant;

/// Upper bound on the number of MLFQ priority levels
pub const MAX_PRIORITY_LEVELS: usize = 8;

/// Thread priority level
///
/// Higher values indicate higher priority. `Priority(0)` is the lowest level;
/// the top level depends on how many levels the active configuration has,
/// so comparisons against "top" go through [`Priority::top`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u8);

impl Priority {
    /// Lowest priority level
    pub const LOWEST: Priority = Priority(0);

    /// Top priority for a configuration with `levels` levels
    pub fn top(levels: usize) -> Priority {
        debug_assert!(levels > 0 && levels <= MAX_PRIORITY_LEVELS);
        Priority((levels - 1) as u8)
    }

    /// One level lower, saturating at [`Priority::LOWEST`]
    pub fn lowered(self) -> Priority {
        Priority(self.0.saturating_sub(1))
    }

    /// Get the level as usize for indexing
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A point on the runtime's monotonic clock
///
/// Stored as the offset from the clock's epoch so that records can be
/// compared and built without a live clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The clock epoch
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub const fn from_duration(offset: Duration) -> Self {
        Self(offset)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(Duration::from_micros(micros))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_since(rhs)
    }
}

/// Monotonic clock used for run-slice accounting
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Which state list a record lives in
///
/// RUNNING records stay in the runnable list, so there is no list for them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ListKind {
    Runnable = 0,
    Blocked = 1,
    Zombie = 2,
}

impl ListKind {
    /// Number of state lists the core keeps
    pub const COUNT: usize = 3;

    pub fn as_usize(self) -> usize {
        self as usize
    }
}

/// Counters kept by the scheduler core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedStats {
    /// Number of switches from the system context into a thread
    pub switches: u64,

    /// Number of threads created
    pub created: u64,

    /// Number of zombie records reclaimed by a join
    pub reclaimed: u64,
}
