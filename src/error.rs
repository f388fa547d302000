/*
 * Runtime Error Types
 *
 * Runtime conditions that a lifecycle call reports to its caller. These
 * never abort the process. Contract violations (a record linked twice, a
 * dispatch with no current record, reconciliation on a runnable record) are
 * not represented here: they panic, and the crate profiles abort on panic.
 */

use thiserror::Error;

use crate::scheduler::ThreadId;

/// Errors reported by the runtime and its region allocators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The region allocator could not satisfy a request
    #[error("out of memory: {requested} byte region unavailable")]
    OutOfMemory { requested: usize },

    /// The target thread is not tracked by the scheduler
    #[error("invalid target: {0} is not a live thread")]
    InvalidTarget(ThreadId),

    /// A blocked join was released without its target terminating
    #[error("spurious wake: join target {0} vanished")]
    SpuriousWake(ThreadId),

    /// A thread-only operation was called from the system context
    #[error("operation requires a running logical thread")]
    NotInThread,

    /// A pointer handed to an allocator was not one it returned
    #[error("invalid region: pointer was not returned by this allocator")]
    InvalidRegion,

    /// The dispatch loop is already active
    #[error("runtime is already dispatching")]
    AlreadyRunning,
}

/// Result alias used across the crate
pub type Result<T> = core::result::Result<T, Error>;
