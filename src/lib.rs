/*
 * corun - Cooperative Multithreading Runtime
 *
 * Logical threads that share one OS thread and switch only on explicit
 * yields, joins and exits. The crate is organised in layers:
 *
 * - arch:      the stack switch primitive (the only assembly in the crate)
 * - scheduler: thread records, state lists, policies, dispatch core and the
 *              Runtime lifecycle API
 * - memory:    region allocators that provide thread stacks
 * - config:    runtime and MLFQ tuning
 * - error:     errors surfaced to callers
 * - utils:     a minimal logger for binaries and tests
 *
 * Quick start:
 *
 *   let rt = Runtime::new(RuntimeConfig::default())?;
 *   rt.spawn(|rt| {
 *       let child = rt.spawn(|_| 42).unwrap();
 *       rt.join(child).unwrap()
 *   })?;
 *   rt.run()?;
 */

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod memory;
pub mod scheduler;
pub mod utils;

pub use config::{MlfqConfig, PolicyKind, RuntimeConfig};
pub use error::{Error, Result};
pub use memory::{ChunkAllocator, ListAllocator, RegionAllocator, SystemAllocator};
pub use scheduler::{
    Priority, RunSummary, Runtime, SYSTEM_THREAD_ID, SchedStats, ThreadId, ThreadState,
};
