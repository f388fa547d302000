/*
 * Architecture Abstraction Layer
 *
 * This module isolates the only code in the crate that depends on a
 * hardware calling convention: suspending one logical thread and resuming
 * another by swapping stack pointers. Everything above this layer treats
 * an execution context as an opaque saved stack pointer.
 *
 * Currently only x86_64 (System V ABI) is supported.
 */

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64::switch::{ExecContext, INITIAL_FRAME_SIZE, switch};

#[cfg(not(target_arch = "x86_64"))]
compile_error!("corun only provides a stack switch primitive for x86_64");
