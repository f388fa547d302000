/*
 * Stack Switch Primitive (x86_64, System V ABI)
 *
 * A suspended logical thread is nothing more than a saved stack pointer.
 * At that address sit the callee-saved registers pushed by switch_stacks,
 * followed by the return address into whoever called switch_stacks.
 *
 * FRAME LAYOUT (from the saved stack pointer upwards):
 * ====================================================
 *
 *   sp + 0   r15
 *   sp + 8   r14
 *   sp + 16  r13
 *   sp + 24  r12
 *   sp + 32  rbx
 *   sp + 40  rbp
 *   sp + 48  return address
 *
 * A fresh thread gets a synthetic frame of the same shape whose return
 * address is thread_trampoline, with the entry function in r13 and its
 * argument in r12. The first switch into the thread "returns" into the
 * trampoline, which calls entry(arg). The entry function never returns.
 *
 * Caller-saved registers need no saving: switch_stacks is an ordinary
 * extern "C" call from the compiler's point of view.
 */

use core::arch::naked_asm;
use core::ptr;

/// Bytes of stack consumed by a primed frame, including alignment slack
pub const INITIAL_FRAME_SIZE: usize = FRAME_WORDS * 8 + 32;

const FRAME_WORDS: usize = 7;

/// Saved execution context of a suspended thread
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    sp: usize,
}

impl ExecContext {
    /// Saved stack pointer (0 for a context that was never suspended)
    pub fn stack_pointer(&self) -> usize {
        self.sp
    }

    /// Build the first frame of a new thread below `stack_top`
    ///
    /// The frame is laid out so that `entry` starts with the stack aligned
    /// the way the ABI expects right after a `call`.
    ///
    /// # Safety
    /// The `INITIAL_FRAME_SIZE` bytes below `stack_top` must be writable and
    /// must stay reserved for this thread until it terminates.
    pub unsafe fn prime(stack_top: usize, entry: extern "C" fn(usize) -> !, arg: usize) -> Self {
        // After the trampoline's address is popped the stack pointer lands on
        // `top`, which is 16-byte aligned.
        let top = (stack_top & !0xf) - 16;
        let sp = top - FRAME_WORDS * 8;

        let frame: [usize; FRAME_WORDS] = [
            0,                                          // r15
            0,                                          // r14
            entry as *const () as usize,                // r13
            arg,                                        // r12
            0,                                          // rbx
            0,                                          // rbp
            thread_trampoline as *const () as usize,    // return address
        ];

        unsafe {
            ptr::copy_nonoverlapping(frame.as_ptr(), sp as *mut usize, FRAME_WORDS);
        }

        Self { sp }
    }
}

/// Suspend the calling context into `save` and resume `load`
///
/// Returns when some other context switches back into `save`.
///
/// # Safety
/// - `load` must hold a context produced by [`ExecContext::prime`] or by a
///   previous `switch` whose stack is still alive
/// - `save` must be valid for a write at the moment of the call
/// - no Rust references into either stack may be relied upon across the call
pub unsafe fn switch(save: *mut ExecContext, load: *const ExecContext) {
    unsafe { switch_stacks(save.cast::<usize>(), load.cast::<usize>()) }
}

#[unsafe(naked)]
unsafe extern "C" fn switch_stacks(save: *mut usize, load: *const usize) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// First code a new thread executes: `r13(r12)`
#[unsafe(naked)]
unsafe extern "C" fn thread_trampoline() {
    naked_asm!(
        "mov rdi, r12",
        "call r13",
        "ud2",
    )
}
