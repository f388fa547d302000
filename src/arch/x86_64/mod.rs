/*
 * x86_64 Architecture Support Module
 *
 * Submodules:
 * - switch: callee-saved register frame, stack switch and thread trampoline
 */

pub mod switch;
