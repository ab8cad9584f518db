//! EL0 -> EL1 syscall dispatch.
//!
//! The lower-EL sync trampoline has already saved the caller's registers
//! into the current process record; arguments are read from there. One
//! call exists: printf. Anything else is treated as a fault.
//!
//! Output goes through the raw console path (single IRQ-masked transfer,
//! no `core::fmt`), with a transient buffer returned to the free list
//! before the syscall completes.

use crate::process::scheduler;
use craybond_hal::allocator::{talloc, tfree};
use craybond_hal::console;
use craybond_utils::fmt::format_directives;

/// Syscall numbers (x8).
pub const SYS_PRINTF: u64 = 3;

/// Most arguments a printf call may pass.
const MAX_ARGS: usize = 16;

/// Longest format string accepted from EL0.
const MAX_FMT: usize = 256;

const LINE_BUF: u64 = 256;

/// Entered from the sync trampoline. Returning resumes the caller past
/// its SVC instruction.
pub fn dispatch() {
    let proc = scheduler::current();
    if proc.is_null() {
        panic!("UNEXPECTED EL0 EXCEPTION: svc with no current process");
    }

    let (num, x0, x1, x2) = unsafe {
        (
            (*proc).regs[8],
            (*proc).regs[0],
            (*proc).regs[1],
            (*proc).regs[2],
        )
    };

    match num {
        SYS_PRINTF => printf(x0, x1, x2 as usize),
        other => panic!("UNEXPECTED EL0 EXCEPTION: svc number {}", other),
    }
}

/// `x0` format pointer, `x1` argument array pointer, `x2` argument count.
fn printf(fmt_ptr: u64, args_ptr: u64, argc: usize) {
    let argc = argc.min(MAX_ARGS);
    let mut args = [0u64; MAX_ARGS];
    for (i, slot) in args.iter_mut().enumerate().take(argc) {
        *slot = unsafe { (args_ptr as *const u64).add(i).read() };
    }

    let fmt_base = fmt_ptr as *const u8;
    let mut fmt_len = 0;
    while fmt_len < MAX_FMT && unsafe { fmt_base.add(fmt_len).read() } != 0 {
        fmt_len += 1;
    }
    let fmt = unsafe { core::slice::from_raw_parts(fmt_base, fmt_len) };

    let buf = talloc(LINE_BUF);
    let out = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, LINE_BUF as usize) };
    let n = unsafe { format_directives(fmt, &args[..argc], out) };

    console::raw_put_bytes(&out[..n]);
    console::raw_putc(b'\n');

    tfree(buf, LINE_BUF);
}
