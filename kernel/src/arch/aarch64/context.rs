//! Context save/restore between exception level transitions.
//!
//! The process record layout these routines write is fixed by
//! `process::Process` (`repr(C)`): x0..x30 at offsets 0..240, then sp, pc,
//! spsr. The save side runs inside the exception trampolines, which stash
//! the registers they clobber (`x0`, `x1`, `x30`) on the exception stack
//! first; `save_context` reads those three back from there.
//!
//! Two restore variants: `restore_context` resumes at the saved pc (IRQ
//! suspension and fresh processes), `restore_context_yield` resumes 4
//! bytes later, skipping the SVC instruction the pc was parked on.

use crate::process::Process;
use core::arch::global_asm;

unsafe extern "C" {
    /// Store x0..x30 and SP_EL0 into the record at `x0`.
    ///
    /// Contract: `[sp]` = interrupted x0, `[sp, #8]` = x1, `[sp, #16]` = x30.
    pub fn save_context(proc: *mut Process);
    /// Store ELR_EL1 (interrupted pc) and SPSR_EL1 into the record.
    pub fn save_pc_interrupt(proc: *mut Process);
    /// Like `save_pc_interrupt`, but park the pc on the SVC instruction
    /// itself (ELR_EL1 - 4).
    pub fn save_pc_svc(proc: *mut Process);
    /// Load the record and `eret` to its saved pc.
    pub fn restore_context(proc: *mut Process) -> !;
    /// Load the record and `eret` past the SVC the pc is parked on.
    pub fn restore_context_yield(proc: *mut Process) -> !;
}

global_asm!(
    r#"
.section .text

.global save_context
save_context:
    stp     x2, x3,   [x0, #16]
    stp     x4, x5,   [x0, #32]
    stp     x6, x7,   [x0, #48]
    stp     x8, x9,   [x0, #64]
    stp     x10, x11, [x0, #80]
    stp     x12, x13, [x0, #96]
    stp     x14, x15, [x0, #112]
    stp     x16, x17, [x0, #128]
    stp     x18, x19, [x0, #144]
    stp     x20, x21, [x0, #160]
    stp     x22, x23, [x0, #176]
    stp     x24, x25, [x0, #192]
    stp     x26, x27, [x0, #208]
    stp     x28, x29, [x0, #224]
    /* interrupted x0, x1, x30 come from the trampoline stash */
    ldp     x1, x2, [sp]
    stp     x1, x2, [x0]
    ldr     x1, [sp, #16]
    str     x1, [x0, #240]
    mrs     x1, sp_el0
    str     x1, [x0, #248]
    ret

.global save_pc_interrupt
save_pc_interrupt:
    mrs     x1, elr_el1
    str     x1, [x0, #256]
    mrs     x1, spsr_el1
    str     x1, [x0, #264]
    ret

.global save_pc_svc
save_pc_svc:
    mrs     x1, elr_el1
    sub     x1, x1, #4
    str     x1, [x0, #256]
    mrs     x1, spsr_el1
    str     x1, [x0, #264]
    ret

.global restore_context
restore_context:
    ldr     x1, [x0, #248]
    msr     sp_el0, x1
    ldr     x1, [x0, #256]
    msr     elr_el1, x1
    b       restore_gpregs

.global restore_context_yield
restore_context_yield:
    ldr     x1, [x0, #248]
    msr     sp_el0, x1
    ldr     x1, [x0, #256]
    add     x1, x1, #4
    msr     elr_el1, x1

restore_gpregs:
    ldr     x1, [x0, #264]
    msr     spsr_el1, x1
    ldp     x2, x3,   [x0, #16]
    ldp     x4, x5,   [x0, #32]
    ldp     x6, x7,   [x0, #48]
    ldp     x8, x9,   [x0, #64]
    ldp     x10, x11, [x0, #80]
    ldp     x12, x13, [x0, #96]
    ldp     x14, x15, [x0, #112]
    ldp     x16, x17, [x0, #128]
    ldp     x18, x19, [x0, #144]
    ldp     x20, x21, [x0, #160]
    ldp     x22, x23, [x0, #176]
    ldp     x24, x25, [x0, #192]
    ldp     x26, x27, [x0, #208]
    ldp     x28, x29, [x0, #224]
    ldr     x30, [x0, #240]
    ldp     x0, x1, [x0]
    eret
"#
);
