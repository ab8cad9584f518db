//! EL1 exception vectors and handlers.
//!
//! The IRQ and lower-EL-sync trampolines save the interrupted context into
//! the current process record before entering Rust; if the Rust handler
//! returns (no reschedule), the trampoline restores that same record. FIQ,
//! SError, and current-EL synchronous exceptions are fatal and fall
//! through to the panic path with syndrome registers in hand.

use crate::process::scheduler::{self, SwitchReason};
use aarch64_cpu::registers::{ELR_EL1, ESR_EL1, FAR_EL1, Readable, VBAR_EL1, Writeable};
use core::arch::global_asm;
use craybond_hal::gic::{self, Gic};
use craybond_hal::timer;

/// Exception class field of ESR_EL1.
#[inline]
fn esr_exception_class(esr: u64) -> u64 {
    (esr >> 26) & 0x3F
}

/// EC value for an AArch64 SVC.
const EC_SVC64: u64 = 0b010101;

pub fn init() {
    unsafe extern "C" {
        static exception_vectors: u8;
    }
    let vectors = unsafe { &exception_vectors as *const u8 as u64 };
    VBAR_EL1.set(vectors);
}

/// Timer and spurious interrupt dispatch. Entered from the trampoline with
/// the interrupted context already saved; returning resumes it.
#[unsafe(no_mangle)]
extern "C" fn handle_irq() {
    let irq = gic::API.acknowledge();
    if Gic::is_spurious(irq) {
        return;
    }

    match irq {
        gic::IRQ_TIMER => {
            timer::reset();
            gic::API.end_interrupt(irq);
            scheduler::switch_proc(SwitchReason::Interrupt);
        }
        other => {
            log::warn!("unhandled irq {}", other);
            gic::API.end_interrupt(other);
        }
    }
}

/// Synchronous exception from EL0: either an SVC (syscall) or a fault.
#[unsafe(no_mangle)]
extern "C" fn handle_sync_lower_el() {
    let esr = ESR_EL1.get();
    if esr_exception_class(esr) == EC_SVC64 {
        crate::syscall::dispatch();
        return;
    }

    crate::panic::fatal_exception("UNEXPECTED EL0 EXCEPTION", esr, ELR_EL1.get(), FAR_EL1.get());
}

#[unsafe(no_mangle)]
extern "C" fn handle_sync_el1() -> ! {
    crate::panic::fatal_exception("SYNC EXCEPTION", ESR_EL1.get(), ELR_EL1.get(), FAR_EL1.get())
}

#[unsafe(no_mangle)]
extern "C" fn handle_fiq() -> ! {
    crate::panic::fatal_exception("FIQ EXCEPTION", ESR_EL1.get(), ELR_EL1.get(), FAR_EL1.get())
}

#[unsafe(no_mangle)]
extern "C" fn handle_serror() -> ! {
    crate::panic::fatal_exception("SERROR EXCEPTION", ESR_EL1.get(), ELR_EL1.get(), FAR_EL1.get())
}

/// An IRQ arrived with no process record to save into; the interrupted
/// registers are unrecoverable.
#[unsafe(no_mangle)]
extern "C" fn panic_unexpected_irq() -> ! {
    panic!("irq before the scheduler started");
}

global_asm!(
    r#"
.section .text

.macro ventry target
.balign 0x80
    b       \target
.endm

.balign 0x800
.global exception_vectors
exception_vectors:
    /* Current EL with SP_EL0 (kernel processes run EL1t) */
    ventry  sync_el1_trampoline
    ventry  irq_trampoline
    ventry  fiq_trampoline
    ventry  serror_trampoline
    /* Current EL with SP_ELx */
    ventry  sync_el1_trampoline
    ventry  irq_trampoline
    ventry  fiq_trampoline
    ventry  serror_trampoline
    /* Lower EL, AArch64 */
    ventry  sync_el0_trampoline
    ventry  irq_trampoline
    ventry  fiq_trampoline
    ventry  serror_trampoline
    /* Lower EL, AArch32: unsupported */
    ventry  serror_trampoline
    ventry  serror_trampoline
    ventry  serror_trampoline
    ventry  serror_trampoline

/* Save the interrupted context into the current process record, handle,
 * and if the handler returns resume that record. */
irq_trampoline:
    sub     sp, sp, #32
    stp     x0, x1, [sp]
    str     x30, [sp, #16]
    adrp    x0, CURRENT_PROC
    add     x0, x0, :lo12:CURRENT_PROC
    ldr     x0, [x0]
    cbz     x0, 1f
    bl      save_context
    bl      save_pc_interrupt
    add     sp, sp, #32
    bl      handle_irq
    adrp    x0, CURRENT_PROC
    add     x0, x0, :lo12:CURRENT_PROC
    ldr     x0, [x0]
    b       restore_context
1:
    add     sp, sp, #32
    bl      panic_unexpected_irq

/* SVC entry: park the pc on the SVC, dispatch, resume past it. */
sync_el0_trampoline:
    sub     sp, sp, #32
    stp     x0, x1, [sp]
    str     x30, [sp, #16]
    adrp    x0, CURRENT_PROC
    add     x0, x0, :lo12:CURRENT_PROC
    ldr     x0, [x0]
    cbz     x0, 1f
    bl      save_context
    bl      save_pc_svc
    add     sp, sp, #32
    bl      handle_sync_lower_el
    adrp    x0, CURRENT_PROC
    add     x0, x0, :lo12:CURRENT_PROC
    ldr     x0, [x0]
    b       restore_context_yield
1:
    add     sp, sp, #32
    bl      handle_sync_el1

sync_el1_trampoline:
    bl      handle_sync_el1

fiq_trampoline:
    bl      handle_fiq

serror_trampoline:
    bl      handle_serror
"#
);
