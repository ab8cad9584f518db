//! Round-robin scheduler.
//!
//! Preemption comes from the EL1 physical timer; cooperation from SVC.
//! `switch_proc` walks the table once starting after the current slot and
//! restores the first `Ready` record it finds. If the walk comes back
//! around, the caller's context resumes unchanged.

use super::{ProcState, Process};
use crate::arch::context::restore_context;
use craybond_hal::interrupts;
use craybond_hal::timer;

pub const MAX_PROCS: usize = 16;

static mut PROCESSES: [Process; MAX_PROCS] = [const { Process::empty() }; MAX_PROCS];
static mut CURRENT: usize = 0;
static mut COUNT: usize = 0;

/// Record the exception trampolines save into; null until the scheduler
/// owns the CPU.
#[unsafe(no_mangle)]
pub static mut CURRENT_PROC: *mut Process = core::ptr::null_mut();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// Timer preemption.
    Interrupt,
    /// Voluntary hand-off (scheduler start or a yielding syscall).
    Yield,
}

/// Claim a fresh table slot. Returns `None` when the table is full.
///
/// Only called during single-threaded boot.
pub fn allocate_slot() -> Option<&'static mut Process> {
    unsafe {
        let count = *core::ptr::addr_of!(COUNT);
        if count >= MAX_PROCS {
            return None;
        }
        *core::ptr::addr_of_mut!(COUNT) = count + 1;
        let proc = &mut (*core::ptr::addr_of_mut!(PROCESSES))[count];
        proc.id = count as u64;
        Some(proc)
    }
}

pub fn process_count() -> usize {
    unsafe { *core::ptr::addr_of!(COUNT) }
}

/// The record of the process currently holding the CPU.
pub fn current() -> *mut Process {
    unsafe { *core::ptr::addr_of!(CURRENT_PROC) }
}

/// Hand the CPU to the next `Ready` process, if any other exists.
///
/// Entered with the caller's context already saved (IRQ or SVC path) or
/// discardable (cold start). Does not return when a switch happens.
pub fn switch_proc(_reason: SwitchReason) {
    unsafe {
        let count = *core::ptr::addr_of!(COUNT);
        if count == 0 {
            return;
        }

        let procs = core::ptr::addr_of_mut!(PROCESSES);
        let current = *core::ptr::addr_of!(CURRENT);
        let mut next = (current + 1) % count;
        while (*procs)[next].state != ProcState::Ready {
            next = (next + 1) % count;
            if next == current {
                return;
            }
        }

        *core::ptr::addr_of_mut!(CURRENT) = next;
        let proc = &mut (*procs)[next] as *mut Process;
        *core::ptr::addr_of_mut!(CURRENT_PROC) = proc;
        restore_context(proc);
    }
}

/// Mask IRQs, arm the tick, and `eret` into the first runnable process.
/// Its SPSR re-enables interrupts; the timer does the rest.
pub fn start_scheduler(tick_msecs: u64) -> ! {
    interrupts::disable();
    timer::init(tick_msecs);
    switch_proc(SwitchReason::Yield);
    panic!("no runnable process");
}
