//! Process model.
//!
//! A fixed table of records; each holds the full register file plus stack
//! pointer, program counter, and saved program status. Records are written
//! by the exception trampolines (`arch::context`), so the layout is
//! `repr(C)` with asserted offsets.

pub mod bootscreen;
pub mod loader;
pub mod scheduler;
pub mod userprocs;

/// Run states. `Running` and `Blocked` are reserved; nothing clears
/// `Ready` today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
#[allow(dead_code)]
pub enum ProcState {
    Ready,
    Running,
    Blocked,
}

/// One process. The assembly context routines index this by fixed byte
/// offsets; keep the field order in sync with `arch/aarch64/context.rs`.
#[repr(C)]
pub struct Process {
    /// x0..x30 at suspension.
    pub regs: [u64; 31],
    /// SP_EL0 at suspension (both EL0t and EL1t processes run on SP_EL0).
    pub sp: u64,
    /// Resume pc. For SVC suspension this is the SVC instruction itself.
    pub pc: u64,
    /// SPSR_EL1 to restore on `eret`.
    pub spsr: u64,
    pub id: u64,
    pub state: ProcState,
}

const _: () = {
    assert!(core::mem::offset_of!(Process, regs) == 0);
    assert!(core::mem::offset_of!(Process, sp) == 248);
    assert!(core::mem::offset_of!(Process, pc) == 256);
    assert!(core::mem::offset_of!(Process, spsr) == 264);
};

/// EL1t, D/A/F masked, IRQs enabled: kernel processes stay preemptible
/// and restore their stack through SP_EL0 like everyone else.
pub const SPSR_KERNEL: u64 = 0x344;

/// EL0t, nothing masked.
pub const SPSR_USER: u64 = 0x0;

impl Process {
    pub const fn empty() -> Self {
        Self {
            regs: [0; 31],
            sp: 0,
            pc: 0,
            spsr: 0,
            id: 0,
            state: ProcState::Ready,
        }
    }
}
