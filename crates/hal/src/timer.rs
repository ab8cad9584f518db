//! AArch64 EL1 physical timer (CNTP).
//!
//! The scheduler tick. `init` caches the interval so the IRQ handler can
//! re-arm with a plain `reset()`.

use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};

bitflags! {
    /// Control register bits for the generic timer (CNTP_CTL_EL0).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerCtrlFlags: u64 {
        /// Timer enabled.
        const ENABLE = 1 << 0;
        /// Timer interrupt masked.
        const IMASK  = 1 << 1;
        /// Timer interrupt status (read-only).
        const ISTATUS = 1 << 2;
    }
}

/// A generic interface for a hardware timer.
pub trait Timer {
    /// Read the system counter frequency (CNTFRQ_EL0).
    fn read_frequency(&self) -> u64;

    /// Read the current counter value (CNTPCT_EL0).
    fn read_counter(&self) -> u64;

    /// Arm a one-shot countdown (CNTP_TVAL_EL0).
    fn set_timeout(&self, ticks: u64);

    /// Program the control register (CNTP_CTL_EL0).
    fn configure(&self, flags: TimerCtrlFlags);

    /// Grant EL0 access to the counter registers (CNTKCTL_EL1).
    fn set_el0_access(&self);
}

/// The EL1 physical timer.
pub struct PhysicalTimer;

#[cfg(target_arch = "aarch64")]
impl Timer for PhysicalTimer {
    fn read_frequency(&self) -> u64 {
        let val: u64;
        unsafe {
            core::arch::asm!("mrs {}, cntfrq_el0", out(reg) val);
        }
        val
    }

    fn read_counter(&self) -> u64 {
        let val: u64;
        unsafe {
            core::arch::asm!("mrs {}, cntpct_el0", out(reg) val);
        }
        val
    }

    fn set_timeout(&self, ticks: u64) {
        unsafe {
            core::arch::asm!("msr cntp_tval_el0, {}", in(reg) ticks);
        }
    }

    fn configure(&self, flags: TimerCtrlFlags) {
        unsafe {
            core::arch::asm!("msr cntp_ctl_el0, {}", in(reg) flags.bits());
        }
    }

    fn set_el0_access(&self) {
        let val: u64 = 1;
        unsafe {
            core::arch::asm!("msr cntkctl_el1, {}", in(reg) val);
        }
    }
}

#[cfg(not(target_arch = "aarch64"))]
impl Timer for PhysicalTimer {
    fn read_frequency(&self) -> u64 {
        62_500_000 // QEMU's fixed 62.5 MHz, so host tests see real numbers
    }
    fn read_counter(&self) -> u64 {
        0
    }
    fn set_timeout(&self, _ticks: u64) {}
    fn configure(&self, _flags: TimerCtrlFlags) {}
    fn set_el0_access(&self) {}
}

pub static API: PhysicalTimer = PhysicalTimer;

/// Tick interval cached by `init`, re-used by every `reset`.
static INTERVAL_MSECS: AtomicU64 = AtomicU64::new(0);

/// Convert an interval in milliseconds into counter ticks.
#[inline]
pub fn msecs_to_ticks(freq: u64, msecs: u64) -> u64 {
    (freq * msecs) / 1000
}

/// Re-arm the countdown with the cached interval.
pub fn reset() {
    let msecs = INTERVAL_MSECS.load(Ordering::Relaxed);
    let freq = API.read_frequency();
    API.set_timeout(msecs_to_ticks(freq, msecs));
}

/// Enable the countdown and let EL0 read the counter.
pub fn enable() {
    API.configure(TimerCtrlFlags::ENABLE);
    API.set_el0_access();
}

/// Cache `msecs` as the tick interval, arm and enable the timer.
pub fn init(msecs: u64) {
    INTERVAL_MSECS.store(msecs, Ordering::Relaxed);
    reset();
    enable();
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_msecs_to_ticks() {
        // 62.5 MHz, 10ms tick -> 625_000 counts
        assert_eq!(msecs_to_ticks(62_500_000, 10), 625_000);
        assert_eq!(msecs_to_ticks(62_500_000, 1000), 62_500_000);
        assert_eq!(msecs_to_ticks(1000, 1), 1);
    }

    #[test]
    fn test_interval_cached_by_init() {
        init(10);
        assert_eq!(INTERVAL_MSECS.load(Ordering::Relaxed), 10);
        init(1000);
        assert_eq!(INTERVAL_MSECS.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn test_ctrl_flags() {
        assert_eq!(TimerCtrlFlags::ENABLE.bits(), 1);
        assert_eq!(TimerCtrlFlags::IMASK.bits(), 2);
    }
}
