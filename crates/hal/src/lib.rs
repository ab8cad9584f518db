#![cfg_attr(not(feature = "std"), no_std)]

pub mod allocator;
pub mod console;
pub mod fdt;
pub mod fw_cfg;
pub mod gic;
pub mod interrupts;
pub mod mmio;
pub mod mmu;
pub mod timer;
pub mod uart_pl011;

use craybond_utils::{Spinlock, SpinlockGuard};

/// Spinlock that masks IRQs for the duration of the critical section.
///
/// Every MMIO-facing singleton in the kernel sits behind one of these, which
/// is what makes the console and allocator safe to touch from the IRQ path.
pub struct IrqSafeLock<T> {
    inner: Spinlock<T>,
}

impl<T> IrqSafeLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Spinlock::new(data),
        }
    }

    pub fn lock(&self) -> IrqSafeLockGuard<'_, T> {
        let state = interrupts::disable();
        let guard = self.inner.lock();
        IrqSafeLockGuard {
            guard: Some(guard),
            state,
        }
    }

    pub fn try_lock(&self) -> Option<IrqSafeLockGuard<'_, T>> {
        let state = interrupts::disable();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqSafeLockGuard {
                guard: Some(guard),
                state,
            }),
            None => {
                interrupts::restore(state);
                None
            }
        }
    }
}

pub struct IrqSafeLockGuard<'a, T> {
    guard: Option<SpinlockGuard<'a, T>>,
    state: u64,
}

impl<'a, T> core::ops::Deref for IrqSafeLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_ref().unwrap()
    }
}

impl<'a, T> core::ops::DerefMut for IrqSafeLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().unwrap()
    }
}

impl<'a, T> Drop for IrqSafeLockGuard<'a, T> {
    fn drop(&mut self) {
        self.guard.take();
        interrupts::restore(self.state);
    }
}
