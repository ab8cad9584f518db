//! PL011 UART line driver for the QEMU virt machine.

use bitflags::bitflags;
use core::ptr::{read_volatile, write_volatile};

/// PL011 on the QEMU virt board.
pub const UART0_BASE: usize = 0x0900_0000;

bitflags! {
    /// Flag register bits (FR).
    pub struct FlagFlags: u32 {
        /// Transmit FIFO full.
        const TXFF = 1 << 5;
        /// Receive FIFO empty.
        const RXFE = 1 << 4;
        /// UART busy.
        const BUSY = 1 << 3;
    }
}

bitflags! {
    /// Control register bits (CR).
    pub struct ControlFlags: u32 {
        /// UART enable.
        const UARTEN = 1 << 0;
        /// Transmit enable.
        const TXE    = 1 << 8;
        /// Receive enable.
        const RXE    = 1 << 9;
    }
}

bitflags! {
    /// Line Control register bits (LCR_H).
    pub struct LineControlFlags: u32 {
        /// Enable FIFOs.
        const FEN    = 1 << 4;
        /// Word length: 8 bits.
        const WLEN_8 = 0b11 << 5;
    }
}

#[repr(transparent)]
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
struct Reg<T>(T);

#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
impl<T> Reg<T> {
    fn read(&self) -> T {
        unsafe { read_volatile(&self.0) }
    }
    fn write(&mut self, val: T) {
        unsafe { write_volatile(&mut self.0, val) }
    }
}

#[repr(C)]
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
struct Registers {
    dr: Reg<u32>,     // 0x00
    rsrecr: Reg<u32>, // 0x04
    _reserved0: [u32; 4],
    fr: Reg<u32>, // 0x18
    _reserved1: u32,
    ilpr: Reg<u32>,  // 0x20
    ibrd: Reg<u32>,  // 0x24
    fbrd: Reg<u32>,  // 0x28
    lcr_h: Reg<u32>, // 0x2C
    cr: Reg<u32>,    // 0x30
    ifls: Reg<u32>,  // 0x34
    imsc: Reg<u32>,  // 0x38
    ris: Reg<u32>,   // 0x3C
    mis: Reg<u32>,   // 0x40
    icr: Reg<u32>,   // 0x44
}

pub struct Pl011Uart {
    #[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
    base: usize,
}

impl Pl011Uart {
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    #[cfg(target_arch = "aarch64")]
    fn regs(&self) -> &Registers {
        unsafe { &*(self.base as *const Registers) }
    }

    #[cfg(target_arch = "aarch64")]
    fn regs_mut(&mut self) -> &mut Registers {
        unsafe { &mut *(self.base as *mut Registers) }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn init(&mut self) {
        let r = self.regs_mut();

        // Disable while reprogramming, clear stale interrupts.
        r.cr.write(0);
        r.icr.write(0x7FF);

        // 8n1, FIFOs enabled. QEMU ignores the baud divisors.
        r.lcr_h
            .write((LineControlFlags::WLEN_8 | LineControlFlags::FEN).bits());

        r.cr.write((ControlFlags::UARTEN | ControlFlags::TXE | ControlFlags::RXE).bits());
    }

    #[cfg(target_arch = "aarch64")]
    pub fn write_byte(&mut self, byte: u8) {
        while FlagFlags::from_bits_truncate(self.regs().fr.read()).contains(FlagFlags::TXFF) {
            core::hint::spin_loop();
        }
        self.regs_mut().dr.write(byte as u32);
    }

    /// Wait for the transmit path to drain.
    #[cfg(target_arch = "aarch64")]
    pub fn flush(&self) {
        while FlagFlags::from_bits_truncate(self.regs().fr.read()).contains(FlagFlags::BUSY) {
            core::hint::spin_loop();
        }
    }

    // Host-test stubs: no device behind the base address.

    #[cfg(not(target_arch = "aarch64"))]
    pub fn init(&mut self) {}

    #[cfg(not(target_arch = "aarch64"))]
    pub fn write_byte(&mut self, _byte: u8) {}

    #[cfg(not(target_arch = "aarch64"))]
    pub fn flush(&self) {}

    pub fn write_str_bytes(&mut self, s: &str) {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
    }
}
