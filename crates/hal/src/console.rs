//! Serial console over the PL011.
//!
//! All output paths hold the writer's IRQ-masking lock for the whole
//! transfer, so a timer interrupt can never interleave two half-written
//! lines. The `raw_*` functions are the panic-safe surface: no allocation,
//! no `core::fmt`, usable from exception handlers.

use crate::IrqSafeLock;
use crate::uart_pl011::{Pl011Uart, UART0_BASE};
use core::fmt::{self, Write};

pub use craybond_utils::hex::{format_hex, format_hex_trim};

pub static WRITER: IrqSafeLock<Pl011Uart> = IrqSafeLock::new(Pl011Uart::new(UART0_BASE));

pub fn init() {
    WRITER.lock().init();
}

impl Write for Pl011Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_str_bytes(s);
        Ok(())
    }
}

pub fn _print(args: fmt::Arguments) {
    let _ = WRITER.lock().write_fmt(args);
}

/// Emit one character, IRQs masked for the store.
pub fn raw_putc(c: u8) {
    WRITER.lock().write_byte(c);
}

/// Emit a string, IRQs masked for the whole transfer.
pub fn raw_puts(s: &str) {
    WRITER.lock().write_str_bytes(s);
}

/// Emit raw bytes; non-UTF-8 data goes out unmodified.
pub fn raw_put_bytes(bytes: &[u8]) {
    let mut uart = WRITER.lock();
    for &b in bytes {
        uart.write_byte(b);
    }
}

/// Emit a `u64` as trimmed hex, IRQs masked for the whole transfer.
pub fn puthex(val: u64) {
    let mut buf = [0u8; 18];
    let s = format_hex_trim(val, &mut buf);
    WRITER.lock().write_str_bytes(s);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Serial print that bypasses `format_args` buffering concerns entirely;
/// kept separate so IRQ handlers have an obviously-safe spelling.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        let _ = core::fmt::Write::write_fmt(&mut *$crate::console::WRITER.lock(), format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! serial_println {
    () => {
        $crate::serial_print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}
