//! Panic and fatal-exception reporting.
//!
//! Everything fatal funnels here: serial first (it cannot fail), then a
//! best-effort blue screen if a display is up, then a halt loop. The
//! display path uses the facade's non-blocking lock, so a panic raised
//! mid-draw still reports over serial.

use core::fmt::Write;
use core::panic::PanicInfo;
use craybond_hal::console;
use craybond_hal::interrupts;

/// Fixed-size formatting buffer for panic messages.
struct LineBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> LineBuf<N> {
    const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<invalid utf8>")
    }
}

impl<const N: usize> Write for LineBuf<N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &b in s.as_bytes() {
            if self.len < N {
                self.buf[self.len] = b;
                self.len += 1;
            }
        }
        Ok(())
    }
}

fn halt() -> ! {
    loop {
        aarch64_cpu::asm::wfi();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    interrupts::disable();

    let mut msg = LineBuf::<256>::new();
    let _ = write!(msg, "{}", info.message());

    console::raw_puts("\n*** CRAYBOND PANIC ***\n");
    console::raw_puts(msg.as_str());
    console::raw_puts("\n");
    if let Some(location) = info.location() {
        let mut loc = LineBuf::<128>::new();
        let _ = write!(loc, "at {}:{}", location.file(), location.line());
        console::raw_puts(loc.as_str());
        console::raw_puts("\n");
    }
    console::raw_puts("System Halted\n");

    craybond_gpu::panic_screen(&["CRAYBOND PANIC", msg.as_str(), "System Halted"]);

    halt()
}

/// Report a fatal trap with its syndrome registers and halt.
pub fn fatal_exception(kind: &str, esr: u64, elr: u64, far: u64) -> ! {
    interrupts::disable();

    console::raw_puts("\n*** ");
    console::raw_puts(kind);
    console::raw_puts(" ***\nESR_EL1: ");
    console::puthex(esr);
    console::raw_puts("\nELR_EL1: ");
    console::puthex(elr);
    console::raw_puts("\nFAR_EL1: ");
    console::puthex(far);
    console::raw_puts("\nSystem Halted\n");

    let mut esr_line = LineBuf::<64>::new();
    let _ = write!(esr_line, "ESR {:#x}", esr);
    let mut elr_line = LineBuf::<64>::new();
    let _ = write!(elr_line, "ELR {:#x}", elr);
    let mut far_line = LineBuf::<64>::new();
    let _ = write!(far_line, "FAR {:#x}", far);
    craybond_gpu::panic_screen(&[
        kind,
        esr_line.as_str(),
        elr_line.as_str(),
        far_line.as_str(),
        "System Halted",
    ]);

    halt()
}
