//! craybond kernel entry point.
//!
//! Boot hands control to `kernel_main` with the MMU off and IRQs masked.
//! Bring-up order matters: PCI discovery walks the high ECAM window, which
//! is only reachable while translation is off, so the whole graphics stack
//! comes up before the MMU. After `mmu::init` the kernel maps the low
//! device windows it keeps using (notify doorbells, BARs), loads the
//! processes, and starts the scheduler. `start_scheduler` never returns;
//! from the first timer tick onwards the machine belongs to the process
//! table.

#![no_std]
#![no_main]

mod arch;
mod logger;
mod memory;
mod panic;
mod process;
mod syscall;

use craybond_hal::allocator;
use craybond_hal::fdt;
use craybond_hal::gic;
use craybond_hal::mmu;
use craybond_hal::{console, println};
use craybond_pci::PciConfigSpace;

/// Preferred display mode when no scanout reports one.
const DISPLAY_WIDTH: u32 = 1024;
const DISPLAY_HEIGHT: u32 = 768;

/// Scheduler tick, milliseconds.
const TICK_MSECS: u64 = 10;

/// 32-bit PCI memory window the BAR allocator assigns from.
const BAR_WINDOW_BASE: u64 = 0x1000_0000;
const BAR_WINDOW_SIZE: u64 = 0x100_0000;

#[unsafe(no_mangle)]
pub extern "C" fn kernel_main() -> ! {
    console::init();
    logger::init(log::LevelFilter::Info);
    println!("craybond initializing...");

    allocator::init(memory::heap_bottom(), memory::heap_limit());

    match memory::init_ram() {
        Ok(ram) => log::info!(
            "ram {:#x}..{:#x}, user {:#x}..{:#x}",
            ram.base,
            ram.base + ram.size,
            memory::user_ram_start(),
            memory::user_ram_end()
        ),
        Err(e) => log::warn!("dtb memory probe failed: {:?}", e),
    }

    if let Ok(dtb) = unsafe { fdt::boot_dtb() } {
        if let Some(node) = fdt::find_virtio_mmio_device(dtb, 2) {
            log::info!(
                "virtio-mmio block device at {:#x} irq {}",
                node.base,
                node.irq
            );
        }
    }

    // Translation is still off: the ECAM window and unassigned BARs are
    // reachable exactly now.
    let pci = unsafe { PciConfigSpace::platform() };
    if craybond_gpu::init(&pci, DISPLAY_WIDTH, DISPLAY_HEIGHT) {
        let (w, h) = craybond_gpu::screen_size();
        log::info!("display {}x{}", w, h);
    }

    arch::exceptions::init();
    gic::API.init();
    log::info!("interrupt controller and vectors up");

    mmu::init(&mmu::KernelLayout {
        kmem_start: memory::kernel_start(),
        kmem_end: memory::kcode_end() - 1,
        shared_start: memory::shared_start(),
        shared_end: memory::shared_end(),
    });
    // The GPU's notify doorbell and BAR structures stay in use from the
    // drawing processes.
    mmu::map_device_range(BAR_WINDOW_BASE, BAR_WINDOW_SIZE);

    process::bootscreen::spawn();
    process::userprocs::spawn_demo();
    log::info!("{} processes ready", process::scheduler::process_count());

    println!("craybond initialized, starting scheduler");
    process::scheduler::start_scheduler(TICK_MSECS);
}
