//! Kernel memory map.
//!
//! The linker script pins the image layout; the DTB supplies the RAM span.
//! User RAM is everything from the first 2 MiB boundary past the image to
//! the last 2 MiB boundary of RAM, handed out page by page to processes.

use core::sync::atomic::{AtomicU64, Ordering};
use craybond_hal::fdt::{self, FdtError, MemoryRegion};

mod sym {
    unsafe extern "C" {
        pub static kernel_start: u8;
        pub static kcode_end: u8;
        pub static kfull_end: u8;
        pub static heap_bottom: u8;
        pub static heap_limit: u8;
        pub static shared_start: u8;
        pub static shared_end: u8;
    }
}

macro_rules! linker_symbol {
    ($name:ident) => {
        pub fn $name() -> u64 {
            unsafe { core::ptr::addr_of!(sym::$name) as u64 }
        }
    };
}

linker_symbol!(kernel_start);
linker_symbol!(kcode_end);
linker_symbol!(kfull_end);
linker_symbol!(heap_bottom);
linker_symbol!(heap_limit);
linker_symbol!(shared_start);
linker_symbol!(shared_end);

const ALIGN_2MB: u64 = 1 << 21;

static RAM_BASE: AtomicU64 = AtomicU64::new(0);
static RAM_SIZE: AtomicU64 = AtomicU64::new(0);
static USER_START: AtomicU64 = AtomicU64::new(0);
static USER_END: AtomicU64 = AtomicU64::new(0);

/// Read the `memory` node and derive the user RAM window.
pub fn init_ram() -> Result<MemoryRegion, FdtError> {
    let dtb = unsafe { fdt::boot_dtb()? };
    let region = fdt::get_memory_region(dtb)?;

    let user_start = (kfull_end() + 1 + (ALIGN_2MB - 1)) & !(ALIGN_2MB - 1);
    let user_end = (region.base + region.size) & !(ALIGN_2MB - 1);

    RAM_BASE.store(region.base, Ordering::Relaxed);
    RAM_SIZE.store(region.size, Ordering::Relaxed);
    USER_START.store(user_start, Ordering::Relaxed);
    USER_END.store(user_end, Ordering::Relaxed);

    Ok(region)
}

pub fn user_ram_start() -> u64 {
    USER_START.load(Ordering::Relaxed)
}

pub fn user_ram_end() -> u64 {
    USER_END.load(Ordering::Relaxed)
}
