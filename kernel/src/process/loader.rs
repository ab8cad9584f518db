//! Process creation.
//!
//! Kernel processes execute in place from the kernel image and only need a
//! stack. User processes get their text and read-only data byte-copied
//! into fresh EL0 pages, with the relocator rewriting PC-relative
//! instructions so literal references follow the data.

use super::{Process, SPSR_KERNEL, SPSR_USER, scheduler};
use core::sync::atomic::{AtomicU64, Ordering};
use craybond_hal::mmu::{self, MapLevel};
use craybond_reloc::{RelocSpan, relocate_code};

const PAGE_SIZE: u64 = 4096;
const STACK_SIZE: u64 = 0x1000;

/// Next unclaimed user RAM page. Process memory is never returned.
static NEXT_USER_PAGE: AtomicU64 = AtomicU64::new(0);

/// Claim `size` bytes of user RAM (page granular) and map every page at
/// `level`, with the TLB/I-cache maintenance each mapping requires.
fn alloc_proc_mem(size: u64, level: MapLevel) -> Option<u64> {
    let size = (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    if size == 0 {
        return None;
    }

    let start = crate::memory::user_ram_start();
    let end = crate::memory::user_ram_end();
    if start == 0 {
        return None;
    }

    let mut base = NEXT_USER_PAGE.load(Ordering::Relaxed);
    if base == 0 {
        base = start;
    }
    if base + size > end {
        return None;
    }
    NEXT_USER_PAGE.store(base + size, Ordering::Relaxed);

    let mut page = base;
    while page < base + size {
        mmu::register_proc_memory(page, page, level);
        page += PAGE_SIZE;
    }
    Some(base)
}

/// A kernel-mode process running from the kernel image.
pub fn create_kernel_process(entry: extern "C" fn() -> !) -> Option<&'static mut Process> {
    let stack = alloc_proc_mem(STACK_SIZE, MapLevel::El1)?;

    let proc = scheduler::allocate_slot()?;
    proc.sp = stack + STACK_SIZE;
    proc.pc = entry as usize as u64;
    proc.spsr = SPSR_KERNEL;
    log::info!(
        "kernel process {} at {:#x}, stack {:#x}",
        proc.id,
        proc.pc,
        proc.sp
    );
    Some(proc)
}

/// A user-mode process built from a compiled-in blob.
///
/// `code` is copied and relocated into EL0 pages; `data` (the blob's
/// read-only literals) is copied first so ADRP references can be rewritten
/// to its new home.
pub fn create_process(
    code_base: u64,
    code_size: u64,
    data_base: u64,
    data_size: u64,
) -> Option<&'static mut Process> {
    log::debug!("loading process: code {:#x} data {:#x}", code_size, data_size);

    let data_dest = alloc_proc_mem(data_size.max(1), MapLevel::El0)?;
    unsafe {
        core::ptr::copy_nonoverlapping(
            data_base as *const u8,
            data_dest as *mut u8,
            data_size as usize,
        );
    }

    let code_dest = alloc_proc_mem(code_size, MapLevel::El0)?;
    let span = RelocSpan {
        src: code_base,
        size: code_size as u32,
        src_data: data_base,
        dst_data: data_dest,
        data_size: data_size as u32,
    };
    unsafe {
        relocate_code(code_dest, &span);
    }
    // The copied text must reach the instruction stream before the first
    // eret into it.
    mmu::flush_all();
    mmu::flush_icache();

    let stack = alloc_proc_mem(STACK_SIZE, MapLevel::El0)?;

    let proc = scheduler::allocate_slot()?;
    proc.sp = stack + STACK_SIZE;
    proc.pc = code_dest;
    proc.spsr = SPSR_USER;
    log::info!(
        "user process {} at {:#x}, stack {:#x}, data {:#x}",
        proc.id,
        proc.pc,
        proc.sp,
        data_dest
    );
    Some(proc)
}
