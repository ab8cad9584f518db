//! Kernel memory allocators.
//!
//! Two bump regions carved out of the linker-reserved heap: a transient
//! region with a free list for short-lived buffers, and a permanent region
//! for allocations that live until power-off (page tables, framebuffers,
//! virtqueue pages).

mod bump;

pub use bump::{BumpAllocator, PAGE_SIZE, TRANSIENT_REGION_SIZE};

use crate::IrqSafeLock;

static HEAP: IrqSafeLock<BumpAllocator> = IrqSafeLock::new(BumpAllocator::empty());

/// Hand the allocator its heap bounds. Call once, before any allocation.
pub fn init(heap_bottom: u64, heap_limit: u64) {
    let mut heap = HEAP.lock();
    *heap = BumpAllocator::new(heap_bottom, heap_limit);
}

/// Allocate transient memory, 4 KiB aligned. Panics on overflow.
pub fn talloc(size: u64) -> u64 {
    HEAP.lock().talloc(size)
}

/// Return a transient block to the free list. `size` must match the
/// allocation request (there is no header to recover it from).
pub fn tfree(ptr: u64, size: u64) {
    HEAP.lock().tfree(ptr, size);
}

/// Allocate permanent memory, 4 KiB aligned. Panics on overflow.
pub fn palloc(size: u64) -> u64 {
    HEAP.lock().palloc(size)
}

/// Allocate permanent memory and zero it.
pub fn palloc_zeroed(size: u64) -> u64 {
    let addr = palloc(size);
    unsafe {
        core::ptr::write_bytes(addr as *mut u8, 0, size as usize);
    }
    addr
}
