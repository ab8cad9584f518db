//! Bump allocation over two fixed regions.
//!
//! Layout inside `[heap_bottom, heap_limit)`:
//!
//! ```text
//! heap_bottom                 heap_bottom + 5 MiB              heap_limit
//!     |-- transient (talloc) --|-- permanent (palloc) -------------|
//! ```
//!
//! Transient frees go onto a singly linked first-fit list written into the
//! freed blocks themselves; there is no coalescing. Permanent memory is
//! never reclaimed. Both pointers only ever move up, and every address and
//! size handed out is a 4 KiB multiple.

pub const PAGE_SIZE: u64 = 4096;

/// Transient region size: 5 MiB past `heap_bottom`.
pub const TRANSIENT_REGION_SIZE: u64 = 0x50_0000;

#[inline]
fn round_up_page(size: u64) -> u64 {
    (size + (PAGE_SIZE - 1)) & !(PAGE_SIZE - 1)
}

/// Header written into the first bytes of a freed transient block.
#[repr(C)]
struct FreeBlock {
    next: u64,
    size: u64,
}

pub struct BumpAllocator {
    next_t: u64,
    temp_limit: u64,
    next_p: u64,
    perm_limit: u64,
    free_head: u64,
}

impl BumpAllocator {
    /// Placeholder for static init; unusable until `new` replaces it.
    pub const fn empty() -> Self {
        Self {
            next_t: 0,
            temp_limit: 0,
            next_p: 0,
            perm_limit: 0,
            free_head: 0,
        }
    }

    pub fn new(heap_bottom: u64, heap_limit: u64) -> Self {
        let temp_limit = heap_bottom + TRANSIENT_REGION_SIZE;
        Self {
            next_t: heap_bottom,
            temp_limit,
            next_p: temp_limit,
            perm_limit: heap_limit,
            free_head: 0,
        }
    }

    pub fn talloc(&mut self, size: u64) -> u64 {
        let size = round_up_page(size);

        // First fit on the free list.
        let mut curr = &mut self.free_head as *mut u64;
        unsafe {
            while *curr != 0 {
                let block = *curr as *mut FreeBlock;
                if (*block).size >= size {
                    let result = *curr;
                    *curr = (*block).next;
                    return result;
                }
                curr = &mut (*block).next as *mut u64;
            }
        }

        if self.next_t + size > self.temp_limit {
            panic!("transient allocator overflow at {:#x}", self.next_t);
        }

        let result = self.next_t;
        self.next_t += size;
        result
    }

    pub fn tfree(&mut self, ptr: u64, size: u64) {
        // Size rounding must mirror talloc or the free list fragments lie.
        let size = round_up_page(size);
        unsafe {
            let block = ptr as *mut FreeBlock;
            (*block).next = self.free_head;
            (*block).size = size;
        }
        self.free_head = ptr;
    }

    pub fn palloc(&mut self, size: u64) -> u64 {
        let size = round_up_page(size);
        self.next_p = round_up_page(self.next_p);
        if self.next_p + size > self.perm_limit {
            panic!("permanent allocator overflow at {:#x}", self.perm_limit);
        }
        let result = self.next_p;
        self.next_p += size;
        result
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
