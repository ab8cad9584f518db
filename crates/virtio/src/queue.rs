//! Split virtqueue rings (VirtIO 1.1 §2.6).
//!
//! One queue, 128 entries, laid out across three pre-allocated pages whose
//! physical addresses are installed into the device's common config. The
//! command engine only ever posts a two-descriptor chain (request +
//! device-writable response), so free-list bookkeeping is unnecessary:
//! descriptors 0 and 1 are rewritten for every command.

use bitflags::bitflags;
use core::sync::atomic::{Ordering, fence};

/// Ring size; must match the layout of the avail/used pages.
pub const QUEUE_LEN: usize = 128;

bitflags! {
    /// Descriptor flags (VirtIO 1.1 §2.6.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescFlags: u16 {
        /// Buffer continues via the next field.
        const NEXT = 1;
        /// Buffer is device write-only.
        const WRITE = 2;
    }
}

/// A single descriptor in the descriptor table.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Descriptor {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

/// Driver-owned available ring.
#[repr(C)]
pub struct AvailRing {
    pub flags: u16,
    pub idx: u16,
    pub ring: [u16; QUEUE_LEN],
}

/// One completed element in the used ring.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UsedElem {
    pub id: u32,
    pub len: u32,
}

/// Device-owned used ring.
#[repr(C)]
pub struct UsedRing {
    pub flags: u16,
    pub idx: u16,
    pub ring: [UsedElem; QUEUE_LEN],
}

/// Handle over the three ring pages.
pub struct SplitQueue {
    desc: *mut Descriptor,
    avail: *mut AvailRing,
    used: *mut UsedRing,
}

// Single producer (the kernel), single consumer (the device).
unsafe impl Send for SplitQueue {}

impl SplitQueue {
    /// # Safety
    ///
    /// The three addresses must point at zeroed, identity-mapped pages that
    /// live for the lifetime of the device and are also installed into its
    /// common configuration.
    pub const unsafe fn new(desc_page: u64, avail_page: u64, used_page: u64) -> Self {
        Self {
            desc: desc_page as *mut Descriptor,
            avail: avail_page as *mut AvailRing,
            used: used_page as *mut UsedRing,
        }
    }

    /// Post a request/response descriptor pair and publish it.
    ///
    /// `flags` applies to the request descriptor (`NEXT` when the response
    /// belongs to the same chain). The response descriptor is always
    /// device-writable and ends the chain.
    pub fn post_pair(
        &mut self,
        cmd_addr: u64,
        cmd_len: u32,
        resp_addr: u64,
        resp_len: u32,
        flags: DescFlags,
    ) {
        unsafe {
            core::ptr::write_volatile(
                self.desc,
                Descriptor {
                    addr: cmd_addr,
                    len: cmd_len,
                    flags: flags.bits(),
                    next: 1,
                },
            );
            core::ptr::write_volatile(
                self.desc.add(1),
                Descriptor {
                    addr: resp_addr,
                    len: resp_len,
                    flags: DescFlags::WRITE.bits(),
                    next: 0,
                },
            );

            let idx = core::ptr::read_volatile(&(*self.avail).idx);
            core::ptr::write_volatile(
                (*self.avail).ring.as_mut_ptr().add(idx as usize % QUEUE_LEN),
                0,
            );
            // Descriptors and the ring slot must be visible before the
            // index moves.
            fence(Ordering::SeqCst);
            core::ptr::write_volatile(&mut (*self.avail).idx, idx.wrapping_add(1));
        }
    }

    pub fn avail_idx(&self) -> u16 {
        unsafe { core::ptr::read_volatile(&(*self.avail).idx) }
    }

    pub fn used_idx(&self) -> u16 {
        fence(Ordering::SeqCst);
        unsafe { core::ptr::read_volatile(&(*self.used).idx) }
    }

    /// Last element the device marked used.
    pub fn last_used(&self) -> UsedElem {
        let idx = self.used_idx();
        unsafe {
            core::ptr::read_volatile(
                (*self.used)
                    .ring
                    .as_ptr()
                    .add(idx.wrapping_sub(1) as usize % QUEUE_LEN),
            )
        }
    }

    /// Spin until the device advances the used index past `prev`.
    pub fn wait_used(&self, prev: u16) {
        while self.used_idx() == prev {
            core::hint::spin_loop();
        }
    }

    /// Read back descriptor `index` (test and diagnostic use).
    pub fn descriptor(&self, index: usize) -> Descriptor {
        unsafe { core::ptr::read_volatile(self.desc.add(index)) }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    extern crate std;
    use super::*;
    use std::boxed::Box;

    fn make_queue() -> (SplitQueue, Box<[Descriptor; QUEUE_LEN]>, Box<AvailRing>, Box<UsedRing>) {
        let desc = Box::new([Descriptor::default(); QUEUE_LEN]);
        let avail = Box::new(AvailRing {
            flags: 0,
            idx: 0,
            ring: [0; QUEUE_LEN],
        });
        let used = Box::new(UsedRing {
            flags: 0,
            idx: 0,
            ring: [UsedElem::default(); QUEUE_LEN],
        });
        let q = unsafe {
            SplitQueue::new(
                desc.as_ptr() as u64,
                &*avail as *const AvailRing as u64,
                &*used as *const UsedRing as u64,
            )
        };
        (q, desc, avail, used)
    }

    #[test]
    fn test_struct_sizes() {
        assert_eq!(core::mem::size_of::<Descriptor>(), 16);
        assert_eq!(core::mem::size_of::<AvailRing>(), 4 + 2 * QUEUE_LEN);
        assert_eq!(core::mem::size_of::<UsedElem>(), 8);
        assert_eq!(core::mem::size_of::<UsedRing>(), 4 + 8 * QUEUE_LEN);
        // All three must fit the single page each is given.
        assert!(core::mem::size_of::<[Descriptor; QUEUE_LEN]>() <= 4096);
        assert!(core::mem::size_of::<AvailRing>() <= 4096);
        assert!(core::mem::size_of::<UsedRing>() <= 4096);
    }

    #[test]
    fn test_post_pair_builds_chain() {
        let (mut q, _d, avail, _u) = make_queue();

        q.post_pair(0x1000, 24, 0x2000, 408, DescFlags::NEXT);

        let d0 = q.descriptor(0);
        assert_eq!(d0.addr, 0x1000);
        assert_eq!(d0.len, 24);
        assert_eq!(d0.flags, DescFlags::NEXT.bits());
        assert_eq!(d0.next, 1);

        let d1 = q.descriptor(1);
        assert_eq!(d1.addr, 0x2000);
        assert_eq!(d1.len, 408);
        assert_eq!(d1.flags, DescFlags::WRITE.bits());
        assert_eq!(d1.next, 0);

        assert_eq!(avail.idx, 1);
        assert_eq!(avail.ring[0], 0);
    }

    #[test]
    fn test_avail_idx_wraps_ring_slot() {
        let (mut q, _d, avail, _u) = make_queue();
        for _ in 0..(QUEUE_LEN + 3) {
            q.post_pair(0x1000, 8, 0x2000, 8, DescFlags::NEXT);
        }
        assert_eq!(avail.idx as usize, QUEUE_LEN + 3);
        // Head index 0 is re-published into the wrapped slot.
        assert_eq!(avail.ring[3], 0);
    }

    #[test]
    fn test_used_side() {
        let (mut q, _d, _a, mut used) = make_queue();
        q.post_pair(0x1000, 8, 0x2000, 8, DescFlags::NEXT);

        let before = q.used_idx();
        assert_eq!(before, 0);

        // Simulate the device completing chain 0 with 8 bytes written.
        used.ring[0] = UsedElem { id: 0, len: 8 };
        used.idx = 1;

        q.wait_used(before);
        assert_eq!(q.used_idx(), 1);
        let elem = q.last_used();
        assert_eq!(elem.id, 0);
        assert_eq!(elem.len, 8);
    }
}
