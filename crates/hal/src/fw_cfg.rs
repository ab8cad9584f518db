//! QEMU fw_cfg client (DMA interface).
//!
//! Three operations: signature check, selector-based DMA transfer, and a
//! directory scan used to locate files like `etc/ramfb`. The DMA control
//! block and all directory payloads are big-endian.

use crate::mmio;
use core::sync::atomic::{AtomicBool, Ordering, compiler_fence};

pub const FW_CFG_DATA: usize = 0x0902_0000;
pub const FW_CFG_DMA: usize = FW_CFG_DATA + 0x10;

/// "QEMU" read little-endian from the data register.
pub const FW_CFG_SIGNATURE: u64 = 0x554D_4551;

// DMA control bits
const CTL_ERROR: u32 = 0x01;
const CTL_READ: u32 = 0x02;
const CTL_SELECT: u32 = 0x08;
const CTL_WRITE: u32 = 0x10;

/// Selector for the file directory.
const SELECTOR_DIRECTORY: u16 = 0x19;

/// Length of the null-padded name field in a directory entry.
pub const FILE_NAME_LEN: usize = 56;

static CHECKED: AtomicBool = AtomicBool::new(false);

/// DMA control block, all fields big-endian on the wire.
#[repr(C)]
struct DmaAccess {
    control: u32,
    length: u32,
    address: u64,
}

/// One directory entry, after byte-order fixup.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FwCfgFile {
    pub size: u32,
    pub selector: u16,
    pub reserved: u16,
    pub name: [u8; FILE_NAME_LEN],
}

impl FwCfgFile {
    pub const fn empty() -> Self {
        Self {
            size: 0,
            selector: 0,
            reserved: 0,
            name: [0; FILE_NAME_LEN],
        }
    }

    /// Compare the null-padded name field against `needle` exactly.
    pub fn name_matches(&self, needle: &str) -> bool {
        let bytes = needle.as_bytes();
        if bytes.len() > FILE_NAME_LEN {
            return false;
        }
        if self.name[..bytes.len()] != *bytes {
            return false;
        }
        // Exact match requires the terminator (or a full-length name).
        bytes.len() == FILE_NAME_LEN || self.name[bytes.len()] == 0
    }
}

/// Probe the interface signature once and cache the answer.
pub fn check() -> bool {
    if CHECKED.load(Ordering::Relaxed) {
        return true;
    }
    let present = unsafe { mmio::read64(FW_CFG_DATA) } == FW_CFG_SIGNATURE;
    if present {
        CHECKED.store(true, Ordering::Relaxed);
    }
    present
}

/// Run one DMA transfer and spin until the device clears the control word.
fn dma_operation(buf: *mut u8, size: u32, control: u32) {
    let access = DmaAccess {
        control: control.to_be(),
        length: size.to_be(),
        address: (buf as u64).to_be(),
    };

    unsafe {
        mmio::write64(FW_CFG_DMA, (&access as *const DmaAccess as u64).to_be());
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("isb", options(nostack));
    }

    // Completion: all bits except the error bit drop to zero.
    loop {
        compiler_fence(Ordering::SeqCst);
        let control = u32::from_be(unsafe { core::ptr::read_volatile(&access.control) });
        if control & !CTL_ERROR == 0 {
            break;
        }
    }
}

/// Select `selector` and DMA-read `size` bytes into `buf`.
pub fn dma_read(buf: *mut u8, size: u32, selector: u16) {
    if !check() {
        return;
    }
    dma_operation(buf, size, ((selector as u32) << 16) | CTL_SELECT | CTL_READ);
}

/// Continue reading from the current selector without reselecting.
fn dma_read_continue(buf: *mut u8, size: u32) {
    dma_operation(buf, size, CTL_READ);
}

/// Select `selector` and DMA-write `size` bytes from `buf`.
pub fn dma_write(buf: *const u8, size: u32, selector: u16) {
    if !check() {
        return;
    }
    dma_operation(
        buf as *mut u8,
        size,
        ((selector as u32) << 16) | CTL_SELECT | CTL_WRITE,
    );
}

/// Scan the directory for `name`. Fills `file` and returns true on a match.
pub fn find_file(name: &str, file: &mut FwCfgFile) -> bool {
    if !check() {
        return false;
    }

    let mut count: u32 = 0;
    dma_read(&mut count as *mut u32 as *mut u8, 4, SELECTOR_DIRECTORY);
    let count = u32::from_be(count);

    for _ in 0..count {
        dma_read_continue(
            file as *mut FwCfgFile as *mut u8,
            core::mem::size_of::<FwCfgFile>() as u32,
        );
        file.size = u32::from_be(file.size);
        file.selector = u16::from_be(file.selector);

        if file.name_matches(name) {
            log::debug!("[fw_cfg] {} at selector {:#x}", name, file.selector);
            return true;
        }
    }

    false
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn file_named(name: &str) -> FwCfgFile {
        let mut f = FwCfgFile::empty();
        f.name[..name.len()].copy_from_slice(name.as_bytes());
        f
    }

    #[test]
    fn test_name_match_exact() {
        let f = file_named("etc/ramfb");
        assert!(f.name_matches("etc/ramfb"));
    }

    #[test]
    fn test_name_match_rejects_prefix() {
        let f = file_named("etc/ramfb-extra");
        assert!(!f.name_matches("etc/ramfb"));
        let f = file_named("etc/ram");
        assert!(!f.name_matches("etc/ramfb"));
    }

    #[test]
    fn test_directory_entry_layout() {
        // QEMU's fw_cfg_file is 64 bytes: u32 + u16 + u16 + 56-byte name.
        assert_eq!(core::mem::size_of::<FwCfgFile>(), 64);
        assert_eq!(core::mem::size_of::<DmaAccess>(), 16);
    }

    #[test]
    fn test_signature_constant() {
        assert_eq!(&FW_CFG_SIGNATURE.to_le_bytes()[..4], b"QEMU");
    }
}
