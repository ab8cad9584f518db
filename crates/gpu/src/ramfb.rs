//! QEMU ramfb backend.
//!
//! A guest-allocated framebuffer handed to firmware through the fw_cfg
//! `etc/ramfb` file. No flush step: the host scans the buffer directly.

use craybond_hal::allocator::palloc;
use craybond_hal::fw_cfg::{self, FwCfgFile};

/// 'XR24': XRGB8888 little-endian.
const FOURCC_XRGB8888: u32 =
    (b'X' as u32) | ((b'R' as u32) << 8) | ((b'2' as u32) << 16) | ((b'4' as u32) << 24);

const BYTES_PER_PIXEL: u32 = 4;

/// Framebuffer configuration written to the device, big-endian fields.
#[repr(C, packed)]
struct RamFbConfig {
    addr: u64,
    fourcc: u32,
    flags: u32,
    width: u32,
    height: u32,
    stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamFbError {
    /// fw_cfg has no `etc/ramfb` entry on this machine.
    NotPresent,
}

pub struct RamFb {
    fb_ptr: u64,
    width: u32,
    height: u32,
    stride: u32,
}

impl RamFb {
    /// Allocate a framebuffer and hand it to the firmware.
    ///
    /// A missing `etc/ramfb` file is a hard failure; configuring a
    /// selector of zero would silently draw into nothing.
    pub fn init(width: u32, height: u32) -> Result<Self, RamFbError> {
        let mut file = FwCfgFile::empty();
        if !fw_cfg::find_file("etc/ramfb", &mut file) || file.selector == 0 {
            log::warn!("[ramfb] etc/ramfb not present");
            return Err(RamFbError::NotPresent);
        }

        let stride = width * BYTES_PER_PIXEL;
        let fb_ptr = palloc(width as u64 * height as u64 * BYTES_PER_PIXEL as u64);

        let config = RamFbConfig {
            addr: fb_ptr.to_be(),
            fourcc: FOURCC_XRGB8888.to_be(),
            flags: 0u32.to_be(),
            width: width.to_be(),
            height: height.to_be(),
            stride: stride.to_be(),
        };
        fw_cfg::dma_write(
            &config as *const RamFbConfig as *const u8,
            core::mem::size_of::<RamFbConfig>() as u32,
            file.selector,
        );

        log::info!("[ramfb] configured {}x{} at {:#x}", width, height, fb_ptr);
        Ok(Self {
            fb_ptr,
            width,
            height,
            stride,
        })
    }

    pub fn framebuffer(&mut self) -> &mut [u8] {
        let len = (self.stride * self.height) as usize;
        unsafe { core::slice::from_raw_parts_mut(self.fb_ptr as *mut u8, len) }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_spells_xr24() {
        assert_eq!(&FOURCC_XRGB8888.to_le_bytes(), b"XR24");
    }

    #[test]
    fn test_config_is_packed() {
        // The firmware expects exactly 28 bytes.
        assert_eq!(core::mem::size_of::<RamFbConfig>(), 28);
    }
}
