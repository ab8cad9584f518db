//! Modern virtio-pci transport.
//!
//! Capability walk over the device's PCI configuration space, typed access
//! to the common configuration structure, the device-status bring-up
//! sequence, and the synchronous two-descriptor command engine.

use crate::queue::{DescFlags, SplitQueue};
use bitflags::bitflags;
use craybond_hal::mmio::MmioRegion;
use craybond_pci::{PciConfigSpace, PciDevice};

/// All virtio devices carry this vendor id.
pub const VIRTIO_VENDOR_ID: u16 = 0x1AF4;

/// Modern virtio PCI device id for a device type (1.0 spec §4.1.2).
#[inline]
pub const fn virtio_device_id(device_type: u16) -> u16 {
    0x1040 + device_type
}

/// Vendor-specific capability id carrying virtio structures.
const CAP_VNDR_VIRTIO: u8 = 0x09;

/// virtio_pci_cap.cfg_type values.
const CAP_COMMON_CFG: u8 = 1;
const CAP_NOTIFY_CFG: u8 = 2;
const CAP_ISR_CFG: u8 = 3;
const CAP_DEVICE_CFG: u8 = 4;
const CAP_PCI_CFG: u8 = 5;

bitflags! {
    /// Device status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceStatus: u8 {
        const ACKNOWLEDGE = 1;
        const DRIVER = 2;
        const DRIVER_OK = 4;
        const FEATURES_OK = 8;
        const FAILED = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No function with the requested device id on the bus.
    NotFound,
    /// Capability list lacked a required structure.
    MissingCapability,
    /// BAR probing or assignment failed.
    BarSetupFailed,
    /// Device refused FEATURES_OK.
    FeaturesRejected,
}

/// Common configuration register offsets (VirtIO 1.1 §4.1.4.3).
mod common_regs {
    pub const DEVICE_FEATURE_SELECT: usize = 0x00;
    pub const DEVICE_FEATURE: usize = 0x04;
    pub const DRIVER_FEATURE_SELECT: usize = 0x08;
    pub const DRIVER_FEATURE: usize = 0x0C;
    pub const DEVICE_STATUS: usize = 0x14;
    pub const QUEUE_SELECT: usize = 0x16;
    pub const QUEUE_SIZE: usize = 0x18;
    pub const QUEUE_ENABLE: usize = 0x1C;
    pub const QUEUE_DESC: usize = 0x20;
    pub const QUEUE_DRIVER: usize = 0x28;
    pub const QUEUE_DEVICE: usize = 0x30;
}

/// Typed window over the common configuration structure.
#[derive(Clone, Copy)]
pub struct CommonCfg {
    regs: MmioRegion,
}

impl CommonCfg {
    /// # Safety
    ///
    /// `base` must point at a mapped virtio common-config structure.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            regs: unsafe { MmioRegion::new(base) },
        }
    }

    pub fn device_status(&self) -> u8 {
        self.regs.read8(common_regs::DEVICE_STATUS)
    }

    pub fn set_device_status(&self, status: u8) {
        self.regs.write8(common_regs::DEVICE_STATUS, status);
    }

    pub fn add_status(&self, bits: DeviceStatus) {
        self.set_device_status(self.device_status() | bits.bits());
    }

    pub fn device_features(&self) -> u32 {
        self.regs.write32(common_regs::DEVICE_FEATURE_SELECT, 0);
        self.regs.read32(common_regs::DEVICE_FEATURE)
    }

    pub fn set_driver_features(&self, features: u32) {
        self.regs.write32(common_regs::DRIVER_FEATURE_SELECT, 0);
        self.regs.write32(common_regs::DRIVER_FEATURE, features);
    }

    pub fn select_queue(&self, index: u16) {
        self.regs.write16(common_regs::QUEUE_SELECT, index);
    }

    pub fn queue_size(&self) -> u16 {
        self.regs.read16(common_regs::QUEUE_SIZE)
    }

    pub fn set_queue_size(&self, size: u16) {
        self.regs.write16(common_regs::QUEUE_SIZE, size);
    }

    pub fn set_queue_rings(&self, desc: u64, driver: u64, device: u64) {
        self.regs.write64(common_regs::QUEUE_DESC, desc);
        self.regs.write64(common_regs::QUEUE_DRIVER, driver);
        self.regs.write64(common_regs::QUEUE_DEVICE, device);
    }

    pub fn enable_queue(&self) {
        self.regs.write16(common_regs::QUEUE_ENABLE, 1);
    }
}

/// A discovered virtio-pci function with its capability structures mapped.
pub struct VirtioPciDevice {
    common: CommonCfg,
    notify_base: usize,
    notify_off_multiplier: u32,
    isr_base: usize,
    device_cfg_base: usize,
    queue: Option<SplitQueue>,
}

impl VirtioPciDevice {
    /// Locate `virtio_device_id(device_type)` on the bus and resolve its
    /// capability structures, assigning BARs on first touch.
    pub fn probe(config: &PciConfigSpace, device_type: u16) -> Result<Self, TransportError> {
        let device = config
            .find_device(VIRTIO_VENDOR_ID, virtio_device_id(device_type))
            .ok_or(TransportError::NotFound)?;
        Self::from_device(&device)
    }

    /// Walk the capability list of an already-discovered function.
    pub fn from_device(device: &PciDevice) -> Result<Self, TransportError> {
        let mut common_base = 0usize;
        let mut notify_base = 0usize;
        let mut notify_off_multiplier = 0u32;
        let mut isr_base = 0usize;
        let mut device_cfg_base = 0usize;

        let mut cap_ptr = device.capabilities_ptr() as usize;
        while cap_ptr != 0 {
            let w0 = device.read32(cap_ptr);
            let cap_vndr = (w0 & 0xFF) as u8;
            let cap_next = ((w0 >> 8) & 0xFF) as u8;
            let cfg_type = ((w0 >> 24) & 0xFF) as u8;
            let bar = (device.read32(cap_ptr + 4) & 0xFF) as u8;

            if cap_vndr == CAP_VNDR_VIRTIO {
                let mut bar_val = device.bar_value(bar) as usize;
                if cfg_type < CAP_PCI_CFG && bar_val == 0 {
                    bar_val = device
                        .setup_bar(bar)
                        .ok_or(TransportError::BarSetupFailed)? as usize;
                }

                let cap_offset = device.read32(cap_ptr + 8) as usize;
                let target = bar_val + cap_offset;
                match cfg_type {
                    CAP_COMMON_CFG => common_base = target,
                    CAP_NOTIFY_CFG => {
                        notify_base = target;
                        // The multiplier follows the standard cap header.
                        notify_off_multiplier = device.read32(cap_ptr + 16);
                    }
                    CAP_ISR_CFG => isr_base = target,
                    CAP_DEVICE_CFG => device_cfg_base = target,
                    _ => {}
                }
                log::debug!(
                    "[virtio-pci] cap type {} -> {:#x} (bar {})",
                    cfg_type,
                    target,
                    bar
                );
            }

            cap_ptr = cap_next as usize;
        }

        if common_base == 0 || notify_base == 0 {
            return Err(TransportError::MissingCapability);
        }

        Ok(Self {
            common: unsafe { CommonCfg::new(common_base) },
            notify_base,
            notify_off_multiplier,
            isr_base,
            device_cfg_base,
            queue: None,
        })
    }

    pub fn common(&self) -> &CommonCfg {
        &self.common
    }

    pub fn notify_base(&self) -> usize {
        self.notify_base
    }

    pub fn notify_off_multiplier(&self) -> u32 {
        self.notify_off_multiplier
    }

    pub fn isr_base(&self) -> usize {
        self.isr_base
    }

    pub fn device_cfg_base(&self) -> usize {
        self.device_cfg_base
    }

    /// Run the status bring-up and install queue 0's rings.
    ///
    /// The three pages must be zeroed, identity-mapped, and owned by the
    /// caller for the device's lifetime.
    pub fn start(
        &mut self,
        desc_page: u64,
        avail_page: u64,
        used_page: u64,
    ) -> Result<(), TransportError> {
        let common = self.common;

        common.set_device_status(0);
        while common.device_status() != 0 {
            core::hint::spin_loop();
        }

        common.add_status(DeviceStatus::ACKNOWLEDGE);
        common.add_status(DeviceStatus::DRIVER);

        let features = common.device_features();
        common.set_driver_features(features);
        log::debug!("[virtio-pci] features {:#x}", features);

        common.add_status(DeviceStatus::FEATURES_OK);
        if common.device_status() & DeviceStatus::FEATURES_OK.bits() == 0 {
            common.add_status(DeviceStatus::FAILED);
            return Err(TransportError::FeaturesRejected);
        }

        common.select_queue(0);
        let queue_size = common.queue_size();
        common.set_queue_size(queue_size);

        common.set_queue_rings(desc_page, avail_page, used_page);
        common.enable_queue();

        common.add_status(DeviceStatus::DRIVER_OK);

        self.queue = Some(unsafe { SplitQueue::new(desc_page, avail_page, used_page) });
        Ok(())
    }

    /// Post a request/response pair on queue 0, kick the device, and spin
    /// until the used ring advances.
    ///
    /// Strictly synchronous and single-queue; callers are serialized by
    /// construction (no preemption during MMIO sequences).
    pub fn send_command(
        &mut self,
        cmd_addr: u64,
        cmd_len: u32,
        resp_addr: u64,
        resp_len: u32,
        flags: DescFlags,
    ) {
        let notify_addr = self.notify_base;
        let Some(queue) = self.queue.as_mut() else {
            return;
        };

        let prev = queue.used_idx();
        queue.post_pair(cmd_addr, cmd_len, resp_addr, resp_len, flags);

        // Queue 0's notify offset is 0; a 16-bit store of the queue index
        // kicks the device.
        unsafe {
            craybond_hal::mmio::write16(notify_addr, 0);
        }

        queue.wait_used(prev);
    }

    /// Queue handle for diagnostics and tests.
    pub fn queue(&self) -> Option<&SplitQueue> {
        self.queue.as_ref()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    extern crate std;
    use super::*;
    use craybond_pci::config_offset;
    use std::vec::Vec;

    /// Mock ECAM with one virtio function at 0:0.0 and a capability chain
    /// against a pre-assigned (fake) BAR value.
    fn mock_function(bar_base: u32) -> Vec<u8> {
        let mut ecam = vec![0u8; 32 * 8 * 4096];
        let off = config_offset(0, 0, 0, 0);

        ecam[off..off + 2].copy_from_slice(&VIRTIO_VENDOR_ID.to_le_bytes());
        ecam[off + 2..off + 4].copy_from_slice(&virtio_device_id(16).to_le_bytes());

        // BAR0 pre-assigned (flags clear), so the walk skips sizing.
        ecam[off + 0x10..off + 0x14].copy_from_slice(&bar_base.to_le_bytes());

        // Capability chain: 0x40 common, 0x50 notify, 0x60 isr, 0x70 device.
        ecam[off + 0x34] = 0x40;

        let caps: [(usize, u8, u8, u32); 4] = [
            (0x40, 0x50, CAP_COMMON_CFG, 0x000),
            (0x50, 0x60, CAP_NOTIFY_CFG, 0x100),
            (0x60, 0x70, CAP_ISR_CFG, 0x200),
            (0x70, 0x00, CAP_DEVICE_CFG, 0x300),
        ];
        for (at, next, cfg_type, bar_off) in caps {
            ecam[off + at] = CAP_VNDR_VIRTIO;
            ecam[off + at + 1] = next;
            ecam[off + at + 2] = 16;
            ecam[off + at + 3] = cfg_type;
            ecam[off + at + 4] = 0; // bar index
            ecam[off + at + 8..off + at + 12].copy_from_slice(&bar_off.to_le_bytes());
        }
        // notify_off_multiplier after the notify cap header.
        ecam[off + 0x50 + 16..off + 0x50 + 20].copy_from_slice(&4u32.to_le_bytes());

        ecam
    }

    #[test]
    fn test_device_id_mapping() {
        assert_eq!(virtio_device_id(16), 0x1050); // GPU
        assert_eq!(virtio_device_id(2), 0x1042); // block
    }

    #[test]
    fn test_capability_walk() {
        let mut ecam = mock_function(0x8000_0000);

        let cfg = unsafe { PciConfigSpace::new(ecam.as_mut_ptr() as usize, 1) };
        let dev = VirtioPciDevice::probe(&cfg, 16).unwrap();

        assert_eq!(dev.notify_base(), 0x8000_0100);
        assert_eq!(dev.notify_off_multiplier(), 4);
        assert_eq!(dev.isr_base(), 0x8000_0200);
        assert_eq!(dev.device_cfg_base(), 0x8000_0300);
    }

    #[test]
    fn test_probe_missing_device() {
        let mut ecam = vec![0u8; 32 * 8 * 4096];
        let cfg = unsafe { PciConfigSpace::new(ecam.as_mut_ptr() as usize, 1) };
        assert_eq!(
            VirtioPciDevice::probe(&cfg, 16).err(),
            Some(TransportError::NotFound)
        );
    }

    #[test]
    fn test_bring_up_status_sequence() {
        // Common-config structure backed by plain memory; a mock device
        // that retains every status bit the driver writes.
        let mut bar = vec![0u8; 0x1000];
        let bar_base = bar.as_mut_ptr() as usize;
        let mut dev = VirtioPciDevice {
            common: unsafe { CommonCfg::new(bar_base) },
            notify_base: bar_base + 0x100,
            notify_off_multiplier: 0,
            isr_base: 0,
            device_cfg_base: 0,
            queue: None,
        };

        let desc = vec![0u8; 4096];
        let avail = vec![0u8; 4096];
        let used = vec![0u8; 4096];
        dev.start(
            desc.as_ptr() as u64,
            avail.as_ptr() as u64,
            used.as_ptr() as u64,
        )
        .unwrap();

        let status = dev.common().device_status();
        assert_eq!(
            status,
            (DeviceStatus::ACKNOWLEDGE
                | DeviceStatus::DRIVER
                | DeviceStatus::FEATURES_OK
                | DeviceStatus::DRIVER_OK)
                .bits()
        );

        // Ring addresses installed and the queue enabled.
        let qdesc = u64::from_le_bytes(bar[0x20..0x28].try_into().unwrap());
        assert_eq!(qdesc, desc.as_ptr() as u64);
        let enable = u16::from_le_bytes(bar[0x1C..0x1E].try_into().unwrap());
        assert_eq!(enable, 1);
    }
}
