//! Flattened-device-tree probe.
//!
//! The bootloader leaves a 1.x-format DTB at the base of RAM. Only two
//! lookups are needed: the `memory` node for the RAM span, and the
//! `virtio_mmio` nodes for transitional MMIO devices. Property payloads are
//! big-endian; `reg` on this platform is two 64-bit cells.

use fdt::Fdt;

/// Where QEMU places the DTB on the virt machine.
pub const DTB_ADDR: usize = 0x4000_0000;

/// Largest DTB the probe will accept.
const DTB_MAX_SIZE: usize = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtError {
    InvalidHeader,
    MemoryMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtioMmioNode {
    pub base: u64,
    pub size: u64,
    /// SPI number from the `interrupts` property, offset to the GIC range.
    pub irq: u32,
}

/// Borrow the boot DTB.
///
/// # Safety
///
/// `DTB_ADDR` must hold a device tree (QEMU guarantees this on virt) and
/// the region must stay mapped.
pub unsafe fn boot_dtb() -> Result<&'static [u8], FdtError> {
    let header = unsafe { core::slice::from_raw_parts(DTB_ADDR as *const u8, 8) };
    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != 0xd00d_feed {
        return Err(FdtError::InvalidHeader);
    }
    let total = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if total < 8 || total > DTB_MAX_SIZE {
        return Err(FdtError::InvalidHeader);
    }
    Ok(unsafe { core::slice::from_raw_parts(DTB_ADDR as *const u8, total) })
}

fn parse_reg_pair(value: &[u8]) -> Option<(u64, u64)> {
    if value.len() < 16 {
        return None;
    }
    let base = u64::from_be_bytes(value[0..8].try_into().ok()?);
    let size = u64::from_be_bytes(value[8..16].try_into().ok()?);
    Some((base, size))
}

/// RAM span from the `memory` node's `reg` property.
pub fn get_memory_region(dtb: &[u8]) -> Result<MemoryRegion, FdtError> {
    let fdt = Fdt::new(dtb).map_err(|_| FdtError::InvalidHeader)?;

    for node in fdt.all_nodes() {
        if !node.name.starts_with("memory") {
            continue;
        }
        if let Some(reg) = node.property("reg") {
            if let Some((base, size)) = parse_reg_pair(reg.value) {
                return Ok(MemoryRegion { base, size });
            }
        }
    }
    Err(FdtError::MemoryMissing)
}

/// All `virtio_mmio` transports named in the tree.
///
/// Which device sits behind each transport is not in the DTB; callers read
/// the device-id register at `base + 0x8` to find out.
pub fn virtio_mmio_nodes(dtb: &[u8], out: &mut [Option<VirtioMmioNode>]) -> usize {
    let Ok(fdt) = Fdt::new(dtb) else {
        return 0;
    };

    let mut count = 0;
    for node in fdt.all_nodes() {
        if count >= out.len() {
            break;
        }
        if !node.name.starts_with("virtio_mmio") {
            continue;
        }
        let Some(reg) = node.property("reg") else {
            continue;
        };
        let Some((base, size)) = parse_reg_pair(reg.value) else {
            continue;
        };
        // interrupts = <type number flags>; SPIs start at 32.
        let irq = node
            .property("interrupts")
            .and_then(|p| p.value.get(4..8))
            .and_then(|cell| cell.try_into().ok())
            .map(u32::from_be_bytes)
            .map(|spi| spi + 32)
            .unwrap_or(0);
        out[count] = Some(VirtioMmioNode { base, size, irq });
        count += 1;
    }
    count
}

/// Virtio-mmio device id register offset.
const VIRTIO_MMIO_DEVICE_ID: usize = 0x008;

/// Scan the transports for a device of `device_id` (2 = block).
///
/// Reads the device-id register behind each node, so the MMIO window must
/// be accessible.
pub fn find_virtio_mmio_device(dtb: &[u8], device_id: u32) -> Option<VirtioMmioNode> {
    let mut nodes = [None; 16];
    let count = virtio_mmio_nodes(dtb, &mut nodes);
    for node in nodes.iter().take(count).flatten() {
        let id = unsafe { crate::mmio::read32(node.base as usize + VIRTIO_MMIO_DEVICE_ID) };
        if id == device_id {
            return Some(*node);
        }
    }
    None
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    extern crate std;
    use super::*;
    use std::vec::Vec;

    const FDT_BEGIN_NODE: u32 = 1;
    const FDT_END_NODE: u32 = 2;
    const FDT_PROP: u32 = 3;
    const FDT_END: u32 = 9;

    struct DtbBuilder {
        structure: Vec<u8>,
        strings: Vec<u8>,
    }

    impl DtbBuilder {
        fn new() -> Self {
            Self {
                structure: Vec::new(),
                strings: Vec::new(),
            }
        }

        fn token(&mut self, t: u32) {
            self.structure.extend_from_slice(&t.to_be_bytes());
        }

        fn begin_node(&mut self, name: &str) {
            self.token(FDT_BEGIN_NODE);
            self.structure.extend_from_slice(name.as_bytes());
            self.structure.push(0);
            while self.structure.len() % 4 != 0 {
                self.structure.push(0);
            }
        }

        fn end_node(&mut self) {
            self.token(FDT_END_NODE);
        }

        fn prop(&mut self, name: &str, value: &[u8]) {
            let nameoff = self.strings.len() as u32;
            self.strings.extend_from_slice(name.as_bytes());
            self.strings.push(0);

            self.token(FDT_PROP);
            self.structure
                .extend_from_slice(&(value.len() as u32).to_be_bytes());
            self.structure.extend_from_slice(&nameoff.to_be_bytes());
            self.structure.extend_from_slice(value);
            while self.structure.len() % 4 != 0 {
                self.structure.push(0);
            }
        }

        fn build(mut self) -> Vec<u8> {
            self.token(FDT_END);

            let header_len = 40;
            let rsvmap_len = 16;
            let off_dt_struct = header_len + rsvmap_len;
            let off_dt_strings = off_dt_struct + self.structure.len();
            let totalsize = off_dt_strings + self.strings.len();

            let mut out = Vec::with_capacity(totalsize);
            for word in [
                0xd00d_feedu32,
                totalsize as u32,
                off_dt_struct as u32,
                off_dt_strings as u32,
                header_len as u32, // off_mem_rsvmap
                17,                // version
                16,                // last_comp_version
                0,                 // boot_cpuid_phys
                self.strings.len() as u32,
                self.structure.len() as u32,
            ] {
                out.extend_from_slice(&word.to_be_bytes());
            }
            out.extend_from_slice(&[0u8; 16]); // empty reservation block
            out.extend_from_slice(&self.structure);
            out.extend_from_slice(&self.strings);
            out
        }
    }

    fn reg_cells(base: u64, size: u64) -> [u8; 16] {
        let mut v = [0u8; 16];
        v[..8].copy_from_slice(&base.to_be_bytes());
        v[8..].copy_from_slice(&size.to_be_bytes());
        v
    }

    #[test]
    fn test_memory_region_big_endian_parse() {
        let mut b = DtbBuilder::new();
        b.begin_node("");
        b.begin_node("memory@40000000");
        b.prop("device_type", b"memory\0");
        b.prop("reg", &reg_cells(0x4000_0000, 0x4000_0000));
        b.end_node();
        b.end_node();
        let dtb = b.build();

        let region = get_memory_region(&dtb).unwrap();
        assert_eq!(region.base, 0x4000_0000);
        assert_eq!(region.size, 0x4000_0000);
    }

    #[test]
    fn test_memory_missing() {
        let mut b = DtbBuilder::new();
        b.begin_node("");
        b.begin_node("chosen");
        b.end_node();
        b.end_node();
        let dtb = b.build();

        assert_eq!(get_memory_region(&dtb), Err(FdtError::MemoryMissing));
    }

    #[test]
    fn test_invalid_header() {
        assert_eq!(
            get_memory_region(&[0u8; 64]),
            Err(FdtError::InvalidHeader)
        );
    }

    #[test]
    fn test_virtio_mmio_nodes() {
        let mut b = DtbBuilder::new();
        b.begin_node("");
        b.begin_node("virtio_mmio@a000000");
        b.prop("reg", &reg_cells(0x0a00_0000, 0x200));
        // GIC cells: SPI(0), number 16, level-triggered
        let mut irq = Vec::new();
        for cell in [0u32, 16, 4] {
            irq.extend_from_slice(&cell.to_be_bytes());
        }
        b.prop("interrupts", &irq);
        b.end_node();
        b.begin_node("virtio_mmio@a000200");
        b.prop("reg", &reg_cells(0x0a00_0200, 0x200));
        b.end_node();
        b.end_node();
        let dtb = b.build();

        let mut nodes = [None; 16];
        let count = virtio_mmio_nodes(&dtb, &mut nodes);
        assert_eq!(count, 2);
        let first = nodes[0].unwrap();
        assert_eq!(first.base, 0x0a00_0000);
        assert_eq!(first.size, 0x200);
        assert_eq!(first.irq, 48);
        assert_eq!(nodes[1].unwrap().irq, 0);
    }
}
