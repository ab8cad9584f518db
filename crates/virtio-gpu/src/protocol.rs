//! GPU wire protocol structures.
//!
//! All structs are `repr(C)` and `Pod` so the driver can serialize them
//! straight into the command page. Command codes follow the platform's
//! control numbering.

use bytemuck::{Pod, Zeroable};

/// Control command and response type values.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlType {
    GetDisplayInfo = 0x0100,
    ResourceCreate2d = 0x0101,
    SetScanout = 0x0102,
    ResourceFlush = 0x0103,
    TransferToHost2d = 0x0104,
    ResourceAttachBacking = 0x0106,

    /// Success response carrying no payload.
    OkNoData = 0x1100,
    /// Success response carrying display info.
    OkDisplayInfo = 0x1101,
}

/// Control header shared by every command and response.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct CtrlHeader {
    pub ctrl_type: u32,
    pub flags: u32,
    pub fence_id: u64,
    pub ctx_id: u32,
    pub padding: u32,
}

impl CtrlHeader {
    pub const SIZE: usize = core::mem::size_of::<CtrlHeader>();

    pub const fn new(ctrl_type: CtrlType) -> Self {
        Self {
            ctrl_type: ctrl_type as u32,
            flags: 0,
            fence_id: 0,
            ctx_id: 0,
            padding: 0,
        }
    }

    /// Response carries the no-data success code.
    pub fn is_ok(&self) -> bool {
        self.ctrl_type == CtrlType::OkNoData as u32
    }
}

/// Rectangle in display coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Maximum scanouts a device may report.
pub const MAX_SCANOUTS: usize = 16;

/// One scanout's mode in the display-info response.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DisplayOne {
    pub rect: Rect,
    pub enabled: u32,
    pub flags: u32,
}

/// Response to GET_DISPLAY_INFO.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RespDisplayInfo {
    pub header: CtrlHeader,
    pub pmodes: [DisplayOne; MAX_SCANOUTS],
}

impl Default for RespDisplayInfo {
    fn default() -> Self {
        Self {
            header: CtrlHeader::default(),
            pmodes: [DisplayOne::default(); MAX_SCANOUTS],
        }
    }
}

/// RESOURCE_CREATE_2D request.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CmdResourceCreate2d {
    pub header: CtrlHeader,
    pub resource_id: u32,
    pub format: u32,
    pub width: u32,
    pub height: u32,
}

/// RESOURCE_ATTACH_BACKING request header; `nr_entries` MemEntry records
/// follow it in the command buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CmdResourceAttachBacking {
    pub header: CtrlHeader,
    pub resource_id: u32,
    pub nr_entries: u32,
}

/// Guest memory entry for RESOURCE_ATTACH_BACKING.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MemEntry {
    pub addr: u64,
    pub length: u32,
    pub padding: u32,
}

/// SET_SCANOUT request.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CmdSetScanout {
    pub header: CtrlHeader,
    pub rect: Rect,
    pub scanout_id: u32,
    pub resource_id: u32,
}

/// TRANSFER_TO_HOST_2D request.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CmdTransferToHost2d {
    pub header: CtrlHeader,
    pub rect: Rect,
    pub offset: u64,
    pub resource_id: u32,
    pub padding: u32,
}

/// RESOURCE_FLUSH request.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CmdResourceFlush {
    pub header: CtrlHeader,
    pub rect: Rect,
    pub resource_id: u32,
    pub padding: u32,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(CtrlType::GetDisplayInfo as u32, 0x0100);
        assert_eq!(CtrlType::ResourceCreate2d as u32, 0x0101);
        assert_eq!(CtrlType::SetScanout as u32, 0x0102);
        assert_eq!(CtrlType::ResourceFlush as u32, 0x0103);
        assert_eq!(CtrlType::TransferToHost2d as u32, 0x0104);
        assert_eq!(CtrlType::ResourceAttachBacking as u32, 0x0106);
        assert_eq!(CtrlType::OkNoData as u32, 0x1100);
    }

    #[test]
    fn test_struct_sizes() {
        assert_eq!(CtrlHeader::SIZE, 24);
        assert_eq!(core::mem::size_of::<DisplayOne>(), 24);
        assert_eq!(
            core::mem::size_of::<RespDisplayInfo>(),
            24 + MAX_SCANOUTS * 24
        );
        assert_eq!(core::mem::size_of::<CmdResourceCreate2d>(), 40);
        assert_eq!(core::mem::size_of::<CmdResourceAttachBacking>(), 32);
        assert_eq!(core::mem::size_of::<MemEntry>(), 16);
        assert_eq!(core::mem::size_of::<CmdSetScanout>(), 48);
        assert_eq!(core::mem::size_of::<CmdTransferToHost2d>(), 56);
        assert_eq!(core::mem::size_of::<CmdResourceFlush>(), 48);
    }

    #[test]
    fn test_header_serializes_in_place() {
        let hdr = CtrlHeader::new(CtrlType::GetDisplayInfo);
        let bytes = bytemuck::bytes_of(&hdr);
        assert_eq!(&bytes[0..4], &0x0100u32.to_le_bytes());
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ok_check() {
        let mut hdr = CtrlHeader::new(CtrlType::GetDisplayInfo);
        assert!(!hdr.is_ok());
        hdr.ctrl_type = CtrlType::OkNoData as u32;
        assert!(hdr.is_ok());
    }
}
