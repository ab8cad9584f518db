//! Synchronous virtio-gpu driver.
//!
//! Bring-up order: probe the PCI function, walk its capabilities, run the
//! status sequence, then issue GET_DISPLAY_INFO, allocate the framebuffer,
//! RESOURCE_CREATE_2D, RESOURCE_ATTACH_BACKING, an initial transfer/flush,
//! and SET_SCANOUT if any scanout reported enabled. All buffers are
//! permanent 4 KiB pages reused for every command.

use crate::protocol::{
    CmdResourceAttachBacking, CmdResourceCreate2d, CmdResourceFlush, CmdSetScanout,
    CmdTransferToHost2d, CtrlHeader, CtrlType, MemEntry, Rect, RespDisplayInfo,
};
use bytemuck::Pod;
use craybond_hal::allocator::{palloc, palloc_zeroed};
use craybond_pci::PciConfigSpace;
use craybond_virtio::{DescFlags, TransportError, VirtioPciDevice};

/// Device type for GPUs on the virtio PCI bus.
pub const GPU_DEVICE_TYPE: u16 = 16;

/// The single 2D resource this driver manages.
pub const GPU_RESOURCE_ID: u32 = 1;

/// B8G8R8A8 unorm.
pub const FORMAT_B8G8R8A8: u32 = 1;

const PAGE: u64 = 4096;
const BYTES_PER_PIXEL: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuError {
    Transport(TransportError),
}

impl From<TransportError> for GpuError {
    fn from(e: TransportError) -> Self {
        GpuError::Transport(e)
    }
}

/// Display mode resolved from a GET_DISPLAY_INFO response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayChoice {
    pub width: u32,
    pub height: u32,
    pub scanout_id: u32,
    pub scanout_found: bool,
}

/// Pick the first enabled scanout; without one, keep the requested mode
/// and remember that SET_SCANOUT must be skipped.
pub fn resolve_display(
    resp: &RespDisplayInfo,
    default_width: u32,
    default_height: u32,
) -> DisplayChoice {
    for (i, mode) in resp.pmodes.iter().enumerate() {
        if mode.enabled != 0 {
            return DisplayChoice {
                width: mode.rect.width,
                height: mode.rect.height,
                scanout_id: i as u32,
                scanout_found: true,
            };
        }
    }
    DisplayChoice {
        width: default_width,
        height: default_height,
        scanout_id: 0,
        scanout_found: false,
    }
}

pub struct VirtioGpu {
    transport: VirtioPciDevice,
    cmd_buf: u64,
    resp_buf: u64,
    disp_buf: u64,
    display: DisplayChoice,
    framebuffer: u64,
    fb_size: usize,
}

impl VirtioGpu {
    /// Probe and fully initialize the device. `width`/`height` are the
    /// fallback mode when no scanout is enabled.
    pub fn init(config: &PciConfigSpace, width: u32, height: u32) -> Result<Self, GpuError> {
        let mut transport = VirtioPciDevice::probe(config, GPU_DEVICE_TYPE)?;

        let desc = palloc_zeroed(PAGE);
        let avail = palloc_zeroed(PAGE);
        let used = palloc_zeroed(PAGE);
        transport.start(desc, avail, used)?;

        let mut gpu = Self {
            transport,
            cmd_buf: palloc_zeroed(PAGE),
            resp_buf: palloc_zeroed(PAGE),
            disp_buf: palloc_zeroed(core::mem::size_of::<RespDisplayInfo>() as u64),
            display: DisplayChoice {
                width,
                height,
                scanout_id: 0,
                scanout_found: false,
            },
            framebuffer: 0,
            fb_size: 0,
        };

        gpu.query_display_info(width, height);

        gpu.fb_size =
            (gpu.display.width as u64 * gpu.display.height as u64 * BYTES_PER_PIXEL) as usize;
        gpu.framebuffer = palloc(gpu.fb_size as u64);

        gpu.create_2d_resource();
        gpu.attach_backing();
        gpu.transfer_to_host();
        gpu.flush_resource();

        if gpu.display.scanout_found {
            gpu.set_scanout();
        } else {
            log::warn!("[virtio-gpu] no enabled scanout; running headless at requested mode");
        }

        log::info!(
            "[virtio-gpu] ready, {}x{} scanout {} fb {:#x}",
            gpu.display.width,
            gpu.display.height,
            gpu.display.scanout_id,
            gpu.framebuffer
        );
        Ok(gpu)
    }

    /// Serialize `cmd` into the command page and run it synchronously.
    /// Returns the response header from the response page.
    fn send<T: Pod>(&mut self, cmd: &T, extra: &[u8], resp_addr: u64, resp_len: u32) -> CtrlHeader {
        let bytes = bytemuck::bytes_of(cmd);
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), self.cmd_buf as *mut u8, bytes.len());
            core::ptr::copy_nonoverlapping(
                extra.as_ptr(),
                (self.cmd_buf as usize + bytes.len()) as *mut u8,
                extra.len(),
            );
            core::ptr::write_bytes(resp_addr as *mut u8, 0, resp_len as usize);
        }

        self.transport.send_command(
            self.cmd_buf,
            (bytes.len() + extra.len()) as u32,
            resp_addr,
            resp_len,
            DescFlags::NEXT,
        );

        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
        unsafe { core::ptr::read_volatile(resp_addr as *const CtrlHeader) }
    }

    fn send_expect_ok<T: Pod>(&mut self, name: &str, cmd: &T, extra: &[u8]) {
        let resp_buf = self.resp_buf;
        let resp = self.send(cmd, extra, resp_buf, CtrlHeader::SIZE as u32);
        if resp.is_ok() {
            log::debug!("[virtio-gpu] {} ok", name);
        } else {
            log::warn!("[virtio-gpu] {} failed: {:#x}", name, resp.ctrl_type);
        }
    }

    fn query_display_info(&mut self, default_width: u32, default_height: u32) {
        let cmd = CtrlHeader::new(CtrlType::GetDisplayInfo);
        let disp_buf = self.disp_buf;
        self.send(
            &cmd,
            &[],
            disp_buf,
            core::mem::size_of::<RespDisplayInfo>() as u32,
        );

        let resp = unsafe { core::ptr::read_volatile(self.disp_buf as *const RespDisplayInfo) };
        self.display = resolve_display(&resp, default_width, default_height);
        if self.display.scanout_found {
            log::info!(
                "[virtio-gpu] scanout {} enabled, {}x{}",
                self.display.scanout_id,
                self.display.width,
                self.display.height
            );
        }
    }

    fn create_2d_resource(&mut self) {
        let cmd = CmdResourceCreate2d {
            header: CtrlHeader::new(CtrlType::ResourceCreate2d),
            resource_id: GPU_RESOURCE_ID,
            format: FORMAT_B8G8R8A8,
            width: self.display.width,
            height: self.display.height,
        };
        self.send_expect_ok("RESOURCE_CREATE_2D", &cmd, &[]);
    }

    fn attach_backing(&mut self) {
        let cmd = CmdResourceAttachBacking {
            header: CtrlHeader::new(CtrlType::ResourceAttachBacking),
            resource_id: GPU_RESOURCE_ID,
            nr_entries: 1,
        };
        let entry = MemEntry {
            addr: self.framebuffer,
            length: self.fb_size as u32,
            padding: 0,
        };
        self.send_expect_ok("RESOURCE_ATTACH_BACKING", &cmd, bytemuck::bytes_of(&entry));
    }

    fn set_scanout(&mut self) {
        let cmd = CmdSetScanout {
            header: CtrlHeader::new(CtrlType::SetScanout),
            rect: Rect::from_size(self.display.width, self.display.height),
            scanout_id: self.display.scanout_id,
            resource_id: GPU_RESOURCE_ID,
        };
        self.send_expect_ok("SET_SCANOUT", &cmd, &[]);
    }

    fn transfer_to_host(&mut self) {
        let cmd = CmdTransferToHost2d {
            header: CtrlHeader::new(CtrlType::TransferToHost2d),
            rect: Rect::from_size(self.display.width, self.display.height),
            offset: 0,
            resource_id: GPU_RESOURCE_ID,
            padding: 0,
        };
        self.send_expect_ok("TRANSFER_TO_HOST_2D", &cmd, &[]);
    }

    fn flush_resource(&mut self) {
        let cmd = CmdResourceFlush {
            header: CtrlHeader::new(CtrlType::ResourceFlush),
            rect: Rect::from_size(self.display.width, self.display.height),
            resource_id: GPU_RESOURCE_ID,
            padding: 0,
        };
        self.send_expect_ok("RESOURCE_FLUSH", &cmd, &[]);
    }

    /// Push the framebuffer to the host and flush it to the display.
    pub fn flush(&mut self) {
        self.transfer_to_host();
        self.flush_resource();
    }

    /// Fill every pixel with `color` (B8G8R8A8 word) and flush.
    pub fn clear(&mut self, color: u32) {
        let pixels = (self.fb_size / 4) as usize;
        let fb = self.framebuffer as *mut u32;
        for i in 0..pixels {
            unsafe {
                core::ptr::write_volatile(fb.add(i), color);
            }
        }
        self.flush();
    }

    pub fn framebuffer(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.framebuffer as *mut u8, self.fb_size) }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.display.width, self.display.height)
    }

    pub fn scanout_found(&self) -> bool {
        self.display.scanout_found
    }

    pub fn framebuffer_size(&self) -> usize {
        self.fb_size
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
