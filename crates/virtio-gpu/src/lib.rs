//! VirtIO GPU 2D driver.
//!
//! Wire protocol structs plus a strictly synchronous driver: one control
//! queue, one resource, one guest framebuffer, every command followed by a
//! spin-wait for its response.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod driver;
pub mod protocol;

pub use driver::{DisplayChoice, GpuError, VirtioGpu, resolve_display};
pub use protocol::{CtrlHeader, CtrlType, DisplayOne, Rect, RespDisplayInfo};
