//! Graphics facade.
//!
//! Owns the active GPU backend (virtio-gpu-pci first, ramfb as fallback)
//! and dispatches every draw primitive to it through one framebuffer view.
//! Both backends expose a B/G/R/X byte layout, so a single `DrawTarget`
//! implementation covers them.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod ramfb;

use craybond_hal::IrqSafeLock;
use craybond_pci::PciConfigSpace;
use craybond_virtio_gpu::VirtioGpu;
use embedded_graphics::mono_font::ascii::{FONT_7X13, FONT_9X18, FONT_10X20};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};
use ramfb::RamFb;

/// Active backend, selected once at boot.
pub enum Backend {
    VirtioGpuPci(VirtioGpu),
    Ramfb(RamFb),
}

pub struct Graphics {
    backend: Backend,
    width: u32,
    height: u32,
}

static DISPLAY: IrqSafeLock<Option<Graphics>> = IrqSafeLock::new(None);

/// Bring up a backend at the preferred mode. Returns false when neither
/// driver finds its device; the console stays serial-only in that case.
pub fn init(config: &PciConfigSpace, width: u32, height: u32) -> bool {
    let backend = match VirtioGpu::init(config, width, height) {
        Ok(gpu) => Some(Backend::VirtioGpuPci(gpu)),
        Err(err) => {
            log::warn!("[gpu] virtio-gpu unavailable ({:?}), trying ramfb", err);
            match RamFb::init(width, height) {
                Ok(fb) => Some(Backend::Ramfb(fb)),
                Err(_) => None,
            }
        }
    };

    let Some(mut backend) = backend else {
        log::warn!("[gpu] no display backend, console is serial-only");
        return false;
    };

    let (width, height) = match &mut backend {
        Backend::VirtioGpuPci(gpu) => gpu.dimensions(),
        Backend::Ramfb(fb) => fb.dimensions(),
    };

    *DISPLAY.lock() = Some(Graphics {
        backend,
        width,
        height,
    });
    true
}

pub fn ready() -> bool {
    DISPLAY.lock().is_some()
}

pub fn screen_size() -> (u32, u32) {
    DISPLAY
        .lock()
        .as_ref()
        .map(|g| (g.width, g.height))
        .unwrap_or((0, 0))
}

/// Glyph cell for the font tier chosen by `scale`.
pub fn char_size(scale: u32) -> (u32, u32) {
    let font = font_for_scale(scale);
    (
        font.character_size.width + font.character_spacing,
        font.character_size.height,
    )
}

fn font_for_scale(scale: u32) -> &'static MonoFont<'static> {
    match scale {
        0 | 1 => &FONT_7X13,
        2 => &FONT_9X18,
        _ => &FONT_10X20,
    }
}

/// Run `op` against the active backend; a no-op when no display is up.
fn with_display(op: impl FnOnce(&mut Graphics)) {
    if let Some(g) = DISPLAY.lock().as_mut() {
        op(g);
    }
}

/// Like `with_display`, but never blocks on the display lock. The panic
/// path uses this so a fault inside a draw call cannot deadlock.
fn with_display_try(op: impl FnOnce(&mut Graphics)) {
    if let Some(mut guard) = DISPLAY.try_lock() {
        if let Some(g) = guard.as_mut() {
            op(g);
        }
    }
}

pub fn clear(color: Rgb888) {
    with_display(|g| g.clear(color));
}

pub fn flush() {
    with_display(|g| g.flush());
}

pub fn draw_pixel(x: i32, y: i32, color: Rgb888) {
    with_display(|g| g.draw(|view| Pixel(Point::new(x, y), color).draw(view)));
}

pub fn draw_line(x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb888) {
    with_display(|g| {
        g.draw(|view| {
            Line::new(Point::new(x0, y0), Point::new(x1, y1))
                .into_styled(PrimitiveStyle::with_stroke(color, 1))
                .draw(view)
        })
    });
}

pub fn fill_rect(x: i32, y: i32, width: u32, height: u32, color: Rgb888) {
    with_display(|g| {
        g.draw(|view| {
            Rectangle::new(Point::new(x, y), Size::new(width, height))
                .into_styled(PrimitiveStyle::with_fill(color))
                .draw(view)
        })
    });
}

pub fn draw_text(text: &str, x: i32, y: i32, scale: u32, color: Rgb888) {
    with_display(|g| g.draw_text(text, x, y, scale, color));
}

/// Panic screen: blue field, white message. Uses the non-blocking lock and
/// skips silently when no display is up.
pub fn panic_screen(lines: &[&str]) {
    with_display_try(|g| {
        g.clear(Rgb888::BLUE);
        let (_, line_height) = char_size(3);
        let mut y = 10;
        for line in lines {
            g.draw_text(line, 10, y, 3, Rgb888::WHITE);
            y += line_height as i32 + 4;
        }
        g.flush();
    });
}

impl Graphics {
    fn framebuffer_view(&mut self) -> FramebufferView<'_> {
        let (width, height) = (self.width, self.height);
        let fb = match &mut self.backend {
            Backend::VirtioGpuPci(gpu) => gpu.framebuffer(),
            Backend::Ramfb(fb) => fb.framebuffer(),
        };
        FramebufferView { fb, width, height }
    }

    /// Run a drawing primitive against the framebuffer. Callers batch
    /// primitives and `flush` once; nothing reaches the host until then.
    fn draw(&mut self, op: impl FnOnce(&mut FramebufferView<'_>) -> Result<(), core::convert::Infallible>) {
        let mut view = self.framebuffer_view();
        let _ = op(&mut view);
    }

    fn draw_text(&mut self, text: &str, x: i32, y: i32, scale: u32, color: Rgb888) {
        let style = MonoTextStyle::new(font_for_scale(scale), color);
        self.draw(|view| {
            Text::with_baseline(text, Point::new(x, y), style, Baseline::Top)
                .draw(view)
                .map(|_| ())
        });
    }

    fn clear(&mut self, color: Rgb888) {
        // The virtio backend has a native clear that fills and flushes in
        // one pass; ramfb needs no flush at all.
        if let Backend::VirtioGpuPci(gpu) = &mut self.backend {
            gpu.clear(u32::from_le_bytes([color.b(), color.g(), color.r(), 255]));
            return;
        }
        let mut view = self.framebuffer_view();
        let _ = view.clear(color);
    }

    fn flush(&mut self) {
        match &mut self.backend {
            Backend::VirtioGpuPci(gpu) => gpu.flush(),
            Backend::Ramfb(_) => {}
        }
    }
}

/// Byte-level framebuffer access shared by both backends: 4 bytes per
/// pixel, B/G/R/X order.
pub struct FramebufferView<'a> {
    fb: &'a mut [u8],
    width: u32,
    height: u32,
}

impl<'a> FramebufferView<'a> {
    pub fn new(fb: &'a mut [u8], width: u32, height: u32) -> Self {
        Self { fb, width, height }
    }
}

impl DrawTarget for FramebufferView<'_> {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0
                && point.x < self.width as i32
                && point.y >= 0
                && point.y < self.height as i32
            {
                let idx = (point.y as usize * self.width as usize + point.x as usize) * 4;
                if idx + 3 < self.fb.len() {
                    self.fb[idx] = color.b();
                    self.fb[idx + 1] = color.g();
                    self.fb[idx + 2] = color.r();
                    self.fb[idx + 3] = 255;
                }
            }
        }
        Ok(())
    }
}

impl OriginDimensions for FramebufferView<'_> {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    extern crate std;
    use super::*;

    #[test]
    fn test_pixel_byte_order() {
        let mut fb = vec![0u8; 4 * 4 * 4];
        let mut view = FramebufferView::new(&mut fb, 4, 4);
        Pixel(Point::new(1, 2), Rgb888::new(0x11, 0x22, 0x33))
            .draw(&mut view)
            .unwrap();
        let idx = (2 * 4 + 1) * 4;
        assert_eq!(&fb[idx..idx + 4], &[0x33, 0x22, 0x11, 0xFF]);
    }

    #[test]
    fn test_out_of_bounds_pixels_ignored() {
        let mut fb = vec![0u8; 4 * 4 * 4];
        let mut view = FramebufferView::new(&mut fb, 4, 4);
        for p in [
            Point::new(-1, 0),
            Point::new(0, -1),
            Point::new(4, 0),
            Point::new(0, 4),
        ] {
            Pixel(p, Rgb888::WHITE).draw(&mut view).unwrap();
        }
        assert!(fb.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fill_rect_covers_exact_area() {
        let mut fb = vec![0u8; 8 * 8 * 4];
        let mut view = FramebufferView::new(&mut fb, 8, 8);
        Rectangle::new(Point::new(2, 2), Size::new(3, 2))
            .into_styled(PrimitiveStyle::with_fill(Rgb888::RED))
            .draw(&mut view)
            .unwrap();

        let mut painted = 0;
        for y in 0..8 {
            for x in 0..8 {
                let idx = (y * 8 + x) * 4;
                let lit = fb[idx + 2] == 255;
                if lit {
                    painted += 1;
                    assert!((2..5).contains(&x) && (2..4).contains(&y));
                }
            }
        }
        assert_eq!(painted, 6);
    }

    #[test]
    fn test_char_size_tiers() {
        assert_eq!(char_size(1).1, 13);
        assert_eq!(char_size(2).1, 18);
        assert_eq!(char_size(3).1, 20);
        assert!(char_size(1).0 >= 7);
    }
}
