//! Boot splash, running as the first kernel process.
//!
//! Pure eye candy: clears the screen, draws the project name in the
//! middle, and walks a highlight line around it forever. Everything goes
//! through the graphics facade, so a serial-only boot turns this into a
//! busy loop of no-ops.

use craybond_gpu as gpu;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;

const TITLE: &str = "craybond";
const SUBTITLE: &str = "crayons are for losers";

#[unsafe(link_section = ".text.kbootscreen")]
extern "C" fn bootscreen() -> ! {
    let (width, height) = gpu::screen_size();
    let (cx, cy) = (width as i32 / 2, height as i32 / 2);

    gpu::clear(Rgb888::BLACK);
    draw_title(cx, cy);
    gpu::flush();

    let mut step: i32 = 0;
    loop {
        let radius = 120;
        let (x0, y0) = corner(step, cx, cy, radius);
        let (x1, y1) = corner(step + 1, cx, cy, radius);
        gpu::draw_line(x0, y0, x1, y1, Rgb888::WHITE);
        if step % 4 == 3 {
            // A full lap: blank the frame and start over.
            gpu::fill_rect(
                cx - radius - 2,
                cy - radius - 2,
                (radius * 2 + 4) as u32,
                (radius * 2 + 4) as u32,
                Rgb888::BLACK,
            );
            draw_title(cx, cy);
        }
        gpu::flush();
        step = step.wrapping_add(1);
        delay();
    }
}

fn draw_title(cx: i32, cy: i32) {
    let scale = 2;
    let (cw, ch) = gpu::char_size(scale);
    let title_x = cx - (TITLE.len() as i32 * cw as i32) / 2;
    gpu::draw_text(TITLE, title_x, cy - ch as i32, scale, Rgb888::WHITE);

    let (cw, ch2) = gpu::char_size(1);
    let sub_x = cx - (SUBTITLE.len() as i32 * cw as i32) / 2;
    gpu::draw_text(SUBTITLE, sub_x, cy + ch2 as i32, 1, Rgb888::CSS_GRAY);
}

fn corner(step: i32, cx: i32, cy: i32, radius: i32) -> (i32, i32) {
    match step.rem_euclid(4) {
        0 => (cx - radius, cy - radius),
        1 => (cx + radius, cy - radius),
        2 => (cx + radius, cy + radius),
        _ => (cx - radius, cy + radius),
    }
}

fn delay() {
    for _ in 0..5_000_000u64 {
        core::hint::spin_loop();
    }
}

/// Register the splash as a kernel process; it starts with the scheduler.
pub fn spawn() {
    if super::loader::create_kernel_process(bootscreen).is_none() {
        log::warn!("bootscreen process not created");
    }
}
