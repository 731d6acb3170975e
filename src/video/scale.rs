//! Aspect-preserving fit math and nearest-neighbour blits.

use super::frame::{Canvas, VideoFrame};

/// A placement within a destination rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FittedRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Fit `src_w x src_h` into `dst_w x dst_h` preserving aspect ratio,
/// centered (letterboxed or pillarboxed as needed).
pub fn fit_rect(src_w: u32, src_h: u32, dst_w: usize, dst_h: usize) -> FittedRect {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return FittedRect {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
    }
    // Compare src_w/src_h against dst_w/dst_h without floats.
    let fit_to_width = (src_w as u64 * dst_h as u64) >= (src_h as u64 * dst_w as u64);
    let (width, height) = if fit_to_width {
        let h = ((src_h as u64 * dst_w as u64) / src_w as u64).max(1) as usize;
        (dst_w, h.min(dst_h))
    } else {
        let w = ((src_w as u64 * dst_h as u64) / src_h as u64).max(1) as usize;
        (w.min(dst_w), dst_h)
    };
    FittedRect {
        x: (dst_w - width) / 2,
        y: (dst_h - height) / 2,
        width,
        height,
    }
}

/// Nearest-neighbour blit of `frame` into `canvas` at `rect`. The rect is
/// clipped to the canvas bounds.
pub fn blit_scaled(canvas: &mut Canvas, frame: &VideoFrame, rect: FittedRect) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let max_x = canvas.width.min(rect.x + rect.width);
    let max_y = canvas.height.min(rect.y + rect.height);
    for dy in rect.y..max_y {
        let sy = ((dy - rect.y) as u64 * frame.height as u64 / rect.height as u64) as u32;
        let sy = sy.min(frame.height - 1);
        for dx in rect.x..max_x {
            let sx = ((dx - rect.x) as u64 * frame.width as u64 / rect.width as u64) as u32;
            let sx = sx.min(frame.width - 1);
            canvas.set_pixel(dx, dy, frame.pixel(sx, sy));
        }
    }
}
