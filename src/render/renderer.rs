//! Canvas-to-ANSI rendering.
//!
//! Turns a composed RGB canvas into a newline-separated ANSI string matched
//! to one client's capability snapshot. Half-block mode consumes two pixel
//! rows per character cell; the other modes consume one.

use crate::error::RenderError;
use crate::video::frame::Canvas;

use super::dither::DitherBuffer;
use super::palette::PaletteLut;
use super::term_color::{luminance, SgrEmitter};
use super::{ColorLevel, RenderMode};

/// Upper half block: foreground paints the top pixel, background the bottom.
pub const HALF_BLOCK: &str = "\u{2580}";

/// Rough per-cell output estimate used to presize the frame buffer.
const BYTES_PER_CELL_ESTIMATE: usize = 12;

/// Render a canvas against a capability snapshot.
///
/// Fails with [`RenderError::NotReady`] until the palette LUT has been
/// built, and with [`RenderError::BadCanvas`] when the canvas geometry does
/// not match the mode (half-block needs an even pixel height).
pub fn render_canvas(
    canvas: &Canvas,
    color_level: ColorLevel,
    render_mode: RenderMode,
    palette: &PaletteLut,
    dither: Option<&mut DitherBuffer>,
) -> Result<String, RenderError> {
    if !palette.is_initialized() {
        return Err(RenderError::NotReady);
    }
    if canvas.width == 0 || canvas.height == 0 {
        return Err(RenderError::BadCanvas(canvas.width, canvas.height));
    }
    // Half-block needs color to be worth anything; monochrome terminals get
    // plain glyph rows instead.
    let mode = if color_level == ColorLevel::Mono {
        RenderMode::Foreground
    } else {
        render_mode
    };
    if mode == RenderMode::HalfBlock && canvas.height % 2 != 0 {
        return Err(RenderError::BadCanvas(canvas.width, canvas.height));
    }

    // The 16-color tier dithers a working copy of the pixels first; the
    // quantizer maps the diffused values back onto exact palette colors.
    let dithered;
    let canvas = if color_level == ColorLevel::Ansi16 {
        if let Some(buffer) = dither {
            let mut copy = canvas.clone();
            let (copy_width, copy_height) = (copy.width, copy.height);
            buffer.process(copy.pixels_mut(), copy_width, copy_height);
            dithered = copy;
            &dithered
        } else {
            canvas
        }
    } else {
        canvas
    };

    let rows = match mode {
        RenderMode::HalfBlock => canvas.height / 2,
        _ => canvas.height,
    };
    let mut emitter = SgrEmitter::new(
        color_level,
        rows * canvas.width * BYTES_PER_CELL_ESTIMATE,
    );

    for row in 0..rows {
        for x in 0..canvas.width {
            match mode {
                RenderMode::Foreground => {
                    let (r, g, b) = canvas.pixel(x, row);
                    emitter.set_fg(r, g, b);
                    emitter.push_glyph(palette.glyph(luminance(r, g, b)));
                }
                RenderMode::Background => {
                    let (r, g, b) = canvas.pixel(x, row);
                    emitter.set_bg(r, g, b);
                    emitter.push_glyph(palette.glyph(luminance(r, g, b)));
                }
                RenderMode::HalfBlock => {
                    let top = canvas.pixel(x, row * 2);
                    let bottom = canvas.pixel(x, row * 2 + 1);
                    emitter.set_fg(top.0, top.1, top.2);
                    emitter.set_bg(bottom.0, bottom.1, bottom.2);
                    emitter.push_glyph(HALF_BLOCK);
                }
            }
        }
        emitter.newline();
    }
    Ok(emitter.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::palette::STANDARD_PALETTE;

    fn palette() -> PaletteLut {
        PaletteLut::build(STANDARD_PALETTE).unwrap()
    }

    fn flat_canvas(w: usize, h: usize, rgb: (u8, u8, u8)) -> Canvas {
        let mut canvas = Canvas::new(w, h);
        for y in 0..h {
            for x in 0..w {
                canvas.set_pixel(x, y, rgb);
            }
        }
        canvas
    }

    #[test]
    fn test_uninitialized_palette_refused() {
        let canvas = Canvas::new(4, 4);
        let lut = PaletteLut::empty();
        assert_eq!(
            render_canvas(&canvas, ColorLevel::Mono, RenderMode::Foreground, &lut, None),
            Err(RenderError::NotReady)
        );
    }

    #[test]
    fn test_mono_renders_bare_glyphs() {
        let canvas = flat_canvas(4, 2, (0, 0, 0));
        let out =
            render_canvas(&canvas, ColorLevel::Mono, RenderMode::Foreground, &palette(), None)
                .unwrap();
        // Black maps to the darkest glyph (space); two rows of four.
        assert_eq!(out, "    \n    \n\x1b[0m");
    }

    #[test]
    fn test_half_block_geometry() {
        // An 80x48 canvas at half-block yields 24 lines of 80 half-block
        // glyphs and a final reset.
        let canvas = flat_canvas(80, 48, (10, 20, 30));
        let out = render_canvas(
            &canvas,
            ColorLevel::TrueColor,
            RenderMode::HalfBlock,
            &palette(),
            None,
        )
        .unwrap();
        assert_eq!(out.matches(HALF_BLOCK).count(), 80 * 24);
        let lines: Vec<&str> = out.trim_end_matches("\x1b[0m").trim_end().split('\n').collect();
        assert_eq!(lines.len(), 24);
        for line in lines {
            assert_eq!(line.matches(HALF_BLOCK).count(), 80);
        }
        assert!(out.ends_with("\x1b[0m"));
    }

    #[test]
    fn test_half_block_odd_height_rejected() {
        let canvas = Canvas::new(8, 7);
        assert_eq!(
            render_canvas(
                &canvas,
                ColorLevel::TrueColor,
                RenderMode::HalfBlock,
                &palette(),
                None
            ),
            Err(RenderError::BadCanvas(8, 7))
        );
    }

    #[test]
    fn test_half_block_colors_top_and_bottom() {
        let mut canvas = Canvas::new(1, 2);
        canvas.set_pixel(0, 0, (255, 0, 0));
        canvas.set_pixel(0, 1, (0, 0, 255));
        let out = render_canvas(
            &canvas,
            ColorLevel::TrueColor,
            RenderMode::HalfBlock,
            &palette(),
            None,
        )
        .unwrap();
        assert!(out.contains("\x1b[38;2;255;0;0m"));
        assert!(out.contains("\x1b[48;2;0;0;255m"));
    }

    #[test]
    fn test_foreground_run_coalescing() {
        let canvas = flat_canvas(10, 1, (200, 200, 200));
        let out = render_canvas(
            &canvas,
            ColorLevel::TrueColor,
            RenderMode::Foreground,
            &palette(),
            None,
        )
        .unwrap();
        assert_eq!(out.matches("\x1b[38;2;200;200;200m").count(), 1);
    }

    #[test]
    fn test_background_mode_uses_bg_sgr() {
        let canvas = flat_canvas(2, 1, (1, 2, 3));
        let out = render_canvas(
            &canvas,
            ColorLevel::TrueColor,
            RenderMode::Background,
            &palette(),
            None,
        )
        .unwrap();
        assert!(out.contains("\x1b[48;2;1;2;3m"));
        assert!(!out.contains("\x1b[38;2"));
    }

    #[test]
    fn test_16color_dither_output_renders() {
        let mut canvas = Canvas::new(8, 4);
        for y in 0..4 {
            for x in 0..8 {
                canvas.set_pixel(x, y, (160, 160, 160));
            }
        }
        let mut dither = DitherBuffer::new();
        let out = render_canvas(
            &canvas,
            ColorLevel::Ansi16,
            RenderMode::Foreground,
            &palette(),
            Some(&mut dither),
        )
        .unwrap();
        // Dithered midtone gray must alternate between the two gray tiers.
        assert!(out.contains("\x1b[90m") || out.contains("\x1b[37m"));
        assert!(out.ends_with("\x1b[0m"));
    }

    #[test]
    fn test_mono_half_block_degrades_to_glyph_rows() {
        let canvas = flat_canvas(4, 4, (255, 255, 255));
        let out =
            render_canvas(&canvas, ColorLevel::Mono, RenderMode::HalfBlock, &palette(), None)
                .unwrap();
        // Four rows, one glyph per pixel, no escape codes before the reset.
        assert_eq!(out, "@@@@\n@@@@\n@@@@\n@@@@\n\x1b[0m");
    }
}
