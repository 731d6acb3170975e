//! Floyd-Steinberg error diffusion for the 16-color tier.
//!
//! Quantization error spreads to the right, down-left, down and down-right
//! neighbours with weights 7/16, 3/16, 5/16, 1/16. The residual buffer is
//! retained between frames to avoid per-frame allocation.

use super::term_color::{get_16color_rgb, rgb_to_16color};

/// Reusable per-pixel residual error buffer.
pub struct DitherBuffer {
    width: usize,
    height: usize,
    errors: Vec<[f32; 3]>,
}

impl DitherBuffer {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            errors: Vec::new(),
        }
    }

    /// Quantize `pixels` (RGB24, row-major) in place to exact 16-color
    /// palette values, diffusing the error.
    pub fn process(&mut self, pixels: &mut [u8], width: usize, height: usize) {
        if pixels.len() < width * height * 3 {
            return;
        }
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.errors.clear();
        }
        self.errors.resize(width * height, [0.0; 3]);
        self.errors.fill([0.0; 3]);

        for y in 0..height {
            for x in 0..width {
                let pi = (y * width + x) * 3;
                let err = self.errors[y * width + x];
                let adjusted = [
                    (pixels[pi] as f32 + err[0]).clamp(0.0, 255.0),
                    (pixels[pi + 1] as f32 + err[1]).clamp(0.0, 255.0),
                    (pixels[pi + 2] as f32 + err[2]).clamp(0.0, 255.0),
                ];
                let idx = rgb_to_16color(adjusted[0] as u8, adjusted[1] as u8, adjusted[2] as u8);
                let (qr, qg, qb) = get_16color_rgb(idx);
                pixels[pi] = qr;
                pixels[pi + 1] = qg;
                pixels[pi + 2] = qb;

                let residual = [
                    adjusted[0] - qr as f32,
                    adjusted[1] - qg as f32,
                    adjusted[2] - qb as f32,
                ];
                self.spread(x, y, residual);
            }
        }
    }

    fn spread(&mut self, x: usize, y: usize, residual: [f32; 3]) {
        let mut add = |x: isize, y: isize, weight: f32| {
            if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
                return;
            }
            let slot = &mut self.errors[y as usize * self.width + x as usize];
            for c in 0..3 {
                slot[c] += residual[c] * weight;
            }
        };
        let (x, y) = (x as isize, y as isize);
        add(x + 1, y, 7.0 / 16.0);
        add(x - 1, y + 1, 3.0 / 16.0);
        add(x, y + 1, 5.0 / 16.0);
        add(x + 1, y + 1, 1.0 / 16.0);
    }
}

impl Default for DitherBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_exact_palette_colors() {
        let mut pixels: Vec<u8> = (0..8 * 4 * 3).map(|i| (i * 7 % 256) as u8).collect();
        let mut dither = DitherBuffer::new();
        dither.process(&mut pixels, 8, 4);
        for px in pixels.chunks_exact(3) {
            let idx = rgb_to_16color(px[0], px[1], px[2]);
            let (r, g, b) = get_16color_rgb(idx);
            assert_eq!((px[0], px[1], px[2]), (r, g, b));
        }
    }

    #[test]
    fn test_exact_palette_input_unchanged() {
        // A flat buffer of an exact palette color accumulates no error.
        let (r, g, b) = get_16color_rgb(9);
        let mut pixels: Vec<u8> = [r, g, b].repeat(16);
        let mut dither = DitherBuffer::new();
        dither.process(&mut pixels, 4, 4);
        assert_eq!(pixels, [r, g, b].repeat(16));
    }

    #[test]
    fn test_midtone_produces_mixed_pattern() {
        // A mid gray between palette entries must dither into at least two
        // distinct output colors.
        let mut pixels: Vec<u8> = [160u8, 160, 160].repeat(64);
        let mut dither = DitherBuffer::new();
        dither.process(&mut pixels, 8, 8);
        let first: Vec<u8> = pixels[..3].to_vec();
        assert!(pixels.chunks_exact(3).any(|px| px != &first[..]));
    }

    #[test]
    fn test_resize_between_frames() {
        let mut dither = DitherBuffer::new();
        let mut a = vec![100u8; 4 * 2 * 3];
        dither.process(&mut a, 4, 2);
        let mut b = vec![100u8; 2 * 6 * 3];
        dither.process(&mut b, 2, 6);
        assert_eq!(b.len(), 2 * 6 * 3);
    }
}
