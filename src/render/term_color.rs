//! Color quantization and run-length SGR emission.
//!
//! The emitter buffers the current foreground/background state and writes a
//! fresh SGR sequence only when a pixel's *quantized* color differs from
//! the previous pixel's. Constant-color runs therefore cost zero escape
//! bytes per cell, which dominates on typical content.

use std::fmt::Write as _;

use super::ColorLevel;

/// Near-grayscale threshold for the 256-color tier: both channel deltas
/// must stay below this to land on the grayscale ramp.
pub const GRAYSCALE_THRESHOLD: i16 = 16;

/// Standard 16-color terminal palette (VGA intensities), indices 0-7
/// normal, 8-15 bright.
const ANSI16_RGB: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (128, 0, 0),
    (0, 128, 0),
    (128, 128, 0),
    (0, 0, 128),
    (128, 0, 128),
    (0, 128, 128),
    (192, 192, 192),
    (128, 128, 128),
    (255, 0, 0),
    (0, 255, 0),
    (255, 255, 0),
    (0, 0, 255),
    (255, 0, 255),
    (0, 255, 255),
    (255, 255, 255),
];

/// Integer luminance: `(77 R + 150 G + 29 B + 128) >> 8`.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

/// Quantize to the xterm 256-color space. Near-grayscale input lands on
/// the 24-step ramp (232-255); everything else on the 6x6x6 cube (16-231).
pub fn rgb_to_256color(r: u8, g: u8, b: u8) -> u8 {
    let (ri, gi, bi) = (r as i16, g as i16, b as i16);
    if (ri - gi).abs() < GRAYSCALE_THRESHOLD && (gi - bi).abs() < GRAYSCALE_THRESHOLD {
        let y = luminance(r, g, b) as u32;
        return (232 + (y * 24) / 256) as u8;
    }
    let scale = |c: u8| ((c as u32 * 5) + 127) / 255;
    (16 + 36 * scale(r) + 6 * scale(g) + scale(b)) as u8
}

/// Nearest of the 16 standard ANSI colors by squared RGB distance.
pub fn rgb_to_16color(r: u8, g: u8, b: u8) -> u8 {
    let mut best = 0u8;
    let mut best_dist = u32::MAX;
    for (i, &(pr, pg, pb)) in ANSI16_RGB.iter().enumerate() {
        let dr = r as i32 - pr as i32;
        let dg = g as i32 - pg as i32;
        let db = b as i32 - pb as i32;
        let dist = (dr * dr + dg * dg + db * db) as u32;
        if dist < best_dist {
            best_dist = dist;
            best = i as u8;
        }
    }
    best
}

/// RGB of a 16-color index. Out-of-range indices default to white.
pub fn get_16color_rgb(index: u8) -> (u8, u8, u8) {
    ANSI16_RGB
        .get(index as usize)
        .copied()
        .unwrap_or((255, 255, 255))
}

/// Foreground SGR code for a 16-color index (30-37 / 90-97). Out-of-range
/// indices default to white.
fn fg_code_16(index: u8) -> u8 {
    match index {
        0..=7 => 30 + index,
        8..=15 => 90 + index - 8,
        _ => 37,
    }
}

/// Background SGR code for a 16-color index (40-47 / 100-107). Out-of-range
/// indices default to black.
fn bg_code_16(index: u8) -> u8 {
    match index {
        0..=7 => 40 + index,
        8..=15 => 100 + index - 8,
        _ => 40,
    }
}

/// A color after quantization; the emitter's change-detection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantized {
    Direct(u8, u8, u8),
    Indexed(u8),
}

/// Run-length SGR emitter accumulating one rendered frame.
pub struct SgrEmitter {
    level: ColorLevel,
    out: String,
    last_fg: Option<Quantized>,
    last_bg: Option<Quantized>,
}

impl SgrEmitter {
    pub fn new(level: ColorLevel, capacity: usize) -> Self {
        Self {
            level,
            out: String::with_capacity(capacity),
            last_fg: None,
            last_bg: None,
        }
    }

    fn quantize(&self, r: u8, g: u8, b: u8) -> Quantized {
        match self.level {
            ColorLevel::TrueColor => Quantized::Direct(r, g, b),
            ColorLevel::Ansi256 => Quantized::Indexed(rgb_to_256color(r, g, b)),
            ColorLevel::Ansi16 => Quantized::Indexed(rgb_to_16color(r, g, b)),
            ColorLevel::Mono => Quantized::Indexed(0),
        }
    }

    /// Set the foreground color for subsequent glyphs. No output is
    /// produced unless the quantized color changed.
    pub fn set_fg(&mut self, r: u8, g: u8, b: u8) {
        if self.level == ColorLevel::Mono {
            return;
        }
        let q = self.quantize(r, g, b);
        if self.last_fg == Some(q) {
            return;
        }
        self.last_fg = Some(q);
        match q {
            Quantized::Direct(r, g, b) => {
                let _ = write!(self.out, "\x1b[38;2;{};{};{}m", r, g, b);
            }
            Quantized::Indexed(idx) => match self.level {
                ColorLevel::Ansi256 => {
                    let _ = write!(self.out, "\x1b[38;5;{}m", idx);
                }
                _ => {
                    let _ = write!(self.out, "\x1b[{}m", fg_code_16(idx));
                }
            },
        }
    }

    /// Set the background color for subsequent glyphs.
    pub fn set_bg(&mut self, r: u8, g: u8, b: u8) {
        if self.level == ColorLevel::Mono {
            return;
        }
        let q = self.quantize(r, g, b);
        if self.last_bg == Some(q) {
            return;
        }
        self.last_bg = Some(q);
        match q {
            Quantized::Direct(r, g, b) => {
                let _ = write!(self.out, "\x1b[48;2;{};{};{}m", r, g, b);
            }
            Quantized::Indexed(idx) => match self.level {
                ColorLevel::Ansi256 => {
                    let _ = write!(self.out, "\x1b[48;5;{}m", idx);
                }
                _ => {
                    let _ = write!(self.out, "\x1b[{}m", bg_code_16(idx));
                }
            },
        }
    }

    pub fn push_glyph(&mut self, glyph: &str) {
        self.out.push_str(glyph);
    }

    pub fn newline(&mut self) {
        self.out.push('\n');
    }

    /// Finish the frame: append the reset sequence and return the buffer.
    pub fn finish(mut self) -> String {
        self.out.push_str("\x1b[0m");
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luminance_extremes() {
        assert_eq!(luminance(0, 0, 0), 0);
        assert_eq!(luminance(255, 255, 255), 255);
        // Green dominates the weights.
        assert!(luminance(0, 255, 0) > luminance(255, 0, 0));
        assert!(luminance(255, 0, 0) > luminance(0, 0, 255));
    }

    #[test]
    fn test_16color_closure() {
        for i in 0..16u8 {
            let (r, g, b) = get_16color_rgb(i);
            assert_eq!(rgb_to_16color(r, g, b), i, "index {}", i);
        }
    }

    #[test]
    fn test_16color_invalid_index_defaults_white() {
        assert_eq!(get_16color_rgb(200), (255, 255, 255));
    }

    #[test]
    fn test_256color_range() {
        for r in (0..=255u16).step_by(15) {
            for g in (0..=255u16).step_by(15) {
                for b in (0..=255u16).step_by(15) {
                    let idx = rgb_to_256color(r as u8, g as u8, b as u8);
                    assert!(idx >= 16, "rgb({},{},{}) -> {}", r, g, b, idx);
                }
            }
        }
    }

    #[test]
    fn test_256color_grayscale_band() {
        for y in (0..=255u16).step_by(5) {
            let idx = rgb_to_256color(y as u8, y as u8, y as u8);
            assert!((232..=255).contains(&idx), "gray {} -> {}", y, idx);
        }
        // Saturated colors stay on the cube.
        assert!((16..=231).contains(&rgb_to_256color(255, 0, 0)));
        assert!((16..=231).contains(&rgb_to_256color(0, 128, 255)));
    }

    #[test]
    fn test_256color_cube_rounding() {
        for c in [0u8, 51, 102, 153, 204, 255] {
            let expected = ((c as f32) * 5.0 / 255.0).round() as u32;
            let scaled = ((c as u32 * 5) + 127) / 255;
            assert_eq!(scaled, expected, "channel {}", c);
        }
    }

    #[test]
    fn test_emitter_coalesces_runs() {
        let mut e = SgrEmitter::new(ColorLevel::TrueColor, 64);
        for _ in 0..10 {
            e.set_fg(10, 20, 30);
            e.push_glyph("#");
        }
        let out = e.finish();
        assert_eq!(out.matches("\x1b[38;2;10;20;30m").count(), 1);
        assert_eq!(out.matches('#').count(), 10);
        assert!(out.ends_with("\x1b[0m"));
    }

    #[test]
    fn test_emitter_switches_on_change() {
        let mut e = SgrEmitter::new(ColorLevel::TrueColor, 64);
        e.set_fg(1, 1, 1);
        e.push_glyph("a");
        e.set_fg(2, 2, 2);
        e.push_glyph("b");
        let out = e.finish();
        assert_eq!(out.matches("\x1b[38;2;").count(), 2);
    }

    #[test]
    fn test_emitter_dedups_by_quantized_color() {
        // Two different RGB values mapping to the same 16-color index must
        // produce one SGR sequence.
        let mut e = SgrEmitter::new(ColorLevel::Ansi16, 64);
        e.set_fg(250, 250, 250);
        e.push_glyph("a");
        e.set_fg(255, 250, 252);
        e.push_glyph("b");
        let out = e.finish();
        assert_eq!(out.matches("\x1b[97m").count(), 1);
    }

    #[test]
    fn test_emitter_16color_codes() {
        let mut e = SgrEmitter::new(ColorLevel::Ansi16, 64);
        e.set_fg(0, 0, 0); // black -> 30
        e.set_bg(255, 0, 0); // bright red -> 101
        e.push_glyph("x");
        let out = e.finish();
        assert!(out.contains("\x1b[30m"));
        assert!(out.contains("\x1b[101m"));
    }

    #[test]
    fn test_emitter_mono_emits_no_escape_before_reset() {
        let mut e = SgrEmitter::new(ColorLevel::Mono, 64);
        e.set_fg(200, 100, 50);
        e.push_glyph("@");
        let out = e.finish();
        assert_eq!(out, "@\x1b[0m");
    }

    #[test]
    fn test_emitter_256_format() {
        let mut e = SgrEmitter::new(ColorLevel::Ansi256, 64);
        e.set_fg(255, 0, 0);
        e.push_glyph("r");
        let out = e.finish();
        let idx = rgb_to_256color(255, 0, 0);
        assert!(out.contains(&format!("\x1b[38;5;{}m", idx)));
    }
}
