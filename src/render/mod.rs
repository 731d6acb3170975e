//! Per-client ASCII/ANSI rendering: palettes, color quantization, dithering.

pub mod dither;
pub mod palette;
pub mod renderer;
pub mod term_color;

/// Color capability tier advertised by a client terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorLevel {
    /// No color negotiated; glyphs only.
    #[default]
    Mono,
    /// 16 standard ANSI colors (SGR 30-37 / 90-97).
    Ansi16,
    /// xterm 256-color cube + grayscale ramp (SGR 38;5).
    Ansi256,
    /// 24-bit direct color (SGR 38;2).
    TrueColor,
}

impl ColorLevel {
    /// Wire value (CLIENT_CAPABILITIES payload).
    pub fn to_wire(self) -> u8 {
        match self {
            ColorLevel::Mono => 0,
            ColorLevel::Ansi16 => 1,
            ColorLevel::Ansi256 => 2,
            ColorLevel::TrueColor => 3,
        }
    }

    /// Decode a wire value. Unknown tiers degrade to mono rather than
    /// killing the connection.
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => ColorLevel::Ansi16,
            2 => ColorLevel::Ansi256,
            3 => ColorLevel::TrueColor,
            _ => ColorLevel::Mono,
        }
    }
}

/// How glyph cells are colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// One glyph per cell, colored via foreground SGR.
    #[default]
    Foreground,
    /// One glyph per cell, colored via background SGR.
    Background,
    /// Upper-half-block glyph; two stacked pixels per cell.
    HalfBlock,
}

impl RenderMode {
    pub fn to_wire(self) -> u8 {
        match self {
            RenderMode::Foreground => 0,
            RenderMode::Background => 1,
            RenderMode::HalfBlock => 2,
        }
    }

    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => RenderMode::Background,
            2 => RenderMode::HalfBlock,
            _ => RenderMode::Foreground,
        }
    }
}
