//! Luminance palettes and the per-client glyph lookup table.
//!
//! A palette is an ordered glyph sequence from darkest to brightest; glyphs
//! may be 1-4 UTF-8 bytes. Luminance maps through a 64-entry ramp
//! (`ramp[i] = i * (len - 1) / 63`) that is flattened into a 256-entry LUT
//! of byte spans into the palette string, built once per capability update.

use crate::error::InitError;

/// Default glyph ramp, darkest to brightest.
pub const STANDARD_PALETTE: &str = " .:-=+*#%@";

/// Unicode block-element ramp.
pub const BLOCKS_PALETTE: &str = " ░▒▓█";

/// Dense ASCII ramp for small terminals.
pub const DIGITAL_PALETTE: &str = " .,:;i1tfLCG08@";

/// Most glyphs a palette may carry; longer custom strings are truncated.
pub const MAX_PALETTE_GLYPHS: usize = 256;

/// Advertised palette selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaletteType {
    #[default]
    Standard,
    Blocks,
    Digital,
    /// Client- or operator-supplied glyph string.
    Custom,
}

impl PaletteType {
    pub fn to_wire(self) -> u8 {
        match self {
            PaletteType::Standard => 0,
            PaletteType::Blocks => 1,
            PaletteType::Digital => 2,
            PaletteType::Custom => 3,
        }
    }

    /// Unknown values degrade to the standard ramp.
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => PaletteType::Blocks,
            2 => PaletteType::Digital,
            3 => PaletteType::Custom,
            _ => PaletteType::Standard,
        }
    }

    /// Built-in glyphs for the preset types; `None` for Custom.
    pub fn preset_chars(self) -> Option<&'static str> {
        match self {
            PaletteType::Standard => Some(STANDARD_PALETTE),
            PaletteType::Blocks => Some(BLOCKS_PALETTE),
            PaletteType::Digital => Some(DIGITAL_PALETTE),
            PaletteType::Custom => None,
        }
    }

    /// Resolve the glyph string for this selection, falling back to the
    /// standard ramp when a Custom selection carries no glyphs.
    pub fn resolve<'a>(self, custom: Option<&'a str>) -> &'a str {
        match self {
            PaletteType::Custom => custom.unwrap_or(STANDARD_PALETTE),
            other => other.preset_chars().unwrap_or(STANDARD_PALETTE),
        }
    }
}

/// The 64-entry luminance ramp for a palette of `len` glyphs.
fn luminance_ramp(len: usize) -> [usize; 64] {
    let mut ramp = [0usize; 64];
    for (i, slot) in ramp.iter_mut().enumerate() {
        *slot = i * (len - 1) / 63;
    }
    ramp
}

/// Per-client palette state: glyph string plus the flattened 256-entry
/// luminance LUT of (byte offset, byte length) spans.
#[derive(Debug, Clone)]
pub struct PaletteLut {
    chars: String,
    offsets: [u16; 256],
    lens: [u8; 256],
    glyph_count: usize,
    utf8: bool,
    initialized: bool,
}

impl PaletteLut {
    /// An uninitialized LUT. Rendering against it is refused until
    /// [`PaletteLut::rebuild`] succeeds.
    pub fn empty() -> Self {
        Self {
            chars: String::new(),
            offsets: [0; 256],
            lens: [0; 256],
            glyph_count: 0,
            utf8: false,
            initialized: false,
        }
    }

    /// Build a LUT for the given glyph string.
    pub fn build(chars: &str) -> Result<Self, InitError> {
        let mut lut = Self::empty();
        lut.rebuild(chars)?;
        Ok(lut)
    }

    /// Rebuild in place for a new glyph string. Building twice with the
    /// same glyphs is equivalent to building once; failure leaves the
    /// previous state untouched.
    pub fn rebuild(&mut self, chars: &str) -> Result<(), InitError> {
        let spans: Vec<(u16, u8)> = chars
            .char_indices()
            .take(MAX_PALETTE_GLYPHS)
            .map(|(offset, ch)| (offset as u16, ch.len_utf8() as u8))
            .collect();
        if spans.is_empty() {
            return Err(InitError::Palette("palette has no glyphs".to_string()));
        }

        let kept_bytes = spans
            .last()
            .map(|&(off, len)| off as usize + len as usize)
            .unwrap_or(0);
        let ramp = luminance_ramp(spans.len());

        self.chars = chars[..kept_bytes].to_string();
        self.glyph_count = spans.len();
        self.utf8 = spans.iter().any(|&(_, len)| len > 1);
        for y in 0..256 {
            let (offset, len) = spans[ramp[y >> 2]];
            self.offsets[y] = offset;
            self.lens[y] = len;
        }
        self.initialized = true;
        Ok(())
    }

    /// The glyph for a luminance value. Must not be called while
    /// uninitialized; the renderer checks first.
    pub fn glyph(&self, luminance: u8) -> &str {
        let i = luminance as usize;
        let start = self.offsets[i] as usize;
        &self.chars[start..start + self.lens[i] as usize]
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn glyph_count(&self) -> usize {
        self.glyph_count
    }

    /// True when any glyph is wider than one byte.
    pub fn is_utf8(&self) -> bool {
        self.utf8
    }

    pub fn chars(&self) -> &str {
        &self.chars
    }
}
