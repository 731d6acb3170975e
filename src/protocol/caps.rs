//! Capability payloads: CLIENT_JOIN and CLIENT_CAPABILITIES.

use crate::error::PayloadError;
use crate::render::palette::PaletteType;
use crate::render::{ColorLevel, RenderMode};

use super::{CAP_AUDIO, CAP_COLOR, CAP_STRETCH, CAP_VIDEO};

/// Fixed part of the CLIENT_CAPABILITIES payload, before the custom
/// palette glyph string.
pub const TERMINAL_CAPS_FIXED_LEN: usize = 10;

/// Terminal cell dimensions are clamped to this range.
pub const MAX_TERMINAL_CELLS: u16 = 512;

/// Session capability flags negotiated at join time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientFlags {
    pub can_send_video: bool,
    pub can_send_audio: bool,
    pub wants_color: bool,
    pub wants_stretch: bool,
}

impl ClientFlags {
    pub fn from_bits(bits: u32) -> Self {
        Self {
            can_send_video: bits & CAP_VIDEO != 0,
            can_send_audio: bits & CAP_AUDIO != 0,
            wants_color: bits & CAP_COLOR != 0,
            wants_stretch: bits & CAP_STRETCH != 0,
        }
    }

    pub fn to_bits(self) -> u32 {
        let mut bits = 0;
        if self.can_send_video {
            bits |= CAP_VIDEO;
        }
        if self.can_send_audio {
            bits |= CAP_AUDIO;
        }
        if self.wants_color {
            bits |= CAP_COLOR;
        }
        if self.wants_stretch {
            bits |= CAP_STRETCH;
        }
        bits
    }
}

/// Decoded CLIENT_JOIN payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    pub flags: ClientFlags,
    pub display_name: String,
}

impl JoinInfo {
    /// Payload: `caps:u32 BE` followed by the UTF-8 display name.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 4 {
            return Err(PayloadError::TooShort(payload.len()));
        }
        let bits = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let display_name = String::from_utf8_lossy(&payload[4..]).into_owned();
        Ok(Self {
            flags: ClientFlags::from_bits(bits),
            display_name,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.display_name.len());
        out.extend_from_slice(&self.flags.to_bits().to_be_bytes());
        out.extend_from_slice(self.display_name.as_bytes());
        out
    }
}

/// Advertised terminal capabilities: color tier, render mode, UTF-8
/// support, cell geometry, and palette selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalCaps {
    pub color_level: ColorLevel,
    pub render_mode: RenderMode,
    pub utf8: bool,
    pub width: u16,
    pub height: u16,
    pub palette_type: PaletteType,
    pub custom_palette: Option<String>,
}

impl Default for TerminalCaps {
    fn default() -> Self {
        Self {
            color_level: ColorLevel::Mono,
            render_mode: RenderMode::Foreground,
            utf8: false,
            width: 80,
            height: 24,
            palette_type: PaletteType::Standard,
            custom_palette: None,
        }
    }
}

impl TerminalCaps {
    /// Decode a CLIENT_CAPABILITIES payload.
    ///
    /// Layout: `color_level:u8 ‖ render_mode:u8 ‖ utf8:u8 ‖ reserved:u8 ‖
    /// width:u16 BE ‖ height:u16 BE ‖ palette_type:u8 ‖ custom_len:u8 ‖
    /// custom glyphs`. Out-of-range dimensions are clamped, unknown enum
    /// values degrade to their defaults.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < TERMINAL_CAPS_FIXED_LEN {
            return Err(PayloadError::TooShort(payload.len()));
        }
        let custom_len = payload[9] as usize;
        if payload.len() != TERMINAL_CAPS_FIXED_LEN + custom_len {
            return Err(PayloadError::LengthMismatch {
                expected: TERMINAL_CAPS_FIXED_LEN + custom_len,
                actual: payload.len(),
            });
        }

        let width = u16::from_be_bytes([payload[4], payload[5]]).clamp(1, MAX_TERMINAL_CELLS);
        let height = u16::from_be_bytes([payload[6], payload[7]]).clamp(1, MAX_TERMINAL_CELLS);
        let palette_type = PaletteType::from_wire(payload[8]);
        let custom_palette = if custom_len > 0 {
            Some(String::from_utf8_lossy(&payload[TERMINAL_CAPS_FIXED_LEN..]).into_owned())
        } else {
            None
        };

        Ok(Self {
            color_level: ColorLevel::from_wire(payload[0]),
            render_mode: RenderMode::from_wire(payload[1]),
            utf8: payload[2] != 0,
            width,
            height,
            palette_type,
            custom_palette,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let custom = self.custom_palette.as_deref().unwrap_or("");
        let custom_len = custom.len().min(u8::MAX as usize);
        let mut out = Vec::with_capacity(TERMINAL_CAPS_FIXED_LEN + custom_len);
        out.push(self.color_level.to_wire());
        out.push(self.render_mode.to_wire());
        out.push(self.utf8 as u8);
        out.push(0);
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.push(self.palette_type.to_wire());
        out.push(custom_len as u8);
        out.extend_from_slice(&custom.as_bytes()[..custom_len]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_roundtrip() {
        let info = JoinInfo {
            flags: ClientFlags {
                can_send_video: true,
                can_send_audio: false,
                wants_color: true,
                wants_stretch: false,
            },
            display_name: "alice".to_string(),
        };
        let decoded = JoinInfo::decode(&info.encode()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_join_too_short() {
        assert_eq!(JoinInfo::decode(&[0, 0]), Err(PayloadError::TooShort(2)));
    }

    #[test]
    fn test_caps_roundtrip() {
        let caps = TerminalCaps {
            color_level: ColorLevel::TrueColor,
            render_mode: RenderMode::HalfBlock,
            utf8: true,
            width: 120,
            height: 40,
            palette_type: PaletteType::Blocks,
            custom_palette: None,
        };
        assert_eq!(TerminalCaps::decode(&caps.encode()).unwrap(), caps);
    }

    #[test]
    fn test_caps_custom_palette_roundtrip() {
        let caps = TerminalCaps {
            color_level: ColorLevel::Ansi256,
            render_mode: RenderMode::Foreground,
            utf8: true,
            width: 80,
            height: 24,
            palette_type: PaletteType::Custom,
            custom_palette: Some(" .oO@".to_string()),
        };
        assert_eq!(TerminalCaps::decode(&caps.encode()).unwrap(), caps);
    }

    #[test]
    fn test_caps_dimension_clamping() {
        let mut payload = TerminalCaps::default().encode();
        payload[4..6].copy_from_slice(&9999u16.to_be_bytes());
        payload[6..8].copy_from_slice(&0u16.to_be_bytes());
        let caps = TerminalCaps::decode(&payload).unwrap();
        assert_eq!(caps.width, MAX_TERMINAL_CELLS);
        assert_eq!(caps.height, 1);
    }

    #[test]
    fn test_caps_length_mismatch() {
        let mut payload = TerminalCaps::default().encode();
        payload[9] = 3; // claims 3 custom bytes that are not there
        assert!(matches!(
            TerminalCaps::decode(&payload),
            Err(PayloadError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_enum_values_degrade() {
        let mut payload = TerminalCaps::default().encode();
        payload[0] = 200;
        payload[1] = 200;
        let caps = TerminalCaps::decode(&payload).unwrap();
        assert_eq!(caps.color_level, ColorLevel::Mono);
        assert_eq!(caps.render_mode, RenderMode::Foreground);
    }
}
