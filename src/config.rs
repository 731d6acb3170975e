//! CLI options and their translation into the core runtime configuration.

use std::path::PathBuf;

use clap::Parser;

use crate::client::MAX_CLIENTS;
use crate::error::InitError;
use crate::render::palette::PaletteType;
use crate::server::{RuntimeConfig, DEFAULT_PORT};

/// Terminal video chat server.
#[derive(Parser, Debug)]
#[command(name = "termchat-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Listen port.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TERMCHAT_PORT")]
    pub port: u16,

    /// Disable audio mixing (no AUDIO_BATCH output).
    #[arg(long, env = "TERMCHAT_NO_AUDIO")]
    pub no_audio: bool,

    /// Default glyph palette: standard, blocks, digital, or
    /// custom:<glyphs>.
    #[arg(long, default_value = "standard", env = "TERMCHAT_PALETTE")]
    pub palette: String,

    /// Maximum simultaneous clients.
    #[arg(long, default_value_t = MAX_CLIENTS, env = "TERMCHAT_MAX_CLIENTS")]
    pub max_clients: usize,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TERMCHAT_LOG_LEVEL")]
    pub log_level: log::LevelFilter,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "TERMCHAT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log errors only.
    #[arg(short, long)]
    pub quiet: bool,

    /// Colorize log output: auto, always, never.
    #[arg(long, default_value = "auto", env = "TERMCHAT_LOG_COLOR")]
    pub color: String,
}

/// Parse a palette option string. `custom:` takes the rest of the string
/// verbatim as the glyph ramp, darkest first.
pub fn parse_palette(value: &str) -> Result<(PaletteType, Option<String>), InitError> {
    if let Some(glyphs) = value.strip_prefix("custom:") {
        if glyphs.is_empty() {
            return Err(InitError::Palette(
                "custom palette needs at least one glyph".to_string(),
            ));
        }
        return Ok((PaletteType::Custom, Some(glyphs.to_string())));
    }
    match value.to_lowercase().as_str() {
        "standard" => Ok((PaletteType::Standard, None)),
        "blocks" => Ok((PaletteType::Blocks, None)),
        "digital" => Ok((PaletteType::Digital, None)),
        other => Err(InitError::Palette(format!("unknown palette: {}", other))),
    }
}

impl Cli {
    /// Build the core configuration, validating the palette selection.
    pub fn runtime_config(&self) -> Result<RuntimeConfig, InitError> {
        let (palette_type, palette_custom) = parse_palette(&self.palette)?;
        Ok(RuntimeConfig {
            port: self.port,
            audio_enabled: !self.no_audio,
            palette_type,
            palette_custom,
            max_clients: self.max_clients.clamp(1, MAX_CLIENTS),
        })
    }
}
