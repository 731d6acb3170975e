//! Error taxonomy for the server core.
//!
//! Wire-level faults (bad magic, truncation, oversize) are fatal to the one
//! connection that produced them. Payload validation faults (dimension or
//! sample-count mismatch) discard the offending packet and the connection
//! continues. Pool exhaustion and queue overflow drop the affected packet
//! and bump a counter.

use std::io;

use thiserror::Error;

/// Wire-level protocol violations. Fatal to the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame did not start with the expected magic value.
    #[error("bad packet magic 0x{0:08x}")]
    BadMagic(u32),

    /// Declared payload length exceeds the allowed maximum.
    #[error("packet payload length {0} exceeds maximum {1}")]
    Oversize(u32, u32),

    /// Extended packet shorter than its sender-id prefix.
    #[error("extended packet payload too short ({0} bytes)")]
    TruncatedSenderId(usize),

    /// Stream ended in the middle of a header or payload.
    #[error("connection closed mid-packet")]
    TruncatedPacket,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Payload validation faults. The packet is discarded, the connection lives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// Image frame dimensions outside [1, 4096].
    #[error("image dimensions {0}x{1} out of range")]
    BadDimensions(u32, u32),

    /// Payload length disagrees with the declared geometry.
    #[error("payload length {actual} does not match declared size {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Audio batch sample count above the per-batch ceiling.
    #[error("audio batch sample count {0} exceeds limit {1}")]
    TooManySamples(u32, u32),

    /// Payload too short to contain its own header.
    #[error("payload too short ({0} bytes)")]
    TooShort(usize),
}

/// Why a render pass produced no output. Not an error; counted and skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    /// Palette LUT has not been built yet (no CLIENT_CAPABILITIES seen).
    #[error("palette not initialized")]
    NotReady,

    /// Canvas dimensions do not match the capability snapshot.
    #[error("canvas {0}x{1} does not fit terminal geometry")]
    BadCanvas(usize, usize),
}

/// Server initialization failures. Fatal to the process (nonzero exit).
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("invalid palette configuration: {0}")]
    Palette(String),
}
