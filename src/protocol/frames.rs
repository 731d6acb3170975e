//! Media payloads: IMAGE_FRAME, AUDIO_BATCH, ASCII_FRAME, SERVER_STATE.

use crate::error::PayloadError;

/// Image frame dimension header: `width:u32 BE ‖ height:u32 BE`.
pub const IMAGE_HEADER_LEN: usize = 8;

/// Largest accepted frame dimension, in pixels, per axis.
pub const MAX_FRAME_DIM: u32 = 4096;

/// Audio batch header: four big-endian u32 fields.
pub const AUDIO_BATCH_HEADER_LEN: usize = 16;

/// Samples per outbound mixed batch.
pub const BATCH_SAMPLES: usize = 256;

/// Mix sample rate. Inbound batches declaring other rates are accepted
/// as-is; resampling is the capture side's concern.
pub const MIX_SAMPLE_RATE: u32 = 48_000;

/// ASCII frame header: six big-endian u32 fields.
pub const ASCII_FRAME_HEADER_LEN: usize = 24;

/// Validate an IMAGE_FRAME payload and return its dimensions.
///
/// The payload is `width ‖ height ‖ RGB bytes`; total length must be exactly
/// `8 + 3·width·height` with both dimensions in `[1, MAX_FRAME_DIM]`.
pub fn validate_image_payload(payload: &[u8]) -> Result<(u32, u32), PayloadError> {
    if payload.len() < IMAGE_HEADER_LEN {
        return Err(PayloadError::TooShort(payload.len()));
    }
    let width = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let height = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    if width == 0 || height == 0 || width > MAX_FRAME_DIM || height > MAX_FRAME_DIM {
        return Err(PayloadError::BadDimensions(width, height));
    }
    let expected = IMAGE_HEADER_LEN + 3 * width as usize * height as usize;
    if payload.len() != expected {
        return Err(PayloadError::LengthMismatch {
            expected,
            actual: payload.len(),
        });
    }
    Ok((width, height))
}

/// Build an IMAGE_FRAME payload (client-side encoding; used by tests).
pub fn encode_image_payload(width: u32, height: u32, rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(IMAGE_HEADER_LEN + rgb.len());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(rgb);
    out
}

/// Decoded AUDIO_BATCH header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioBatchHeader {
    pub batch_count: u32,
    pub total_samples: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioBatchHeader {
    /// Decode and validate a batch header against the payload length and the
    /// per-batch sample ceiling.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < AUDIO_BATCH_HEADER_LEN {
            return Err(PayloadError::TooShort(payload.len()));
        }
        let header = Self {
            batch_count: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            total_samples: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            sample_rate: u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]),
            channels: u32::from_be_bytes([payload[12], payload[13], payload[14], payload[15]]),
        };
        if header.total_samples > 2 * BATCH_SAMPLES as u32 {
            return Err(PayloadError::TooManySamples(
                header.total_samples,
                2 * BATCH_SAMPLES as u32,
            ));
        }
        let expected = AUDIO_BATCH_HEADER_LEN + 4 * header.total_samples as usize;
        if payload.len() != expected {
            return Err(PayloadError::LengthMismatch {
                expected,
                actual: payload.len(),
            });
        }
        Ok(header)
    }
}

/// Copy the little-endian f32 samples out of a validated AUDIO_BATCH
/// payload into `out`, returning the count written.
pub fn decode_batch_samples(payload: &[u8], out: &mut Vec<f32>) -> usize {
    let body = &payload[AUDIO_BATCH_HEADER_LEN..];
    decode_raw_samples(body, out)
}

/// Copy raw little-endian f32 PCM (the legacy AUDIO payload) into `out`.
/// Trailing bytes that do not form a whole sample are ignored.
pub fn decode_raw_samples(body: &[u8], out: &mut Vec<f32>) -> usize {
    let count = body.len() / 4;
    out.clear();
    out.reserve(count);
    for chunk in body.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    count
}

/// Collapse interleaved multi-channel samples to mono in place by
/// averaging each frame. Mono input is left untouched.
pub fn downmix_to_mono(samples: &mut Vec<f32>, channels: u32) {
    if channels < 2 {
        return;
    }
    let channels = channels as usize;
    let frames = samples.len() / channels;
    for frame in 0..frames {
        let start = frame * channels;
        let sum: f32 = samples[start..start + channels].iter().sum();
        samples[frame] = sum / channels as f32;
    }
    samples.truncate(frames);
}

/// Build an AUDIO_BATCH payload from mixed samples.
pub fn encode_audio_batch(samples: &[f32], sample_rate: u32, channels: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(AUDIO_BATCH_HEADER_LEN + 4 * samples.len());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    out.extend_from_slice(&sample_rate.to_be_bytes());
    out.extend_from_slice(&channels.to_be_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// ASCII_FRAME header. Every outbound frame is self-describing: a client
/// may drop any frame whose CRC fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsciiFrameHeader {
    /// Frame width in character cells.
    pub width: u32,
    /// Frame height in character cells.
    pub height: u32,
    /// Payload size before compression.
    pub original_size: u32,
    /// 0 = uncompressed payload.
    pub compressed_size: u32,
    /// CRC-32 of the payload bytes.
    pub checksum: u32,
    pub flags: u32,
}

impl AsciiFrameHeader {
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < ASCII_FRAME_HEADER_LEN {
            return Err(PayloadError::TooShort(payload.len()));
        }
        let f = |i: usize| {
            u32::from_be_bytes([payload[i], payload[i + 1], payload[i + 2], payload[i + 3]])
        };
        Ok(Self {
            width: f(0),
            height: f(4),
            original_size: f(8),
            compressed_size: f(12),
            checksum: f(16),
            flags: f(20),
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.original_size.to_be_bytes());
        out.extend_from_slice(&self.compressed_size.to_be_bytes());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
    }
}

/// Assemble a complete ASCII_FRAME payload (header + ANSI text) with the
/// checksum filled in.
pub fn encode_ascii_frame(width: u32, height: u32, ansi: &[u8]) -> Vec<u8> {
    let header = AsciiFrameHeader {
        width,
        height,
        original_size: ansi.len() as u32,
        compressed_size: 0,
        checksum: crc32fast::hash(ansi),
        flags: 0,
    };
    let mut out = Vec::with_capacity(ASCII_FRAME_HEADER_LEN + ansi.len());
    header.write_to(&mut out);
    out.extend_from_slice(ansi);
    out
}

/// SERVER_STATE payload: connection counts pushed on every join and reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStateInfo {
    pub connected: u32,
    pub active: u32,
}

impl ServerStateInfo {
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 16 {
            return Err(PayloadError::TooShort(payload.len()));
        }
        Ok(Self {
            connected: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            active: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&self.connected.to_be_bytes());
        out.extend_from_slice(&self.active.to_be_bytes());
        out.extend_from_slice(&[0u8; 8]); // reserved
        out
    }
}
