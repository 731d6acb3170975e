//! Framed packet read/write over a byte stream.
//!
//! The reader tolerates socket read timeouts at a frame boundary (reported
//! as [`ReadOutcome::Idle`] so the caller can poll its run flag) but treats
//! a stall in the middle of a frame as fatal after a bounded number of
//! retries. All other wire faults are fatal to the connection.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use crate::buffer::pool::{BufferPool, PooledBuf};
use crate::error::ProtocolError;

use super::{FLAG_EXTENDED, HEADER_SIZE, MAX_PACKET_PAYLOAD, PACKET_MAGIC, PacketType};

/// Consecutive mid-frame timeout reads tolerated before the connection is
/// declared dead. With a 1 s socket timeout this allows a ~5 s stall.
const MID_FRAME_TIMEOUT_RETRIES: u32 = 5;

/// A packet as read off the wire, before type dispatch.
#[derive(Debug)]
pub struct RawPacket {
    /// Wire type value. May be unknown to this build; the caller decides.
    pub wire_type: u16,
    /// Header flags.
    pub flags: u16,
    /// Originating client id, or 0 when the extended flag is absent.
    pub sender_id: u32,
    /// Payload with the sender-id prefix (if any) already stripped.
    pub payload: PooledBuf,
}

/// Result of one read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete packet.
    Packet(RawPacket),
    /// The read timed out before the first byte of a new frame.
    Idle,
    /// The peer closed the stream cleanly at a frame boundary.
    Closed,
}

/// Read one framed packet.
pub fn read_packet<R: Read>(
    reader: &mut R,
    pool: &Arc<BufferPool>,
) -> Result<ReadOutcome, ProtocolError> {
    let mut header = [0u8; HEADER_SIZE];
    match read_full(reader, &mut header, true)? {
        FillOutcome::Done => {}
        FillOutcome::IdleBoundary => return Ok(ReadOutcome::Idle),
        FillOutcome::ClosedBoundary => return Ok(ReadOutcome::Closed),
    }

    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != PACKET_MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let wire_type = u16::from_be_bytes([header[4], header[5]]);
    let flags = u16::from_be_bytes([header[6], header[7]]);
    let length = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    if length > MAX_PACKET_PAYLOAD {
        return Err(ProtocolError::Oversize(length, MAX_PACKET_PAYLOAD));
    }

    let mut sender_id = 0u32;
    let mut body_len = length as usize;
    if flags & FLAG_EXTENDED != 0 {
        if body_len < 4 {
            return Err(ProtocolError::TruncatedSenderId(body_len));
        }
        let mut id = [0u8; 4];
        match read_full(reader, &mut id, false)? {
            FillOutcome::Done => {}
            _ => return Err(ProtocolError::TruncatedPacket),
        }
        sender_id = u32::from_be_bytes(id);
        body_len -= 4;
    }

    let mut payload = pool.acquire(body_len);
    if body_len > 0 {
        match read_full(reader, &mut payload, false)? {
            FillOutcome::Done => {}
            _ => return Err(ProtocolError::TruncatedPacket),
        }
    }

    Ok(ReadOutcome::Packet(RawPacket {
        wire_type,
        flags,
        sender_id,
        payload,
    }))
}

/// Write one framed packet. A non-zero `sender_id` selects the extended
/// variant with the id prefixed to the payload.
pub fn write_packet<W: Write>(
    writer: &mut W,
    packet_type: PacketType,
    sender_id: u32,
    payload: &[u8],
) -> io::Result<()> {
    let extended = sender_id != 0;
    let length = payload.len() + if extended { 4 } else { 0 };

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&PACKET_MAGIC.to_be_bytes());
    header[4..6].copy_from_slice(&packet_type.to_wire().to_be_bytes());
    let flags: u16 = if extended { FLAG_EXTENDED } else { 0 };
    header[6..8].copy_from_slice(&flags.to_be_bytes());
    header[8..12].copy_from_slice(&(length as u32).to_be_bytes());

    writer.write_all(&header)?;
    if extended {
        writer.write_all(&sender_id.to_be_bytes())?;
    }
    writer.write_all(payload)?;
    writer.flush()
}

enum FillOutcome {
    Done,
    /// Timeout with zero bytes consumed (only reported at a frame boundary).
    IdleBoundary,
    /// EOF with zero bytes consumed (only reported at a frame boundary).
    ClosedBoundary,
}

/// Fill `buf` completely, retrying bounded timeouts. When `at_boundary` is
/// true, a timeout or EOF before the first byte is not an error.
fn read_full<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    at_boundary: bool,
) -> Result<FillOutcome, ProtocolError> {
    let mut filled = 0usize;
    let mut timeouts = 0u32;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 && at_boundary {
                    return Ok(FillOutcome::ClosedBoundary);
                }
                return Err(ProtocolError::TruncatedPacket);
            }
            Ok(n) => {
                filled += n;
                timeouts = 0;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e)
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                if filled == 0 && at_boundary {
                    return Ok(FillOutcome::IdleBoundary);
                }
                timeouts += 1;
                if timeouts >= MID_FRAME_TIMEOUT_RETRIES {
                    return Err(ProtocolError::TruncatedPacket);
                }
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(FillOutcome::Done)
}
