//! Radio frame header and codec
//!
//! Every frame on the air is a fixed 16-byte header followed by up to
//! [`MAX_PAYLOAD`] payload bytes. All multi-byte scalars are little-endian.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0x00    2B    magic (0xA5 0x5A)
//! 0x02    1B    protocol version (0x01)
//! 0x03    1B    message type
//! 0x04    8B    device id (u64 LE)
//! 0x0C    2B    sequence number (u16 LE, wraps at 2^16)
//! 0x0E    1B    payload length
//! 0x0F    1B    XOR checksum over bytes 0x00..0x0F
//! ```
//!
//! Decoding is byte-wise into owned structs rather than overlaying a packed
//! struct on the receive buffer, so alignment and padding never enter the
//! picture and the header can grow in a later protocol version.

use crate::device::DeviceId;
use crate::error::{FrameError, Result};

/// Protocol family magic bytes
pub const MAGIC: [u8; 2] = [0xA5, 0x5A];

/// Supported protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 16;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD: usize = 238;

/// Maximum total frame size
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

/// Message type carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Periodic sensor readings
    Readings = 0x01,
    /// Device status report
    Status = 0x02,
    /// Asynchronous device event
    Event = 0x03,
    /// Gateway-to-sensor command
    Command = 0x04,
    /// Reception acknowledgement
    Ack = 0x05,
}

impl MessageType {
    /// Decode the wire byte
    pub fn from_wire(raw: u8) -> Result<Self> {
        match raw {
            0x01 => Ok(MessageType::Readings),
            0x02 => Ok(MessageType::Status),
            0x03 => Ok(MessageType::Event),
            0x04 => Ok(MessageType::Command),
            0x05 => Ok(MessageType::Ack),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    /// Whether a frame of this type is acknowledged by the gateway
    pub fn wants_ack(&self) -> bool {
        matches!(
            self,
            MessageType::Readings | MessageType::Status | MessageType::Event
        )
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message type selecting the payload variant
    pub msg_type: MessageType,
    /// Sender (uplink) or target (downlink) device
    pub device_id: DeviceId,
    /// Per-device monotonic sequence number
    pub sequence: u16,
    /// Declared payload length
    pub payload_len: u8,
}

impl FrameHeader {
    /// Build a header for an outgoing frame
    pub fn new(msg_type: MessageType, device_id: DeviceId, sequence: u16, payload_len: u8) -> Self {
        Self {
            msg_type,
            device_id,
            sequence,
            payload_len,
        }
    }

    /// Serialize the header, computing the trailing checksum
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = MAGIC[0];
        buf[1] = MAGIC[1];
        buf[2] = PROTOCOL_VERSION;
        buf[3] = self.msg_type as u8;
        buf[4..12].copy_from_slice(&self.device_id.0.to_le_bytes());
        buf[12..14].copy_from_slice(&self.sequence.to_le_bytes());
        buf[14] = self.payload_len;
        buf[15] = xor_checksum(&buf[..HEADER_LEN - 1]);
        buf
    }
}

/// XOR of every byte in the slice
fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Encode a complete frame (header + payload)
///
/// Fails only when the payload exceeds [`MAX_PAYLOAD`]; the declared length
/// in the header is always taken from the payload itself.
pub fn encode_frame(
    msg_type: MessageType,
    device_id: DeviceId,
    sequence: u16,
    payload: &[u8],
) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let header = FrameHeader::new(msg_type, device_id, sequence, payload.len() as u8);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode and validate a received byte sequence
///
/// Validation order: length, magic, version, checksum, declared payload
/// length. On success returns the header and a borrowed payload slice of
/// exactly the declared length (trailing bytes, if any, are ignored —
/// some radios pad the receive buffer).
pub fn decode_frame(buf: &[u8]) -> Result<(FrameHeader, &[u8])> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::FrameTooShort {
            len: buf.len(),
            min: HEADER_LEN,
        });
    }

    let got_magic = [buf[0], buf[1]];
    if got_magic != MAGIC {
        return Err(FrameError::BadMagic {
            expected: MAGIC,
            got: got_magic,
        });
    }

    if buf[2] != PROTOCOL_VERSION {
        return Err(FrameError::BadVersion {
            expected: PROTOCOL_VERSION,
            got: buf[2],
        });
    }

    let computed = xor_checksum(&buf[..HEADER_LEN - 1]);
    if computed != buf[HEADER_LEN - 1] {
        return Err(FrameError::BadChecksum {
            computed,
            carried: buf[HEADER_LEN - 1],
        });
    }

    let msg_type = MessageType::from_wire(buf[3])?;
    let device_id = DeviceId(u64::from_le_bytes(buf[4..12].try_into().unwrap()));
    let sequence = u16::from_le_bytes(buf[12..14].try_into().unwrap());
    let payload_len = buf[14] as usize;

    // a declared length beyond the protocol maximum is invalid even when
    // the receive buffer happens to carry that many bytes
    if payload_len > MAX_PAYLOAD {
        return Err(FrameError::Truncated {
            declared: payload_len,
            available: MAX_PAYLOAD,
        });
    }

    let available = buf.len() - HEADER_LEN;
    if payload_len > available {
        return Err(FrameError::Truncated {
            declared: payload_len,
            available,
        });
    }

    let header = FrameHeader {
        msg_type,
        device_id,
        sequence,
        payload_len: payload_len as u8,
    };
    Ok((header, &buf[HEADER_LEN..HEADER_LEN + payload_len]))
}
