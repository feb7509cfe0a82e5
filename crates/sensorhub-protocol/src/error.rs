//! Error types for frame encoding and decoding
//!
//! Every way a received byte sequence can fail validation is enumerated
//! here; the receive pipeline counts all of them as dropped frames and
//! never propagates them further.

use thiserror::Error;

/// Decode/encode failures for the radio frame codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer shorter than the fixed header
    #[error("frame too short: {len} bytes, header needs {min}")]
    FrameTooShort {
        /// Received length
        len: usize,
        /// Minimum length (header size)
        min: usize,
    },

    /// Magic bytes did not match the protocol family
    #[error("bad magic: expected {expected:02X?}, got {got:02X?}")]
    BadMagic {
        /// Expected magic bytes
        expected: [u8; 2],
        /// Received magic bytes
        got: [u8; 2],
    },

    /// Unsupported protocol version
    #[error("bad version: expected 0x{expected:02X}, got 0x{got:02X}")]
    BadVersion {
        /// Supported version
        expected: u8,
        /// Received version
        got: u8,
    },

    /// Header checksum mismatch
    #[error("bad checksum: computed 0x{computed:02X}, header carries 0x{carried:02X}")]
    BadChecksum {
        /// XOR over the received header bytes
        computed: u8,
        /// Checksum byte from the header
        carried: u8,
    },

    /// Declared payload length exceeds the received bytes
    #[error("truncated frame: header declares {declared} payload bytes, {available} available")]
    Truncated {
        /// Declared payload length
        declared: usize,
        /// Bytes actually present after the header
        available: usize,
    },

    /// Payload length does not fit the variant selected by the message type
    #[error("payload size mismatch for {variant}: got {got} bytes, need {need}")]
    PayloadSizeMismatch {
        /// Variant name
        variant: &'static str,
        /// Received payload length
        got: usize,
        /// Required (fixed variants) or minimum (variable variants) length
        need: usize,
    },

    /// Unknown message type byte
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// Payload larger than the radio allows
    #[error("payload too large: {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Attempted payload length
        len: usize,
        /// Maximum payload size
        max: usize,
    },
}

impl FrameError {
    /// Short stable code for logging and counters
    pub fn error_code(&self) -> &'static str {
        match self {
            FrameError::FrameTooShort { .. } => "FRAME_TOO_SHORT",
            FrameError::BadMagic { .. } => "BAD_MAGIC",
            FrameError::BadVersion { .. } => "BAD_VERSION",
            FrameError::BadChecksum { .. } => "BAD_CHECKSUM",
            FrameError::Truncated { .. } => "TRUNCATED",
            FrameError::PayloadSizeMismatch { .. } => "PAYLOAD_SIZE_MISMATCH",
            FrameError::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            FrameError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
        }
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = FrameError::BadChecksum {
            computed: 0x12,
            carried: 0x34,
        };
        assert_eq!(err.error_code(), "BAD_CHECKSUM");
        assert!(err.to_string().contains("0x12"));
    }

    #[test]
    fn truncated_reports_both_lengths() {
        let err = FrameError::Truncated {
            declared: 20,
            available: 4,
        };
        assert!(err.to_string().contains("20"));
        assert!(err.to_string().contains("4"));
    }
}
