//! Wire protocol for the sensorhub LoRa gateway
//!
//! This crate defines the binary frame format spoken between battery-powered
//! sensor nodes and the gateway, and nothing else: it does no I/O, holds no
//! state, and is safe to use from any context.
//!
//! # Frame anatomy
//!
//! ```text
//! ┌──────────────────────────────┬─────────────────────────┐
//! │ Header (16 bytes)            │ Payload (0..=238 bytes) │
//! ├──────────────────────────────┼─────────────────────────┤
//! │ magic ver type id seq len ck │ variant by message type │
//! └──────────────────────────────┴─────────────────────────┘
//! ```
//!
//! The message type selects one of five payload variants: READINGS, STATUS
//! and ACK are fixed-size; EVENT and COMMAND are length-prefixed. See
//! [`frame`] for the header layout and [`payload`] for the variants.
//!
//! # Validation
//!
//! [`frame::decode_frame`] checks, in order: buffer length, magic, version,
//! XOR checksum, declared payload length. [`payload::Payload::decode`] then
//! enforces the variant's size contract. Every failure mode is an explicit
//! [`FrameError`] variant; well-formed input never fails.

#![warn(missing_docs)]

pub mod device;
pub mod error;
pub mod frame;
pub mod payload;

pub use device::{DeviceId, PressureTrend, SensorKind, Severity};
pub use error::{FrameError, Result};
pub use frame::{
    decode_frame, encode_frame, FrameHeader, MessageType, HEADER_LEN, MAGIC, MAX_FRAME_LEN,
    MAX_PAYLOAD, PROTOCOL_VERSION,
};
pub use payload::{
    command_type, AckPayload, CommandPayload, EventPayload, Payload, ReadingsPayload,
    StatusPayload, ACK_PAYLOAD_LEN, COMMAND_PAYLOAD_MIN_LEN, EVENT_PAYLOAD_MIN_LEN, EVENT_STARTUP,
    READINGS_PAYLOAD_LEN, STATUS_PAYLOAD_LEN, STATUS_STRING_LEN,
};
