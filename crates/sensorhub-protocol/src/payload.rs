//! Typed payload variants
//!
//! The message type in the frame header selects which of these structures
//! the payload bytes carry. READINGS, STATUS and ACK are fixed-size; EVENT
//! and COMMAND carry a length-prefixed tail and only have a minimum size.
//!
//! Numeric sensor values travel as scaled integers (centi-degrees,
//! centi-percent, centi-hPa, milli-volts); the broker translator divides
//! them back into physical units.

use crate::device::{PressureTrend, Severity};
use crate::error::{FrameError, Result};
use crate::frame::{FrameHeader, MessageType};
use bytes::Bytes;

/// Wire size of [`ReadingsPayload`]
pub const READINGS_PAYLOAD_LEN: usize = 20;

/// Wire size of [`StatusPayload`]
pub const STATUS_PAYLOAD_LEN: usize = 58;

/// Wire size of [`AckPayload`]
pub const ACK_PAYLOAD_LEN: usize = 8;

/// Minimum wire size of [`EventPayload`] (type + severity + length)
pub const EVENT_PAYLOAD_MIN_LEN: usize = 3;

/// Minimum wire size of [`CommandPayload`] (type + length)
pub const COMMAND_PAYLOAD_MIN_LEN: usize = 2;

/// Fixed width of the name and location fields in [`StatusPayload`]
pub const STATUS_STRING_LEN: usize = 16;

/// Event type byte announcing a device (re)start
pub const EVENT_STARTUP: u8 = 0x01;

/// Command type bytes understood by sensor firmware
pub mod command_type {
    /// Capture the current pressure as baseline
    pub const CALIBRATE: u8 = 0x01;
    /// Set an explicit pressure baseline (param: hPa, two decimals)
    pub const SET_BASELINE: u8 = 0x02;
    /// Drop the configured pressure baseline
    pub const CLEAR_BASELINE: u8 = 0x03;
    /// Restart the device
    pub const RESTART: u8 = 0x04;
    /// Request an immediate status report
    pub const STATUS: u8 = 0x05;
    /// Set deep-sleep duration (param: seconds, 0 disables)
    pub const SET_SLEEP: u8 = 0x06;
    /// Set read interval (param: seconds)
    pub const SET_INTERVAL: u8 = 0x07;
}

/// Periodic sensor readings (fixed 20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingsPayload {
    /// Temperature in centi-degrees Celsius (signed)
    pub temperature: i16,
    /// Relative humidity in centi-percent
    pub humidity: u16,
    /// Absolute pressure in centi-hPa
    pub pressure: u32,
    /// Altitude in meters
    pub altitude: u16,
    /// Battery voltage in millivolts
    pub battery_mv: u16,
    /// Battery charge percent
    pub battery_percent: u8,
    /// Pressure trend over the recent window
    pub pressure_trend: PressureTrend,
    /// Pressure change in centi-hPa (signed)
    pub pressure_change: i16,
    /// Device-side timestamp of the measurement
    pub timestamp: u32,
}

impl ReadingsPayload {
    /// Serialize to the fixed wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(READINGS_PAYLOAD_LEN);
        buf.extend_from_slice(&self.temperature.to_le_bytes());
        buf.extend_from_slice(&self.humidity.to_le_bytes());
        buf.extend_from_slice(&self.pressure.to_le_bytes());
        buf.extend_from_slice(&self.altitude.to_le_bytes());
        buf.extend_from_slice(&self.battery_mv.to_le_bytes());
        buf.push(self.battery_percent);
        buf.push(self.pressure_trend.to_wire());
        buf.extend_from_slice(&self.pressure_change.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Decode from payload bytes; the length must match exactly
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != READINGS_PAYLOAD_LEN {
            return Err(FrameError::PayloadSizeMismatch {
                variant: "readings",
                got: buf.len(),
                need: READINGS_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            temperature: i16::from_le_bytes([buf[0], buf[1]]),
            humidity: u16::from_le_bytes([buf[2], buf[3]]),
            pressure: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            altitude: u16::from_le_bytes([buf[8], buf[9]]),
            battery_mv: u16::from_le_bytes([buf[10], buf[11]]),
            battery_percent: buf[12],
            pressure_trend: PressureTrend::from_wire(buf[13]),
            pressure_change: i16::from_le_bytes([buf[14], buf[15]]),
            timestamp: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }

    /// Infer the sensor hardware from which fields carry data
    ///
    /// A pressure reading implies the full environmental sensor; humidity
    /// without pressure implies a humidity/temperature part; otherwise a
    /// bare temperature probe.
    pub fn classify(&self) -> crate::device::SensorKind {
        use crate::device::SensorKind;
        if self.pressure != 0 {
            SensorKind::EnvironmentalMulti
        } else if self.humidity != 0 {
            SensorKind::HumidityTemperature
        } else {
            SensorKind::TemperatureOnly
        }
    }
}

/// Device status report (fixed 58 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPayload {
    /// Device-reported name, empty when unset
    pub name: String,
    /// Device-reported location, empty when unset
    pub location: String,
    /// Uptime in seconds
    pub uptime: u32,
    /// Deep-sleep wake count
    pub wake_count: u32,
    /// Sensor self-check result
    pub sensor_healthy: bool,
    /// RSSI of the last downlink seen by the device
    pub lora_rssi: i16,
    /// SNR of the last downlink seen by the device
    pub lora_snr: i8,
    /// Free heap in KiB
    pub free_heap_kb: u16,
    /// Sensor read failures since boot
    pub sensor_failures: u16,
    /// Radio transmit failures since boot
    pub tx_failures: u16,
    /// Device timestamp of the last successful transmission
    pub last_success_tx: u32,
    /// Configured read interval in seconds
    pub read_interval: u16,
    /// Configured deep-sleep duration in seconds
    pub deep_sleep: u16,
}

/// Copy a string into a fixed NUL-padded field, truncating at the boundary
fn pack_fixed_str(s: &str, out: &mut [u8]) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(out.len());
    out[..n].copy_from_slice(&bytes[..n]);
}

/// Read a NUL-padded fixed field back into a trimmed string
fn unpack_fixed_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).trim().to_string()
}

impl StatusPayload {
    /// Serialize to the fixed wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; STATUS_PAYLOAD_LEN];
        pack_fixed_str(&self.name, &mut buf[0..16]);
        pack_fixed_str(&self.location, &mut buf[16..32]);
        buf[32..36].copy_from_slice(&self.uptime.to_le_bytes());
        buf[36..40].copy_from_slice(&self.wake_count.to_le_bytes());
        buf[40] = self.sensor_healthy as u8;
        buf[41..43].copy_from_slice(&self.lora_rssi.to_le_bytes());
        buf[43] = self.lora_snr as u8;
        buf[44..46].copy_from_slice(&self.free_heap_kb.to_le_bytes());
        buf[46..48].copy_from_slice(&self.sensor_failures.to_le_bytes());
        buf[48..50].copy_from_slice(&self.tx_failures.to_le_bytes());
        buf[50..54].copy_from_slice(&self.last_success_tx.to_le_bytes());
        buf[54..56].copy_from_slice(&self.read_interval.to_le_bytes());
        buf[56..58].copy_from_slice(&self.deep_sleep.to_le_bytes());
        buf
    }

    /// Decode from payload bytes; the length must match exactly
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != STATUS_PAYLOAD_LEN {
            return Err(FrameError::PayloadSizeMismatch {
                variant: "status",
                got: buf.len(),
                need: STATUS_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            name: unpack_fixed_str(&buf[0..16]),
            location: unpack_fixed_str(&buf[16..32]),
            uptime: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            wake_count: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            sensor_healthy: buf[40] != 0,
            lora_rssi: i16::from_le_bytes([buf[41], buf[42]]),
            lora_snr: buf[43] as i8,
            free_heap_kb: u16::from_le_bytes([buf[44], buf[45]]),
            sensor_failures: u16::from_le_bytes([buf[46], buf[47]]),
            tx_failures: u16::from_le_bytes([buf[48], buf[49]]),
            last_success_tx: u32::from_le_bytes(buf[50..54].try_into().unwrap()),
            read_interval: u16::from_le_bytes([buf[54], buf[55]]),
            deep_sleep: u16::from_le_bytes([buf[56], buf[57]]),
        })
    }
}

/// Asynchronous device event (variable size, min 3 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPayload {
    /// Event type byte; [`EVENT_STARTUP`] resets deduplication
    pub event_type: u8,
    /// Event severity
    pub severity: Severity,
    /// Free-form message bytes (UTF-8 by convention)
    pub message: Bytes,
}

impl EventPayload {
    /// Serialize to the wire layout
    pub fn encode(&self) -> Vec<u8> {
        let msg_len = self.message.len().min(u8::MAX as usize);
        let mut buf = Vec::with_capacity(EVENT_PAYLOAD_MIN_LEN + msg_len);
        buf.push(self.event_type);
        buf.push(self.severity.to_wire());
        buf.push(msg_len as u8);
        buf.extend_from_slice(&self.message[..msg_len]);
        buf
    }

    /// Decode from payload bytes
    ///
    /// The declared message length is clamped to the bytes actually present;
    /// sensors occasionally truncate the tail under memory pressure.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < EVENT_PAYLOAD_MIN_LEN {
            return Err(FrameError::PayloadSizeMismatch {
                variant: "event",
                got: buf.len(),
                need: EVENT_PAYLOAD_MIN_LEN,
            });
        }
        let declared = buf[2] as usize;
        let available = buf.len() - EVENT_PAYLOAD_MIN_LEN;
        let msg_len = declared.min(available);
        Ok(Self {
            event_type: buf[0],
            severity: Severity::from_wire(buf[1]),
            message: Bytes::copy_from_slice(&buf[3..3 + msg_len]),
        })
    }

    /// Message bytes as a lossy string for publication
    pub fn message_str(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }

    /// Whether this event announces a device (re)start
    pub fn is_startup(&self) -> bool {
        self.event_type == EVENT_STARTUP
    }
}

/// Gateway-to-sensor command (variable size, min 2 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPayload {
    /// Command type byte (see [`command_type`])
    pub cmd_type: u8,
    /// Parameter bytes, ASCII decimal for numeric parameters
    pub params: Bytes,
}

impl CommandPayload {
    /// Build a command payload; parameters beyond 236 bytes are refused
    pub fn new(cmd_type: u8, params: impl Into<Bytes>) -> Result<Self> {
        let params = params.into();
        let max = crate::frame::MAX_PAYLOAD - COMMAND_PAYLOAD_MIN_LEN;
        if params.len() > max {
            return Err(FrameError::PayloadTooLarge {
                len: params.len(),
                max,
            });
        }
        Ok(Self { cmd_type, params })
    }

    /// Serialize to the wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(COMMAND_PAYLOAD_MIN_LEN + self.params.len());
        buf.push(self.cmd_type);
        buf.push(self.params.len() as u8);
        buf.extend_from_slice(&self.params);
        buf
    }

    /// Decode from payload bytes
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < COMMAND_PAYLOAD_MIN_LEN {
            return Err(FrameError::PayloadSizeMismatch {
                variant: "command",
                got: buf.len(),
                need: COMMAND_PAYLOAD_MIN_LEN,
            });
        }
        let declared = buf[1] as usize;
        let available = buf.len() - COMMAND_PAYLOAD_MIN_LEN;
        if declared > available {
            return Err(FrameError::Truncated {
                declared,
                available,
            });
        }
        Ok(Self {
            cmd_type: buf[0],
            params: Bytes::copy_from_slice(&buf[2..2 + declared]),
        })
    }
}

/// Reception acknowledgement (fixed 8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
    /// Sequence number being acknowledged
    pub ack_sequence: u16,
    /// Whether the frame was accepted
    pub success: bool,
    /// Error code when not accepted (0 otherwise)
    pub error_code: u8,
    /// RSSI the gateway saw for the acknowledged frame
    pub rssi: i16,
    /// SNR the gateway saw for the acknowledged frame
    pub snr: i8,
}

impl AckPayload {
    /// Serialize to the fixed wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ACK_PAYLOAD_LEN);
        buf.extend_from_slice(&self.ack_sequence.to_le_bytes());
        buf.push(self.success as u8);
        buf.push(self.error_code);
        buf.extend_from_slice(&self.rssi.to_le_bytes());
        buf.push(self.snr as u8);
        buf.push(0); // reserved
        buf
    }

    /// Decode from payload bytes; the length must match exactly
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != ACK_PAYLOAD_LEN {
            return Err(FrameError::PayloadSizeMismatch {
                variant: "ack",
                got: buf.len(),
                need: ACK_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            ack_sequence: u16::from_le_bytes([buf[0], buf[1]]),
            success: buf[2] != 0,
            error_code: buf[3],
            rssi: i16::from_le_bytes([buf[4], buf[5]]),
            snr: buf[6] as i8,
        })
    }
}

/// A fully decoded payload, tagged by the variant the header selected
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// READINGS frame
    Readings(ReadingsPayload),
    /// STATUS frame
    Status(StatusPayload),
    /// EVENT frame
    Event(EventPayload),
    /// COMMAND frame
    Command(CommandPayload),
    /// ACK frame
    Ack(AckPayload),
}

impl Payload {
    /// Decode payload bytes according to the header's message type
    pub fn decode(header: &FrameHeader, buf: &[u8]) -> Result<Self> {
        match header.msg_type {
            MessageType::Readings => ReadingsPayload::decode(buf).map(Payload::Readings),
            MessageType::Status => StatusPayload::decode(buf).map(Payload::Status),
            MessageType::Event => EventPayload::decode(buf).map(Payload::Event),
            MessageType::Command => CommandPayload::decode(buf).map(Payload::Command),
            MessageType::Ack => AckPayload::decode(buf).map(Payload::Ack),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::frame::{decode_frame, encode_frame};

    fn sample_readings() -> ReadingsPayload {
        ReadingsPayload {
            temperature: 2531,
            humidity: 5520,
            pressure: 101325,
            altitude: 120,
            battery_mv: 3700,
            battery_percent: 85,
            pressure_trend: PressureTrend::Falling,
            pressure_change: -50,
            timestamp: 1234567890,
        }
    }

    #[test]
    fn readings_roundtrip() {
        let payload = sample_readings();
        let encoded = payload.encode();
        assert_eq!(encoded.len(), READINGS_PAYLOAD_LEN);
        assert_eq!(ReadingsPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn readings_negative_values() {
        let payload = ReadingsPayload {
            temperature: -1250,
            pressure_change: -999,
            ..sample_readings()
        };
        let decoded = ReadingsPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded.temperature, -1250);
        assert_eq!(decoded.pressure_change, -999);
    }

    #[test]
    fn readings_wrong_size_rejected() {
        let err = ReadingsPayload::decode(&[0u8; 19]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadSizeMismatch {
                variant: "readings",
                ..
            }
        ));
    }

    #[test]
    fn status_roundtrip() {
        let payload = StatusPayload {
            name: "garden-east".to_string(),
            location: "greenhouse".to_string(),
            uptime: 86400,
            wake_count: 1440,
            sensor_healthy: true,
            lora_rssi: -92,
            lora_snr: 7,
            free_heap_kb: 148,
            sensor_failures: 2,
            tx_failures: 5,
            last_success_tx: 1234560000,
            read_interval: 60,
            deep_sleep: 900,
        };
        let encoded = payload.encode();
        assert_eq!(encoded.len(), STATUS_PAYLOAD_LEN);
        assert_eq!(StatusPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn status_name_truncated_at_field_width() {
        let payload = StatusPayload {
            name: "a-name-longer-than-sixteen-bytes".to_string(),
            location: String::new(),
            uptime: 0,
            wake_count: 0,
            sensor_healthy: false,
            lora_rssi: 0,
            lora_snr: 0,
            free_heap_kb: 0,
            sensor_failures: 0,
            tx_failures: 0,
            last_success_tx: 0,
            read_interval: 0,
            deep_sleep: 0,
        };
        let decoded = StatusPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded.name.len(), STATUS_STRING_LEN);
        assert_eq!(decoded.name, "a-name-longer-th");
        assert!(decoded.location.is_empty());
    }

    #[test]
    fn status_padding_is_trimmed() {
        let mut buf = vec![0u8; STATUS_PAYLOAD_LEN];
        buf[0..5].copy_from_slice(b"attic");
        let decoded = StatusPayload::decode(&buf).unwrap();
        assert_eq!(decoded.name, "attic");
    }

    #[test]
    fn event_roundtrip() {
        let payload = EventPayload {
            event_type: EVENT_STARTUP,
            severity: Severity::Info,
            message: Bytes::from_static(b"boot after deep sleep"),
        };
        let encoded = payload.encode();
        let decoded = EventPayload::decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
        assert!(decoded.is_startup());
        assert_eq!(decoded.message_str(), "boot after deep sleep");
    }

    #[test]
    fn event_minimum_size() {
        let decoded = EventPayload::decode(&[0x02, 1, 0]).unwrap();
        assert_eq!(decoded.event_type, 0x02);
        assert_eq!(decoded.severity, Severity::Warning);
        assert!(decoded.message.is_empty());

        let err = EventPayload::decode(&[0x02, 1]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadSizeMismatch { .. }));
    }

    #[test]
    fn event_truncated_message_is_clamped() {
        // declares 10 message bytes but only carries 4
        let buf = [0x03, 2, 10, b'f', b'a', b'i', b'l'];
        let decoded = EventPayload::decode(&buf).unwrap();
        assert_eq!(decoded.message_str(), "fail");
    }

    #[test]
    fn command_roundtrip() {
        let payload = CommandPayload::new(command_type::SET_INTERVAL, &b"120"[..]).unwrap();
        let encoded = payload.encode();
        assert_eq!(encoded, vec![0x07, 3, b'1', b'2', b'0']);
        assert_eq!(CommandPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn command_empty_params() {
        let payload = CommandPayload::new(command_type::RESTART, Bytes::new()).unwrap();
        let encoded = payload.encode();
        assert_eq!(encoded, vec![0x04, 0]);
        let decoded = CommandPayload::decode(&encoded).unwrap();
        assert!(decoded.params.is_empty());
    }

    #[test]
    fn command_declared_longer_than_carried_rejected() {
        let err = CommandPayload::decode(&[0x07, 5, b'1']).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    #[test]
    fn ack_roundtrip() {
        let payload = AckPayload {
            ack_sequence: 123,
            success: true,
            error_code: 0,
            rssi: -85,
            snr: 9,
        };
        let encoded = payload.encode();
        assert_eq!(encoded.len(), ACK_PAYLOAD_LEN);
        assert_eq!(AckPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn payload_dispatch_follows_header_type() {
        let dev = DeviceId(0x42);
        let readings = sample_readings();
        let frame = encode_frame(MessageType::Readings, dev, 1, &readings.encode()).unwrap();
        let (header, bytes) = decode_frame(&frame).unwrap();
        match Payload::decode(&header, bytes).unwrap() {
            Payload::Readings(r) => assert_eq!(r, readings),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn payload_dispatch_rejects_size_mismatch() {
        let dev = DeviceId(0x42);
        // readings header with an ack-sized payload
        let frame = encode_frame(MessageType::Readings, dev, 1, &[0u8; ACK_PAYLOAD_LEN]).unwrap();
        let (header, bytes) = decode_frame(&frame).unwrap();
        let err = Payload::decode(&header, bytes).unwrap_err();
        assert!(matches!(err, FrameError::PayloadSizeMismatch { .. }));
    }
}
