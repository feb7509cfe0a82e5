//! Binary-to-broker translation
//!
//! Turns decoded radio records into the flat JSON documents published on
//! the per-device topics. Scaled integers become physical units here
//! (centi-degrees → °C, centi-percent → %, centi-hPa → hPa, mV → V), and
//! the registry is consulted for the resolved name and location so every
//! message is self-describing.
//!
//! Translation has deliberate side effects on the registry: READINGS
//! classify the sensor hardware, STATUS carries device-reported names,
//! locations and configuration, and a STARTUP event resets the device's
//! deduplication window.

use crate::broker::BrokerMessage;
use crate::queue::DecodedRecord;
use crate::registry::DeviceRegistry;
use sensorhub_protocol::Payload;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stateless translator bound to the registry and topic prefix
pub struct Translator {
    registry: Arc<DeviceRegistry>,
    topic_prefix: String,
}

impl Translator {
    /// Create a translator publishing under the given prefix
    pub fn new(registry: Arc<DeviceRegistry>, topic_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            topic_prefix: topic_prefix.into(),
        }
    }

    fn topic(&self, hex_id: &str, channel: &str) -> String {
        format!("{}{}/{}", self.topic_prefix, hex_id, channel)
    }

    /// Translate one record into its broker message
    ///
    /// Returns `None` for message types that have no uplink mapping
    /// (COMMAND and ACK frames are gateway-to-sensor traffic and are not
    /// expected here).
    pub fn translate(&self, record: &DecodedRecord) -> Option<BrokerMessage> {
        let device = record.header.device_id;
        let hex_id = device.hex();

        match &record.payload {
            Payload::Readings(readings) => {
                self.registry.set_sensor_kind(device, readings.classify());

                let doc = json!({
                    "device_id": hex_id,
                    "device_name": self.registry.lookup_name(device),
                    "location": self.registry.lookup_location(device),
                    "timestamp": readings.timestamp,
                    "sequence": record.header.sequence,
                    "temperature": readings.temperature as f64 / 100.0,
                    "humidity": readings.humidity as f64 / 100.0,
                    "pressure": readings.pressure as f64 / 100.0,
                    "altitude": readings.altitude,
                    "battery_voltage": readings.battery_mv as f64 / 1000.0,
                    "battery_percent": readings.battery_percent,
                    "pressure_change": readings.pressure_change as f64 / 100.0,
                    "pressure_trend": readings.pressure_trend,
                    "rssi": record.rssi,
                    "snr": record.snr,
                    "gateway_time": record.received_at,
                });
                Some(BrokerMessage::new(
                    self.topic(&hex_id, "readings"),
                    serde_json::to_vec(&doc).expect("readings doc serializes"),
                ))
            }

            Payload::Status(status) => {
                // device-reported identity wins over the stored one
                self.registry.set_name(device, &status.name);
                self.registry.set_location(device, &status.location);
                self.registry
                    .set_config(device, status.read_interval, status.deep_sleep);

                let doc = json!({
                    "device_id": hex_id,
                    "device_name": self.registry.lookup_name(device),
                    "location": self.registry.lookup_location(device),
                    "uptime": status.uptime,
                    "wake_count": status.wake_count,
                    "sensor_healthy": status.sensor_healthy,
                    "lora_rssi": status.lora_rssi,
                    "lora_snr": status.lora_snr,
                    "free_heap_kb": status.free_heap_kb,
                    "sensor_failures": status.sensor_failures,
                    "tx_failures": status.tx_failures,
                    "last_success_tx": status.last_success_tx,
                    "read_interval_sec": status.read_interval,
                    "deep_sleep_sec": status.deep_sleep,
                    "rssi": record.rssi,
                    "snr": record.snr,
                    "gateway_time": record.received_at,
                });
                Some(BrokerMessage::new(
                    self.topic(&hex_id, "status"),
                    serde_json::to_vec(&doc).expect("status doc serializes"),
                ))
            }

            Payload::Event(event) => {
                if event.is_startup() {
                    debug!(device = %device, "startup event, resetting dedup window");
                    self.registry.clear_dedup(device);
                }

                let doc = json!({
                    "device_id": hex_id,
                    "device_name": self.registry.lookup_name(device),
                    "location": self.registry.lookup_location(device),
                    "event_type": event.event_type,
                    "severity": event.severity,
                    "message": event.message_str(),
                    "timestamp": record.received_at,
                });
                Some(BrokerMessage::new(
                    self.topic(&hex_id, "events"),
                    serde_json::to_vec(&doc).expect("event doc serializes"),
                ))
            }

            Payload::Command(_) | Payload::Ack(_) => {
                warn!(device = %device, msg_type = ?record.header.msg_type, "unexpected downlink frame on uplink path");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sensorhub_protocol::{
        AckPayload, DeviceId, EventPayload, FrameHeader, MessageType, PressureTrend,
        ReadingsPayload, Severity, StatusPayload, EVENT_STARTUP,
    };

    const DEV: DeviceId = DeviceId(0xAABBCCDDEEFF0011);

    fn translator() -> (Translator, Arc<DeviceRegistry>) {
        let registry = Arc::new(DeviceRegistry::new(10, 50).0);
        (
            Translator::new(registry.clone(), "esp-sensor-hub/"),
            registry,
        )
    }

    fn record(msg_type: MessageType, payload: Payload) -> DecodedRecord {
        DecodedRecord {
            header: FrameHeader::new(msg_type, DEV, 123, 0),
            payload,
            rssi: -85,
            snr: 9,
            received_at: Utc::now(),
        }
    }

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
    fn readings_scale_to_physical_units() {
        let (translator, _) = translator();
        let msg = translator
            .translate(&record(
                MessageType::Readings,
                Payload::Readings(sample_readings()),
            ))
            .unwrap();

        assert_eq!(msg.topic, "esp-sensor-hub/AABBCCDDEEFF0011/readings");
        assert!(!msg.retain);

        let doc: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(doc["device_id"], "AABBCCDDEEFF0011");
        assert_eq!(doc["device_name"], "sensor_eeff0011");
        assert_eq!(doc["location"], "unknown");
        assert_eq!(doc["temperature"], 25.31);
        assert_eq!(doc["humidity"], 55.2);
        assert_eq!(doc["pressure"], 1013.25);
        assert_eq!(doc["battery_voltage"], 3.7);
        assert_eq!(doc["battery_percent"], 85);
        assert_eq!(doc["pressure_change"], -0.5);
        assert_eq!(doc["pressure_trend"], "falling");
        assert_eq!(doc["sequence"], 123);
        assert_eq!(doc["rssi"], -85);
        assert_eq!(doc["snr"], 9);
        assert_eq!(doc["timestamp"], 1234567890u32 as u64);
    }

    #[test]
    fn readings_classify_sensor_kind() {
        let (translator, registry) = translator();

        translator.translate(&record(
            MessageType::Readings,
            Payload::Readings(sample_readings()),
        ));
        assert_eq!(registry.snapshot()[0].sensor_type, "environmental-multi");

        let humidity_only = ReadingsPayload {
            pressure: 0,
            ..sample_readings()
        };
        translator.translate(&record(
            MessageType::Readings,
            Payload::Readings(humidity_only),
        ));
        assert_eq!(registry.snapshot()[0].sensor_type, "humidity-temperature");

        let temp_only = ReadingsPayload {
            pressure: 0,
            humidity: 0,
            ..sample_readings()
        };
        translator.translate(&record(
            MessageType::Readings,
            Payload::Readings(temp_only),
        ));
        assert_eq!(registry.snapshot()[0].sensor_type, "temperature-only");
    }

    #[test]
    fn status_updates_registry_and_publishes() {
        let (translator, registry) = translator();
        let status = StatusPayload {
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
        let msg = translator
            .translate(&record(MessageType::Status, Payload::Status(status)))
            .unwrap();

        assert_eq!(msg.topic, "esp-sensor-hub/AABBCCDDEEFF0011/status");
        let doc: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(doc["device_name"], "garden-east");
        assert_eq!(doc["location"], "greenhouse");
        assert_eq!(doc["deep_sleep_sec"], 900);
        assert_eq!(doc["sensor_healthy"], true);

        let snap = registry.snapshot();
        assert_eq!(snap[0].name, "garden-east");
        assert_eq!(snap[0].location, "greenhouse");
        assert_eq!(snap[0].read_interval, 60);
        assert_eq!(snap[0].deep_sleep, 900);
    }

    #[test]
    fn status_with_empty_strings_keeps_existing_identity() {
        let (translator, registry) = translator();
        registry.ensure(DEV).unwrap();
        registry.set_name(DEV, "kept-name");

        let status = StatusPayload {
            name: String::new(),
            location: String::new(),
            uptime: 1,
            wake_count: 1,
            sensor_healthy: true,
            lora_rssi: 0,
            lora_snr: 0,
            free_heap_kb: 0,
            sensor_failures: 0,
            tx_failures: 0,
            last_success_tx: 0,
            read_interval: 30,
            deep_sleep: 0,
        };
        translator.translate(&record(MessageType::Status, Payload::Status(status)));
        assert_eq!(registry.snapshot()[0].name, "kept-name");
    }

    #[test]
    fn startup_event_clears_dedup() {
        let (translator, registry) = translator();
        registry.observe(DEV, 7, -80, 5).unwrap();
        assert!(registry.is_duplicate(DEV, 7));

        let event = EventPayload {
            event_type: EVENT_STARTUP,
            severity: Severity::Info,
            message: bytes::Bytes::from_static(b"boot"),
        };
        let msg = translator
            .translate(&record(MessageType::Event, Payload::Event(event)))
            .unwrap();

        assert_eq!(msg.topic, "esp-sensor-hub/AABBCCDDEEFF0011/events");
        let doc: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(doc["severity"], "info");
        assert_eq!(doc["message"], "boot");
        assert_eq!(doc["event_type"], EVENT_STARTUP);

        assert!(!registry.is_duplicate(DEV, 7));
    }

    #[test]
    fn non_startup_event_preserves_dedup() {
        let (translator, registry) = translator();
        registry.observe(DEV, 7, -80, 5).unwrap();

        let event = EventPayload {
            event_type: 0x05,
            severity: Severity::Error,
            message: bytes::Bytes::from_static(b"sensor read failed"),
        };
        translator.translate(&record(MessageType::Event, Payload::Event(event)));
        assert!(registry.is_duplicate(DEV, 7));
    }

    #[test]
    fn severity_names_are_symbolic() {
        let (translator, _) = translator();
        for (severity, name) in [
            (Severity::Info, "info"),
            (Severity::Warning, "warning"),
            (Severity::Error, "error"),
            (Severity::Critical, "critical"),
        ] {
            let event = EventPayload {
                event_type: 0x09,
                severity,
                message: bytes::Bytes::new(),
            };
            let msg = translator
                .translate(&record(MessageType::Event, Payload::Event(event)))
                .unwrap();
            let doc: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
            assert_eq!(doc["severity"], name);
        }
    }

    #[test]
    fn downlink_frames_have_no_uplink_mapping() {
        let (translator, _) = translator();
        let ack = AckPayload {
            ack_sequence: 1,
            success: true,
            error_code: 0,
            rssi: 0,
            snr: 0,
        };
        assert!(translator
            .translate(&record(MessageType::Ack, Payload::Ack(ack)))
            .is_none());
    }
}
