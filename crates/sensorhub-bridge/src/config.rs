//! Gateway configuration
//!
//! Read once at startup, never hot-reloaded. Broker coordinates, topic
//! names, queue capacities and timing knobs all live here; the radio
//! deployment parameters travel in their own struct because they must match
//! the sensor fleet exactly and are handed verbatim to the radio driver.

use sensorhub_protocol::DeviceId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default MQTT topic prefix for per-device topics
pub const DEFAULT_TOPIC_PREFIX: &str = "esp-sensor-hub/";

/// Default inbound command topic
pub const DEFAULT_COMMAND_TOPIC: &str = "lora/command";

/// Default outbound command-ack topic
pub const DEFAULT_COMMAND_ACK_TOPIC: &str = "lora/command/ack";

/// Default retained gateway status topic
pub const DEFAULT_GATEWAY_STATUS_TOPIC: &str = "lora/gateway/status";

/// Default registry capacity (tracked sensors)
pub const DEFAULT_REGISTRY_CAPACITY: usize = 10;

/// Default per-device dedup ring size
pub const DEFAULT_DEDUP_RING_SIZE: usize = 50;

/// Default command queue capacity
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 10;

/// Default decoded-record queue depth
pub const DEFAULT_RECORD_QUEUE_DEPTH: usize = 20;

/// Radio parameters shared with the sensor fleet
///
/// Mismatching any of these means silence, not errors; they are deployment
/// configuration and the bridge only carries them through to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioParams {
    /// Carrier frequency in MHz (915 US, 868 EU)
    pub frequency_mhz: f32,
    /// Bandwidth in kHz
    pub bandwidth_khz: f32,
    /// Spreading factor (7..=12)
    pub spreading_factor: u8,
    /// Coding rate denominator (4/x)
    pub coding_rate: u8,
    /// TX power in dBm for ACKs and commands
    pub tx_power_dbm: i8,
    /// Preamble length in symbols
    pub preamble_len: u16,
    /// Private-network sync word
    pub sync_word: u8,
}

impl Default for RadioParams {
    fn default() -> Self {
        Self {
            frequency_mhz: 915.0,
            bandwidth_khz: 125.0,
            spreading_factor: 9,
            coding_rate: 7,
            tx_power_dbm: 14,
            preamble_len: 8,
            sync_word: 0x12,
        }
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker hostname or address
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Optional username
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password
    #[serde(default)]
    pub password: Option<String>,
    /// Keep-alive interval
    #[serde(with = "humantime_serde", default = "default_keep_alive")]
    pub keep_alive: Duration,
    /// Reconnect retry interval when disconnected
    #[serde(with = "humantime_serde", default = "default_reconnect_interval")]
    pub reconnect_interval: Duration,
    /// Deadline for individual broker operations
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    pub operation_timeout: Duration,
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(15)
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            reconnect_interval: default_reconnect_interval(),
            operation_timeout: default_operation_timeout(),
        }
    }
}

/// Optional persistence sidecar settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Base URL of the sidecar API
    pub base_url: String,
    /// Pending-write queue bound (drop-oldest beyond this)
    #[serde(default = "default_sidecar_queue_cap")]
    pub queue_capacity: usize,
    /// Interval between reconnect attempts when unreachable
    #[serde(with = "humantime_serde", default = "default_sidecar_reconnect")]
    pub reconnect_interval: Duration,
    /// Interval between health probes when reachable
    #[serde(with = "humantime_serde", default = "default_sidecar_health")]
    pub health_interval: Duration,
}

fn default_sidecar_queue_cap() -> usize {
    1000
}

fn default_sidecar_reconnect() -> Duration {
    Duration::from_secs(30)
}

fn default_sidecar_health() -> Duration {
    Duration::from_secs(60)
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// This gateway's own 64-bit identity (stamped on ACK and command frames)
    pub gateway_id: DeviceId,
    /// Broker connection settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Topic prefix for per-device readings/status/events topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Inbound command topic
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
    /// Outbound command-ack topic
    #[serde(default = "default_command_ack_topic")]
    pub command_ack_topic: String,
    /// Retained gateway status topic
    #[serde(default = "default_gateway_status_topic")]
    pub gateway_status_topic: String,
    /// Maximum tracked devices
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,
    /// Per-device dedup ring size
    #[serde(default = "default_dedup_ring_size")]
    pub dedup_ring_size: usize,
    /// Command queue capacity
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    /// Command hard-expiration window
    #[serde(with = "humantime_serde", default = "default_command_expiration")]
    pub command_expiration: Duration,
    /// Decoded-record queue depth
    #[serde(default = "default_record_queue_depth")]
    pub record_queue_depth: usize,
    /// Enqueue deadline for the decoded-record queue
    #[serde(with = "humantime_serde", default = "default_enqueue_timeout")]
    pub record_enqueue_timeout: Duration,
    /// Delay after a reception before driving command retries (sensor RX window)
    #[serde(with = "humantime_serde", default = "default_rx_window_delay")]
    pub rx_window_delay: Duration,
    /// Quiet period between consecutive command retries
    #[serde(with = "humantime_serde", default = "default_retry_quiet_period")]
    pub retry_quiet_period: Duration,
    /// Arbiter acquisition timeout
    #[serde(with = "humantime_serde", default = "default_arbiter_timeout")]
    pub arbiter_timeout: Duration,
    /// Idle sleep in the receive poll loop
    #[serde(with = "humantime_serde", default = "default_rx_idle_sleep")]
    pub rx_idle_sleep: Duration,
    /// Watchdog deadline per execution context
    #[serde(with = "humantime_serde", default = "default_watchdog_timeout")]
    pub watchdog_timeout: Duration,
    /// Registry persistence file
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,
    /// Radio deployment parameters
    #[serde(default)]
    pub radio: RadioParams,
    /// Optional persistence sidecar
    #[serde(default)]
    pub sidecar: Option<SidecarConfig>,
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_command_topic() -> String {
    DEFAULT_COMMAND_TOPIC.to_string()
}

fn default_command_ack_topic() -> String {
    DEFAULT_COMMAND_ACK_TOPIC.to_string()
}

fn default_gateway_status_topic() -> String {
    DEFAULT_GATEWAY_STATUS_TOPIC.to_string()
}

fn default_registry_capacity() -> usize {
    DEFAULT_REGISTRY_CAPACITY
}

fn default_dedup_ring_size() -> usize {
    DEFAULT_DEDUP_RING_SIZE
}

fn default_command_queue_capacity() -> usize {
    DEFAULT_COMMAND_QUEUE_CAPACITY
}

fn default_command_expiration() -> Duration {
    Duration::from_secs(300)
}

fn default_record_queue_depth() -> usize {
    DEFAULT_RECORD_QUEUE_DEPTH
}

fn default_enqueue_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_rx_window_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_retry_quiet_period() -> Duration {
    Duration::from_millis(50)
}

fn default_arbiter_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_rx_idle_sleep() -> Duration {
    Duration::from_millis(10)
}

fn default_watchdog_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("sensor_registry.json")
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateway_id: DeviceId(0),
            broker: BrokerConfig::default(),
            topic_prefix: default_topic_prefix(),
            command_topic: default_command_topic(),
            command_ack_topic: default_command_ack_topic(),
            gateway_status_topic: default_gateway_status_topic(),
            registry_capacity: default_registry_capacity(),
            dedup_ring_size: default_dedup_ring_size(),
            command_queue_capacity: default_command_queue_capacity(),
            command_expiration: default_command_expiration(),
            record_queue_depth: default_record_queue_depth(),
            record_enqueue_timeout: default_enqueue_timeout(),
            rx_window_delay: default_rx_window_delay(),
            retry_quiet_period: default_retry_quiet_period(),
            arbiter_timeout: default_arbiter_timeout(),
            rx_idle_sleep: default_rx_idle_sleep(),
            watchdog_timeout: default_watchdog_timeout(),
            registry_file: default_registry_file(),
            radio: RadioParams::default(),
            sidecar: None,
        }
    }
}

impl BridgeConfig {
    /// Per-device topic under the configured prefix, e.g.
    /// `esp-sensor-hub/AABBCCDDEEFF0011/readings`
    pub fn device_topic(&self, device: DeviceId, channel: &str) -> String {
        format!("{}{}/{}", self.topic_prefix, device.hex(), channel)
    }
}

/// Builder for [`BridgeConfig`]
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a builder with defaults
    pub fn new(gateway_id: DeviceId) -> Self {
        Self {
            config: BridgeConfig {
                gateway_id,
                ..Default::default()
            },
        }
    }

    /// Set broker host and port
    pub fn broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.broker.host = host.into();
        self.config.broker.port = port;
        self
    }

    /// Set broker credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.broker.username = Some(username.into());
        self.config.broker.password = Some(password.into());
        self
    }

    /// Set the per-device topic prefix
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    /// Set the registry capacity
    pub fn registry_capacity(mut self, capacity: usize) -> Self {
        self.config.registry_capacity = capacity;
        self
    }

    /// Set the command queue capacity
    pub fn command_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.command_queue_capacity = capacity;
        self
    }

    /// Set the command expiration window
    pub fn command_expiration(mut self, window: Duration) -> Self {
        self.config.command_expiration = window;
        self
    }

    /// Set the registry persistence file
    pub fn registry_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.registry_file = path.into();
        self
    }

    /// Configure the persistence sidecar
    pub fn sidecar(mut self, base_url: impl Into<String>) -> Self {
        self.config.sidecar = Some(SidecarConfig {
            base_url: base_url.into(),
            queue_capacity: default_sidecar_queue_cap(),
            reconnect_interval: default_sidecar_reconnect(),
            health_interval: default_sidecar_health(),
        });
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
