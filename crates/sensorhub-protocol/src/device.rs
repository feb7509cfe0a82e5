//! Device identity and classification types
//!
//! Sensor nodes are identified by the 64-bit factory id they carry in every
//! frame. On external interfaces (broker topics, admin API, persistence) the
//! id is rendered as a 16-character uppercase hex token; the persistence
//! sidecar gets a decimal rendering instead because some JSON consumers
//! truncate large integers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 64-bit identity of a sensor node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Uppercase 16-character hex token used on broker topics and the admin API
    pub fn hex(&self) -> String {
        format!("{:016X}", self.0)
    }

    /// Decimal rendering for the persistence sidecar
    pub fn decimal(&self) -> String {
        self.0.to_string()
    }

    /// Default friendly name derived from the low 32 bits of the identity
    pub fn default_name(&self) -> String {
        format!("sensor_{:08x}", (self.0 & 0xFFFF_FFFF) as u32)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(DeviceId)
    }
}

impl From<u64> for DeviceId {
    fn from(raw: u64) -> Self {
        DeviceId(raw)
    }
}

/// Sensor hardware classification, inferred from readings content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Full environmental sensor (temperature, humidity, pressure)
    EnvironmentalMulti,
    /// Temperature-only probe
    TemperatureOnly,
    /// Humidity + temperature sensor
    HumidityTemperature,
    /// Not yet classified
    #[default]
    Unknown,
}

impl SensorKind {
    /// Stable string form used in snapshots and persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::EnvironmentalMulti => "environmental-multi",
            SensorKind::TemperatureOnly => "temperature-only",
            SensorKind::HumidityTemperature => "humidity-temperature",
            SensorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SensorKind {
    fn from(s: &str) -> Self {
        match s {
            "environmental-multi" => SensorKind::EnvironmentalMulti,
            "temperature-only" => SensorKind::TemperatureOnly,
            "humidity-temperature" => SensorKind::HumidityTemperature,
            _ => SensorKind::Unknown,
        }
    }
}

/// Event severity reported by sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational event
    Info,
    /// Degraded but operational
    Warning,
    /// Operation failed
    Error,
    /// Device-level failure
    Critical,
}

impl Severity {
    /// Decode the wire byte; anything out of range collapses to Critical
    pub fn from_wire(raw: u8) -> Self {
        match raw {
            0 => Severity::Info,
            1 => Severity::Warning,
            2 => Severity::Error,
            _ => Severity::Critical,
        }
    }

    /// Wire byte for this severity
    pub fn to_wire(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Error => 2,
            Severity::Critical => 3,
        }
    }

    /// Symbolic name published on the broker
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Barometric pressure trend reported in readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureTrend {
    /// Pressure falling
    Falling,
    /// Pressure stable
    Steady,
    /// Pressure rising
    Rising,
}

impl PressureTrend {
    /// Decode the wire byte; out-of-range values read as Steady
    pub fn from_wire(raw: u8) -> Self {
        match raw {
            0 => PressureTrend::Falling,
            2 => PressureTrend::Rising,
            _ => PressureTrend::Steady,
        }
    }

    /// Wire byte for this trend
    pub fn to_wire(self) -> u8 {
        match self {
            PressureTrend::Falling => 0,
            PressureTrend::Steady => 1,
            PressureTrend::Rising => 2,
        }
    }
}
