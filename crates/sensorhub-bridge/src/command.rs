//! Command ingress
//!
//! Inbound commands arrive as JSON on the command topic (and the admin
//! surface reuses the same path):
//!
//! ```json
//! { "device_id": "AABBCCDDEEFF0011", "action": "set_interval", "value": 90 }
//! ```
//!
//! Parsing and validation are pure; the output is a [`CommandSpec`] ready
//! for the command queue, with parameters already serialized to the ASCII
//! decimal wire form the sensors expect.

use crate::error::{BridgeError, Result};
use bytes::Bytes;
use sensorhub_protocol::{command_type, DeviceId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Permitted read-interval range in seconds
pub const INTERVAL_RANGE: (u32, u32) = (5, 3600);

/// Permitted deep-sleep range in seconds; 0 disables deep sleep
pub const SLEEP_RANGE: (u32, u32) = (0, 3600);

/// Permitted pressure-baseline range in hPa
pub const BASELINE_RANGE: (f64, f64) = (900.0, 1100.0);

/// Recognized command actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    /// Set the sensor read interval (seconds)
    SetInterval,
    /// Set the deep-sleep duration (seconds, 0 disables)
    SetSleep,
    /// Restart the device
    Restart,
    /// Request an immediate status report
    Status,
    /// Capture the current pressure as baseline
    Calibrate,
    /// Set an explicit pressure baseline (hPa)
    SetBaseline,
    /// Drop the configured pressure baseline
    ClearBaseline,
}

impl CommandAction {
    /// Stable name used in acks and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::SetInterval => "set_interval",
            CommandAction::SetSleep => "set_sleep",
            CommandAction::Restart => "restart",
            CommandAction::Status => "status",
            CommandAction::Calibrate => "calibrate",
            CommandAction::SetBaseline => "set_baseline",
            CommandAction::ClearBaseline => "clear_baseline",
        }
    }

    /// Wire command-type byte
    pub fn cmd_type(&self) -> u8 {
        match self {
            CommandAction::SetInterval => command_type::SET_INTERVAL,
            CommandAction::SetSleep => command_type::SET_SLEEP,
            CommandAction::Restart => command_type::RESTART,
            CommandAction::Status => command_type::STATUS,
            CommandAction::Calibrate => command_type::CALIBRATE,
            CommandAction::SetBaseline => command_type::SET_BASELINE,
            CommandAction::ClearBaseline => command_type::CLEAR_BASELINE,
        }
    }

    /// Whether this action carries a numeric value
    pub fn takes_value(&self) -> bool {
        matches!(
            self,
            CommandAction::SetInterval | CommandAction::SetSleep | CommandAction::SetBaseline
        )
    }
}

/// Raw inbound command object
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    /// Target device as a hex token
    pub device_id: String,
    /// Requested action
    pub action: CommandAction,
    /// Numeric parameter for actions that take one
    #[serde(default)]
    pub value: Option<f64>,
}

/// A validated command, ready for the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Target device
    pub target: DeviceId,
    /// Action name (for acks and logging)
    pub action: &'static str,
    /// Wire command-type byte
    pub cmd_type: u8,
    /// Parameter bytes, ASCII decimal, no trailing NUL
    pub params: Bytes,
}

/// Acknowledgement published after command handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandAck {
    /// Target device hex token (echoed from the request)
    pub device_id: String,
    /// Action name (echoed from the request)
    pub action: String,
    /// Outcome: `queued`, `rejected` or `queue_full`
    pub status: String,
}

impl CommandRequest {
    /// Parse a command object from raw topic payload bytes
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| BridgeError::InvalidCommand(format!("json parse: {e}")))
    }

    /// Validate and map to the wire form
    pub fn validate(&self) -> Result<CommandSpec> {
        let target = DeviceId::from_str(&self.device_id)
            .map_err(|_| BridgeError::InvalidCommand(format!("bad device_id: {}", self.device_id)))?;

        let params = match self.action {
            CommandAction::SetInterval => {
                let v = self.integer_value(INTERVAL_RANGE)?;
                Bytes::from(v.to_string())
            }
            CommandAction::SetSleep => {
                let v = self.integer_value(SLEEP_RANGE)?;
                Bytes::from(v.to_string())
            }
            CommandAction::SetBaseline => {
                let v = self
                    .value
                    .ok_or_else(|| BridgeError::InvalidCommand("set_baseline needs a value".into()))?;
                if !(BASELINE_RANGE.0..=BASELINE_RANGE.1).contains(&v) {
                    return Err(BridgeError::ValueOutOfRange {
                        value: v,
                        min: BASELINE_RANGE.0,
                        max: BASELINE_RANGE.1,
                    });
                }
                Bytes::from(format!("{v:.2}"))
            }
            _ => Bytes::new(),
        };

        Ok(CommandSpec {
            target,
            action: self.action.as_str(),
            cmd_type: self.action.cmd_type(),
            params,
        })
    }

    fn integer_value(&self, (min, max): (u32, u32)) -> Result<u32> {
        let v = self.value.ok_or_else(|| {
            BridgeError::InvalidCommand(format!("{} needs a value", self.action.as_str()))
        })?;
        if !(min as f64..=max as f64).contains(&v) {
            return Err(BridgeError::ValueOutOfRange {
                value: v,
                min: min as f64,
                max: max as f64,
            });
        }
        Ok(v as u32)
    }
}

impl CommandAck {
    /// Ack for a command accepted into the queue
    pub fn queued(req: &CommandRequest) -> Self {
        Self::with_status(req, "queued")
    }

    /// Ack with an explicit status
    pub fn with_status(req: &CommandRequest, status: &str) -> Self {
        Self {
            device_id: req.device_id.clone(),
            action: req.action.as_str().to_string(),
            status: status.to_string(),
        }
    }
}
