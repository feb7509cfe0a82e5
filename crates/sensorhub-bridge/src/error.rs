//! Error types for bridge operations
//!
//! Everything here is recovered locally by the component that hit it; no
//! error crosses the process boundary. The watchdog is the only thing that
//! can take the gateway down, and it does so on lost liveness, not on an
//! error value.

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Frame / protocol =====
    /// Frame failed codec validation
    #[error(transparent)]
    Frame(#[from] sensorhub_protocol::FrameError),

    // ===== Registry =====
    /// Registry is at its configured capacity
    #[error("device registry full: capacity {capacity} reached")]
    RegistryFull {
        /// Configured capacity
        capacity: usize,
    },

    // ===== Queues =====
    /// Decoded-record queue did not accept the record in time
    #[error("decoded-record queue full")]
    RecordQueueFull,

    /// Command queue is at capacity and the command did not coalesce
    #[error("command queue full: capacity {capacity} reached")]
    CommandQueueFull {
        /// Configured capacity
        capacity: usize,
    },

    // ===== Radio =====
    /// Arbiter acquisition timed out
    #[error("radio busy: arbiter not acquired within {timeout_ms}ms")]
    RadioBusy {
        /// Acquisition timeout that elapsed
        timeout_ms: u64,
    },

    /// Radio BUSY line did not clear before transmit
    #[error("radio not ready: BUSY line held for {timeout_ms}ms")]
    RadioNotReady {
        /// Busy-wait timeout that elapsed
        timeout_ms: u64,
    },

    /// Driver-level radio failure
    #[error("radio error: {0}")]
    Radio(String),

    /// Operation illegal in the radio's current state
    #[error("invalid radio transition: {from} -> {attempted}")]
    RadioState {
        /// State the radio was in
        from: &'static str,
        /// Operation that was attempted
        attempted: &'static str,
    },

    // ===== Broker =====
    /// Broker connection or session failure
    #[error("broker error: {0}")]
    Broker(String),

    /// Broker operation exceeded its deadline
    #[error("broker operation timed out after {timeout_ms}ms")]
    BrokerTimeout {
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Broker is not connected
    #[error("broker not connected")]
    BrokerDisconnected,

    // ===== Command ingress =====
    /// Inbound command JSON did not parse or failed validation
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Command action is not recognized
    #[error("unknown command action: {0}")]
    UnknownAction(String),

    /// Command parameter outside the permitted range
    #[error("command value {value} out of range ({min}..={max})")]
    ValueOutOfRange {
        /// Rejected value
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },

    // ===== Persistence / sidecar =====
    /// Registry persistence failure (best-effort, logged by callers)
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Sidecar write path failure
    #[error("sidecar error: {0}")]
    Sidecar(String),

    // ===== Infrastructure =====
    /// An internal channel endpoint is gone
    #[error("channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Short stable code for logging and counters
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Frame(e) => e.error_code(),
            BridgeError::RegistryFull { .. } => "REGISTRY_FULL",
            BridgeError::RecordQueueFull => "RECORD_QUEUE_FULL",
            BridgeError::CommandQueueFull { .. } => "COMMAND_QUEUE_FULL",
            BridgeError::RadioBusy { .. } => "RADIO_BUSY",
            BridgeError::RadioNotReady { .. } => "RADIO_NOT_READY",
            BridgeError::Radio(_) => "RADIO_ERROR",
            BridgeError::RadioState { .. } => "RADIO_STATE",
            BridgeError::Broker(_) => "BROKER_ERROR",
            BridgeError::BrokerTimeout { .. } => "BROKER_TIMEOUT",
            BridgeError::BrokerDisconnected => "BROKER_DISCONNECTED",
            BridgeError::InvalidCommand(_) => "INVALID_COMMAND",
            BridgeError::UnknownAction(_) => "UNKNOWN_ACTION",
            BridgeError::ValueOutOfRange { .. } => "VALUE_OUT_OF_RANGE",
            BridgeError::Persistence(_) => "PERSISTENCE_ERROR",
            BridgeError::Sidecar(_) => "SIDECAR_ERROR",
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::Io(_) => "IO_ERROR",
            BridgeError::Json(_) => "JSON_ERROR",
        }
    }

    /// Whether the triggering operation is worth retrying as-is
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BridgeError::RadioBusy { .. }
                | BridgeError::RadioNotReady { .. }
                | BridgeError::Broker(_)
                | BridgeError::BrokerTimeout { .. }
                | BridgeError::BrokerDisconnected
                | BridgeError::Sidecar(_)
        )
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BridgeError::ChannelClosed
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
