//! Bridge pipeline between a LoRa sensor network and an MQTT broker
//!
//! A single gateway instance concurrently moves data in both directions:
//! binary radio frames from battery-powered sensors become JSON messages on
//! per-device broker topics, and JSON commands from the broker become radio
//! frames delivered opportunistically whenever their target wakes up.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           Gateway                              │
//! ├────────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  ┌───────┐   ┌──────────────────┐   ┌──────────────────────┐   │
//! │  │ Radio │◄─►│ RadioArbiter     │◄─►│ ReceivePipeline      │   │
//! │  │ (HW)  │   │ (exclusive lock) │   │ decode·dedup·observe │   │
//! │  └───────┘   └───────▲──────────┘   └──────────┬───────────┘   │
//! │                      │                  record queue           │
//! │             ┌────────┴──────────┐   ┌──────────▼───────────┐   │
//! │             │ CommandDispatcher │◄──│ PublishPipeline      │◄─► broker
//! │             │ queue·retry·seq   │   │ translate·publish·   │   │
//! │             └───────────────────┘   │ command ingress      │   │
//! │                                     └──────────────────────┘   │
//! │   DeviceRegistry (shared) · Watchdog · Sidecar · Persistence   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flow: radio → receive pipeline → record queue → publish pipeline →
//! broker. Control flow: broker → command ingress → command queue →
//! (on traffic from the target) → radio.
//!
//! # Concurrency
//!
//! Two execution contexts: the receive pipeline runs alone on its task and
//! does nothing but radio work; the publish pipeline multiplexes broker
//! I/O, command ingress and retries. The device registry is the only
//! shared mutable state and serializes internally; the radio is mediated
//! by the arbiter. Both contexts feed a watchdog whose expiry is the one
//! fatal condition in the system — every other failure is recovered where
//! it happens.

#![warn(missing_docs)]

pub mod broker;
pub mod command;
pub mod command_queue;
pub mod config;
pub mod error;
pub mod gateway;
pub mod persist;
pub mod publish;
pub mod queue;
pub mod radio;
pub mod registry;
pub mod rx;
pub mod sidecar;
pub mod stats;
pub mod translator;
pub mod watchdog;

pub use broker::{BrokerClient, BrokerEvent, BrokerMessage, MqttBroker};
pub use command::{CommandAck, CommandAction, CommandRequest, CommandSpec};
pub use command_queue::{CommandDispatcher, CommandQueue, CommandSnapshot, EnqueueOutcome};
pub use config::{BridgeConfig, BridgeConfigBuilder, BrokerConfig, RadioParams, SidecarConfig};
pub use error::{BridgeError, Result};
pub use gateway::{spawn, GatewayHandle, GatewayTasks};
pub use persist::{FileRegistryStore, RegistryDocument, RegistryStore};
pub use publish::{PublishPipeline, PublishSettings};
pub use queue::{record_queue, DecodedRecord, RecordReceiver, RecordSender};
pub use radio::{
    MockRadio, MockRadioHandle, Radio, RadioArbiter, RadioInterface, RadioState, ReceivedFrame,
};
pub use registry::{DeviceRegistry, DeviceSnapshot};
pub use rx::{ReceivePipeline, ReceiveSettings};
pub use sidecar::{SidecarClient, SidecarHandle};
pub use stats::{GatewayStats, StatsSnapshot};
pub use translator::Translator;
pub use watchdog::{Watchdog, WatchdogHandle};

// Protocol types that appear throughout the bridge API
pub use sensorhub_protocol::{DeviceId, SensorKind, Severity};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
