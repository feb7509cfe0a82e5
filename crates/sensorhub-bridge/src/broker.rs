//! Broker client abstraction
//!
//! The publish pipeline talks to the message broker through the
//! [`BrokerClient`] trait so tests can substitute a scripted fake that
//! simulates disconnects, slow acks and malformed inbound messages. The
//! production implementation, [`MqttBroker`], wraps a rumqttc client over
//! plain TCP.

use crate::config::BrokerConfig;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use sensorhub_protocol::DeviceId;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How long one poll drives the event loop before yielding
const POLL_SLICE: Duration = Duration::from_millis(100);

/// An outbound broker message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic to publish on
    pub topic: String,
    /// UTF-8 JSON payload
    pub payload: Vec<u8>,
    /// Whether the broker should retain the message
    pub retain: bool,
}

impl BrokerMessage {
    /// Non-retained message
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            retain: false,
        }
    }

    /// Retained message
    pub fn retained(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            retain: true,
        }
    }
}

/// Inbound broker activity surfaced by [`BrokerClient::poll`]
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A subscribed topic delivered a message
    Message {
        /// Source topic
        topic: String,
        /// Raw payload
        payload: Bytes,
    },
    /// The connection dropped
    Disconnected,
}

/// Contract with the broker transport
#[async_trait]
pub trait BrokerClient: Send {
    /// Establish (or re-establish) the session
    async fn connect(&mut self) -> Result<()>;

    /// Subscribe to a topic
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Publish a message
    async fn publish(&mut self, message: &BrokerMessage) -> Result<()>;

    /// Drive the session (keep-alive, acks) and surface inbound activity.
    /// Returns within roughly 100 ms when nothing happens.
    async fn poll(&mut self) -> Result<Option<BrokerEvent>>;

    /// Whether the session is currently up
    fn is_connected(&self) -> bool;

    /// Client name for logging
    fn name(&self) -> &str;
}

/// rumqttc-backed MQTT client
pub struct MqttBroker {
    config: BrokerConfig,
    client_id: String,
    session: Option<(AsyncClient, EventLoop)>,
    connected: bool,
}

impl MqttBroker {
    /// Create a client for the given broker; the id embeds the gateway
    /// identity so parallel gateways never collide
    pub fn new(config: BrokerConfig, gateway_id: DeviceId) -> Self {
        let client_id = format!("lora-gateway-{:08x}", (gateway_id.0 >> 32) as u32);
        Self {
            config,
            client_id,
            session: None,
            connected: false,
        }
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(&mut self) -> Result<()> {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        // drive the loop until CONNACK or the operation deadline
        let deadline = self.config.operation_timeout;
        tokio::time::timeout(deadline, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(BridgeError::Broker(e.to_string())),
                }
            }
        })
        .await
        .map_err(|_| BridgeError::BrokerTimeout {
            timeout_ms: deadline.as_millis() as u64,
        })??;

        debug!(host = %self.config.host, port = self.config.port, "broker session established");
        self.session = Some((client, event_loop));
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let (client, _) = self.session.as_ref().ok_or(BridgeError::BrokerDisconnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Broker(e.to_string()))
    }

    async fn publish(&mut self, message: &BrokerMessage) -> Result<()> {
        let (client, _) = self.session.as_ref().ok_or(BridgeError::BrokerDisconnected)?;
        let deadline = self.config.operation_timeout;
        tokio::time::timeout(
            deadline,
            client.publish(
                message.topic.clone(),
                QoS::AtMostOnce,
                message.retain,
                message.payload.clone(),
            ),
        )
        .await
        .map_err(|_| BridgeError::BrokerTimeout {
            timeout_ms: deadline.as_millis() as u64,
        })?
        .map_err(|e| BridgeError::Broker(e.to_string()))
    }

    async fn poll(&mut self) -> Result<Option<BrokerEvent>> {
        let Some((_, event_loop)) = self.session.as_mut() else {
            return Ok(None);
        };
        match tokio::time::timeout(POLL_SLICE, event_loop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                trace!(topic = %publish.topic, len = publish.payload.len(), "inbound broker message");
                Ok(Some(BrokerEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                }))
            }
            Ok(Ok(_)) => Ok(None),
            Ok(Err(e)) => {
                warn!(error = %e, "broker connection lost");
                self.connected = false;
                self.session = None;
                Ok(Some(BrokerEvent::Disconnected))
            }
            Err(_) => Ok(None), // quiet slice
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &str {
        "mqtt"
    }
}
