//! Publish pipeline and command path
//!
//! The broker-facing half of the bridge. One loop multiplexes four
//! concerns:
//!
//! 1. broker session upkeep — reconnect every 5 s while down, re-subscribe
//!    and announce `online` (retained) on success;
//! 2. inbound command ingress from the command topic;
//! 3. draining the decoded-record queue in arrival order, translating and
//!    publishing each record;
//! 4. opportunistic command retries — a record from a device is the proof
//!    it is awake, so pending commands for that device are driven right
//!    after its RX window opens.
//!
//! Records are processed strictly in arrival order; there is no parallel
//! translation per device.

use crate::broker::{BrokerClient, BrokerEvent, BrokerMessage};
use crate::command::{CommandAck, CommandRequest};
use crate::command_queue::CommandDispatcher;
use crate::error::BridgeError;
use crate::queue::{DecodedRecord, RecordReceiver};
use crate::sidecar::SidecarHandle;
use crate::stats::GatewayStats;
use crate::translator::Translator;
use crate::watchdog::WatchdogHandle;
use sensorhub_protocol::{DeviceId, Payload};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Settings for the publish pipeline
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// This gateway's identity (for the status announcement)
    pub gateway_id: DeviceId,
    /// Network address advertised in the status announcement
    pub network_address: String,
    /// Inbound command topic
    pub command_topic: String,
    /// Outbound command-ack topic
    pub command_ack_topic: String,
    /// Retained gateway status topic
    pub gateway_status_topic: String,
    /// Reconnect cadence while the broker is down
    pub reconnect_interval: Duration,
    /// Blocking dequeue deadline on the record queue
    pub recv_timeout: Duration,
    /// Delay between a reception and command retries (sensor RX window)
    pub rx_window_delay: Duration,
}

/// The broker-facing pipeline
pub struct PublishPipeline {
    broker: Box<dyn BrokerClient>,
    records: RecordReceiver,
    translator: Translator,
    dispatcher: Arc<CommandDispatcher>,
    stats: Arc<GatewayStats>,
    watchdog: WatchdogHandle,
    sidecar: Option<SidecarHandle>,
    settings: PublishSettings,
    last_reconnect: Option<Instant>,
}

impl PublishPipeline {
    /// Wire the pipeline to its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Box<dyn BrokerClient>,
        records: RecordReceiver,
        translator: Translator,
        dispatcher: Arc<CommandDispatcher>,
        stats: Arc<GatewayStats>,
        watchdog: WatchdogHandle,
        sidecar: Option<SidecarHandle>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            broker,
            records,
            translator,
            dispatcher,
            stats,
            watchdog,
            sidecar,
            settings,
            last_reconnect: None,
        }
    }

    /// Run the pipeline until the record queue's producer goes away
    pub async fn run(mut self) {
        info!(broker = self.broker.name(), "publish pipeline started");
        loop {
            self.watchdog.feed();

            if !self.broker.is_connected() {
                let due = self
                    .last_reconnect
                    .map(|t| t.elapsed() >= self.settings.reconnect_interval)
                    .unwrap_or(true);
                if due {
                    self.attempt_reconnect().await;
                }
            } else if let Err(e) = self.drive_broker().await {
                debug!(error = %e, "broker poll failed");
            }

            match self.records.recv_timeout(self.settings.recv_timeout).await {
                Ok(Some(record)) => self.process_record(record).await,
                Ok(None) => {}
                Err(BridgeError::ChannelClosed) => {
                    info!("record queue closed, publish pipeline stopping");
                    return;
                }
                Err(e) => warn!(error = %e, "record dequeue failed"),
            }
        }
    }

    /// One reconnect attempt: session, subscription, online announcement
    async fn attempt_reconnect(&mut self) {
        self.last_reconnect = Some(Instant::now());
        GatewayStats::incr(&self.stats.broker_reconnects);

        match self.broker.connect().await {
            Ok(()) => {
                info!("broker connected");
                if let Err(e) = self.broker.subscribe(&self.settings.command_topic).await {
                    warn!(topic = %self.settings.command_topic, error = %e, "command subscription failed");
                }
                let announcement = json!({
                    "status": "online",
                    "gateway_id": format!("{:08x}", (self.settings.gateway_id.0 >> 32) as u32),
                    "ip": self.settings.network_address,
                });
                let message = BrokerMessage::retained(
                    self.settings.gateway_status_topic.clone(),
                    serde_json::to_vec(&announcement).expect("announcement serializes"),
                );
                if let Err(e) = self.broker.publish(&message).await {
                    warn!(error = %e, "gateway status publish failed");
                }
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "broker reconnect failed, retrying later");
            }
        }
    }

    /// Drive keep-alive and dispatch inbound activity
    async fn drive_broker(&mut self) -> Result<(), BridgeError> {
        match self.broker.poll().await? {
            Some(BrokerEvent::Message { topic, payload }) => {
                if topic == self.settings.command_topic {
                    self.handle_command(&payload).await;
                } else {
                    debug!(topic = %topic, "message on unexpected topic ignored");
                }
            }
            Some(BrokerEvent::Disconnected) => {
                warn!("broker disconnected, will retry");
            }
            None => {}
        }
        Ok(())
    }

    /// Validate, enqueue and acknowledge one inbound command
    async fn handle_command(&mut self, payload: &[u8]) {
        let request = match CommandRequest::from_json(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable command dropped");
                return;
            }
        };

        let spec = match request.validate() {
            Ok(spec) => spec,
            Err(e) => {
                warn!(
                    device = %request.device_id,
                    action = request.action.as_str(),
                    error = %e,
                    "command rejected"
                );
                self.publish_ack(CommandAck::with_status(&request, "rejected")).await;
                return;
            }
        };

        info!(device = %spec.target, action = spec.action, "command accepted");
        let ack = match self.dispatcher.submit(&spec).await {
            Ok(_) => {
                if let Some(sidecar) = &self.sidecar {
                    sidecar.write_command(
                        spec.target,
                        spec.cmd_type,
                        &String::from_utf8_lossy(&spec.params),
                        "queued",
                    );
                }
                CommandAck::queued(&request)
            }
            Err(BridgeError::CommandQueueFull { .. }) => {
                CommandAck::with_status(&request, "queue_full")
            }
            Err(e) => {
                warn!(error = %e, "command enqueue failed");
                CommandAck::with_status(&request, "rejected")
            }
        };
        self.publish_ack(ack).await;
    }

    async fn publish_ack(&mut self, ack: CommandAck) {
        let message = BrokerMessage::new(
            self.settings.command_ack_topic.clone(),
            serde_json::to_vec(&ack).expect("ack serializes"),
        );
        if let Err(e) = self.broker.publish(&message).await {
            debug!(error = %e, "command ack publish failed");
        }
    }

    /// Retry trigger, translation and publication for one record
    async fn process_record(&mut self, record: DecodedRecord) {
        let device = record.header.device_id;

        // The sensor opens its RX window shortly after transmitting; wait
        // for it, then drain its queued commands. Skipped entirely when
        // nothing is pending so the queue never stalls record flow.
        if self.dispatcher.queue().has_pending_for(device) {
            tokio::time::sleep(self.settings.rx_window_delay).await;
            self.dispatcher.retry_for(device).await;
        }

        let Some(message) = self.translator.translate(&record) else {
            return;
        };

        self.mirror_to_sidecar(&record, &message);

        if !self.broker.is_connected() {
            debug!(device = %device, topic = %message.topic, "broker down, publish skipped");
            GatewayStats::incr(&self.stats.publish_failures);
            return;
        }
        match self.broker.publish(&message).await {
            Ok(()) => {
                debug!(device = %device, topic = %message.topic, "published");
                GatewayStats::incr(&self.stats.published);
            }
            Err(e) => {
                warn!(device = %device, topic = %message.topic, error = %e, "publish failed");
                GatewayStats::incr(&self.stats.publish_failures);
            }
        }
    }

    /// Best-effort sidecar mirroring of the translated record
    ///
    /// Only device and event writes are mirrored; readings go through the
    /// broker to the time-series store, not to the sidecar.
    fn mirror_to_sidecar(&self, record: &DecodedRecord, message: &BrokerMessage) {
        let Some(sidecar) = &self.sidecar else {
            return;
        };
        let device = record.header.device_id;

        match &record.payload {
            Payload::Event(event) => {
                sidecar.write_event(
                    device,
                    event.event_type,
                    event.severity.as_str(),
                    &event.message_str(),
                );
            }
            Payload::Status(_) => {
                let doc: serde_json::Value =
                    serde_json::from_slice(&message.payload).unwrap_or_else(|_| json!({}));
                sidecar.write_device(
                    device,
                    doc["device_name"].as_str().unwrap_or_default(),
                    doc["location"].as_str().unwrap_or_default(),
                    json!({
                        "last_rssi": record.rssi,
                        "last_snr": record.snr,
                    }),
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerClient;
    use crate::command_queue::CommandQueue;
    use crate::queue::record_queue;
    use crate::radio::{MockRadio, Radio, RadioArbiter};
    use crate::registry::DeviceRegistry;
    use crate::watchdog::Watchdog;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use sensorhub_protocol::{FrameHeader, MessageType, PressureTrend, ReadingsPayload};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const DEV: DeviceId = DeviceId(0xAABBCCDDEEFF0011);

    /// Scripted broker for pipeline tests
    struct ScriptedBroker {
        connected: bool,
        fail_connects: usize,
        published: Arc<Mutex<Vec<BrokerMessage>>>,
        subscriptions: Arc<Mutex<Vec<String>>>,
        inbound: Arc<Mutex<VecDeque<BrokerEvent>>>,
    }

    impl ScriptedBroker {
        fn new() -> Self {
            Self {
                connected: false,
                fail_connects: 0,
                published: Arc::new(Mutex::new(Vec::new())),
                subscriptions: Arc::new(Mutex::new(Vec::new())),
                inbound: Arc::new(Mutex::new(VecDeque::new())),
            }
        }
    }

    #[async_trait]
    impl BrokerClient for ScriptedBroker {
        async fn connect(&mut self) -> crate::error::Result<()> {
            if self.fail_connects > 0 {
                self.fail_connects -= 1;
                return Err(BridgeError::Broker("scripted connect failure".into()));
            }
            self.connected = true;
            Ok(())
        }

        async fn subscribe(&mut self, topic: &str) -> crate::error::Result<()> {
            self.subscriptions.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        async fn publish(&mut self, message: &BrokerMessage) -> crate::error::Result<()> {
            if !self.connected {
                return Err(BridgeError::BrokerDisconnected);
            }
            self.published.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn poll(&mut self) -> crate::error::Result<Option<BrokerEvent>> {
            Ok(self.inbound.lock().unwrap().pop_front())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Harness {
        pipeline: PublishPipeline,
        published: Arc<Mutex<Vec<BrokerMessage>>>,
        subscriptions: Arc<Mutex<Vec<String>>>,
        inbound: Arc<Mutex<VecDeque<BrokerEvent>>>,
        dispatcher: Arc<CommandDispatcher>,
        radio: crate::radio::MockRadioHandle,
    }

    async fn harness(broker: ScriptedBroker) -> (Harness, crate::queue::RecordSender) {
        let published = broker.published.clone();
        let subscriptions = broker.subscriptions.clone();
        let inbound = broker.inbound.clone();

        let (driver, radio_handle) = MockRadio::new();
        let mut radio = Radio::new(Box::new(driver));
        radio.init().await.unwrap();
        let arbiter = Arc::new(RadioArbiter::new(radio, Duration::from_millis(100)));
        let registry = Arc::new(DeviceRegistry::new(10, 50).0);
        let stats = Arc::new(GatewayStats::default());
        let queue = Arc::new(CommandQueue::new(10, Duration::from_secs(300)));
        let dispatcher = Arc::new(CommandDispatcher::new(
            queue,
            arbiter,
            stats.clone(),
            Duration::from_millis(1),
        ));
        let (record_tx, record_rx) = record_queue(8);
        let watchdog = Watchdog::new(Duration::from_secs(30));

        let pipeline = PublishPipeline::new(
            Box::new(broker),
            record_rx,
            Translator::new(registry, "esp-sensor-hub/"),
            dispatcher.clone(),
            stats,
            watchdog.register("publish"),
            None,
            PublishSettings {
                gateway_id: DeviceId(0xFEEDF00D_00000000),
                network_address: "192.0.2.10".to_string(),
                command_topic: "lora/command".to_string(),
                command_ack_topic: "lora/command/ack".to_string(),
                gateway_status_topic: "lora/gateway/status".to_string(),
                reconnect_interval: Duration::from_millis(50),
                recv_timeout: Duration::from_millis(10),
                rx_window_delay: Duration::from_millis(5),
            },
        );

        (
            Harness {
                pipeline,
                published,
                subscriptions,
                inbound,
                dispatcher,
                radio: radio_handle,
            },
            record_tx,
        )
    }

    fn readings_record(seq: u16) -> DecodedRecord {
        DecodedRecord {
            header: FrameHeader::new(MessageType::Readings, DEV, seq, 20),
            payload: Payload::Readings(ReadingsPayload {
                temperature: 2531,
                humidity: 5520,
                pressure: 101325,
                altitude: 120,
                battery_mv: 3700,
                battery_percent: 85,
                pressure_trend: PressureTrend::Falling,
                pressure_change: -50,
                timestamp: 1234567890,
            }),
            rssi: -85,
            snr: 9,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reconnect_subscribes_and_announces_online() {
        let (mut h, _tx) = harness(ScriptedBroker::new()).await;
        h.pipeline.attempt_reconnect().await;

        assert_eq!(h.subscriptions.lock().unwrap().as_slice(), ["lora/command"]);
        let published = h.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "lora/gateway/status");
        assert!(published[0].retain);
        let doc: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(doc["status"], "online");
        assert_eq!(doc["gateway_id"], "feedf00d");
        assert_eq!(doc["ip"], "192.0.2.10");
    }

    #[tokio::test]
    async fn failed_reconnect_is_paced() {
        let mut broker = ScriptedBroker::new();
        broker.fail_connects = 1;
        let (mut h, _tx) = harness(broker).await;

        h.pipeline.attempt_reconnect().await;
        assert!(!h.pipeline.broker.is_connected());
        assert!(h.pipeline.last_reconnect.is_some());
    }

    #[tokio::test]
    async fn record_translates_and_publishes() {
        let (mut h, _tx) = harness(ScriptedBroker::new()).await;
        h.pipeline.attempt_reconnect().await;
        h.published.lock().unwrap().clear();

        h.pipeline.process_record(readings_record(123)).await;

        let published = h.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "esp-sensor-hub/AABBCCDDEEFF0011/readings");
        let doc: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(doc["temperature"], 25.31);
        assert_eq!(doc["sequence"], 123);
    }

    #[tokio::test]
    async fn record_with_broker_down_counts_failure() {
        let (mut h, _tx) = harness(ScriptedBroker::new()).await;
        h.pipeline.process_record(readings_record(1)).await;
        assert!(h.published.lock().unwrap().is_empty());
        assert_eq!(h.pipeline.stats.snapshot().publish_failures, 1);
    }

    #[tokio::test]
    async fn inbound_command_is_queued_and_acked() {
        let (mut h, _tx) = harness(ScriptedBroker::new()).await;
        h.pipeline.attempt_reconnect().await;
        h.published.lock().unwrap().clear();

        let payload =
            br#"{"device_id":"AABBCCDDEEFF0011","action":"set_interval","value":90}"#.to_vec();
        h.inbound.lock().unwrap().push_back(BrokerEvent::Message {
            topic: "lora/command".to_string(),
            payload: Bytes::from(payload),
        });

        h.pipeline.drive_broker().await.unwrap();

        assert!(h.dispatcher.queue().has_pending_for(DEV));
        let published = h.published.lock().unwrap();
        let ack = published
            .iter()
            .find(|m| m.topic == "lora/command/ack")
            .expect("ack published");
        let doc: serde_json::Value = serde_json::from_slice(&ack.payload).unwrap();
        assert_eq!(doc["status"], "queued");
        assert_eq!(doc["action"], "set_interval");
    }

    #[tokio::test]
    async fn out_of_range_command_is_rejected() {
        let (mut h, _tx) = harness(ScriptedBroker::new()).await;
        h.pipeline.attempt_reconnect().await;
        h.published.lock().unwrap().clear();

        let payload =
            br#"{"device_id":"AABBCCDDEEFF0011","action":"set_interval","value":4}"#.to_vec();
        h.inbound.lock().unwrap().push_back(BrokerEvent::Message {
            topic: "lora/command".to_string(),
            payload: Bytes::from(payload),
        });
        h.pipeline.drive_broker().await.unwrap();

        assert!(!h.dispatcher.queue().has_pending_for(DEV));
        let published = h.published.lock().unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(doc["status"], "rejected");
    }

    #[tokio::test]
    async fn record_triggers_pending_command_retry() {
        let (mut h, _tx) = harness(ScriptedBroker::new()).await;
        h.pipeline.attempt_reconnect().await;

        // a command waits for DEV's RX window
        let spec = crate::command::CommandSpec {
            target: DEV,
            action: "restart",
            cmd_type: 0x04,
            params: Bytes::new(),
        };
        h.dispatcher.queue().enqueue(&spec).unwrap();
        assert!(h.radio.transmitted().is_empty());

        h.pipeline.process_record(readings_record(5)).await;

        // the retry fired after the RX-window delay and delivered
        assert_eq!(h.radio.transmitted().len(), 1);
        assert!(!h.dispatcher.queue().has_pending_for(DEV));
    }

    #[tokio::test]
    async fn run_stops_when_producer_drops() {
        let (h, tx) = harness(ScriptedBroker::new()).await;
        let task = tokio::spawn(h.pipeline.run());
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("pipeline did not stop")
            .unwrap();
    }
}
