//! Gateway assembly
//!
//! Wires the components together and spawns the execution contexts:
//! the receive pipeline, the publish pipeline, the watchdog monitor, the
//! registry persistence drain and (when configured) the sidecar worker.
//! The returned [`GatewayHandle`] is what the admin surface talks to.

use crate::broker::BrokerClient;
use crate::command::{CommandAck, CommandRequest};
use crate::command_queue::{CommandDispatcher, CommandQueue, CommandSnapshot};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::persist::{persistence_task, RegistryStore};
use crate::publish::{PublishPipeline, PublishSettings};
use crate::queue::record_queue;
use crate::radio::{Radio, RadioArbiter, RadioInterface};
use crate::registry::{DeviceRegistry, DeviceSnapshot};
use crate::rx::{ReceivePipeline, ReceiveSettings};
use crate::sidecar::SidecarClient;
use crate::stats::{GatewayStats, StatsSnapshot};
use crate::translator::Translator;
use crate::watchdog::Watchdog;
use sensorhub_protocol::DeviceId;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A running gateway's task handles
pub struct GatewayTasks {
    /// Receive pipeline task
    pub rx: JoinHandle<()>,
    /// Publish pipeline task
    pub publish: JoinHandle<()>,
    /// Watchdog monitor task
    pub watchdog: JoinHandle<()>,
    /// Registry persistence drain task
    pub persistence: JoinHandle<()>,
    /// Sidecar worker task, when configured
    pub sidecar: Option<JoinHandle<()>>,
}

/// Shared view of a running gateway for the admin surface
#[derive(Clone)]
pub struct GatewayHandle {
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    stats: Arc<GatewayStats>,
}

impl GatewayHandle {
    /// Registry snapshot for the device listing
    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        self.registry.snapshot()
    }

    /// Aggregate counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Pending commands for one device
    pub fn pending_commands(&self, device: DeviceId) -> Vec<CommandSnapshot> {
        self.dispatcher.queue().snapshot_for(device)
    }

    /// Validate and enqueue a command from the admin surface
    ///
    /// Same validation path as broker ingress; returns the ack object the
    /// caller should render.
    pub async fn submit_command(&self, request: &CommandRequest) -> Result<CommandAck> {
        let spec = request.validate()?;
        self.dispatcher.submit(&spec).await?;
        Ok(CommandAck::queued(request))
    }
}

/// Build and launch the gateway
///
/// The radio driver, broker client and registry store are injected so the
/// binary picks the real implementations and tests pick scripted ones.
pub async fn spawn(
    config: BridgeConfig,
    radio_driver: Box<dyn RadioInterface>,
    broker: Box<dyn BrokerClient>,
    store: Arc<dyn RegistryStore>,
    network_address: String,
) -> Result<(GatewayHandle, GatewayTasks)> {
    info!(gateway = %config.gateway_id, "assembling gateway");

    // registry, reloaded from persisted state
    let (registry, dirty_rx) = DeviceRegistry::new(config.registry_capacity, config.dedup_ring_size);
    let registry = Arc::new(registry);
    match store.load().await {
        Ok(Some(doc)) => {
            let restored = doc.restore_into(&registry);
            info!(devices = restored, "registry restored from persistence");
        }
        Ok(None) => info!("no persisted registry, starting fresh"),
        Err(e) => error!(error = %e, "persisted registry unreadable, starting fresh"),
    }

    // radio behind the arbiter
    let mut radio = Radio::new(radio_driver);
    radio.init().await?;
    let arbiter = Arc::new(RadioArbiter::new(radio, config.arbiter_timeout));

    let stats = Arc::new(GatewayStats::default());
    let watchdog = Arc::new(Watchdog::new(config.watchdog_timeout));

    // command machinery
    let command_queue = Arc::new(CommandQueue::new(
        config.command_queue_capacity,
        config.command_expiration,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        command_queue,
        arbiter.clone(),
        stats.clone(),
        config.retry_quiet_period,
    ));

    // sidecar worker (optional)
    let (sidecar_handle, sidecar_task) = match &config.sidecar {
        Some(sidecar_config) => {
            let (client, handle) = SidecarClient::new(sidecar_config.clone());
            (Some(handle), Some(tokio::spawn(client.run())))
        }
        None => (None, None),
    };

    // the two execution contexts
    let (record_tx, record_rx) = record_queue(config.record_queue_depth);

    let rx_pipeline = ReceivePipeline::new(
        arbiter,
        registry.clone(),
        record_tx,
        stats.clone(),
        watchdog.register("rx"),
        ReceiveSettings {
            gateway_id: config.gateway_id,
            idle_sleep: config.rx_idle_sleep,
            enqueue_timeout: config.record_enqueue_timeout,
        },
    );

    let publish_pipeline = PublishPipeline::new(
        broker,
        record_rx,
        Translator::new(registry.clone(), config.topic_prefix.clone()),
        dispatcher.clone(),
        stats.clone(),
        watchdog.register("publish"),
        sidecar_handle,
        PublishSettings {
            gateway_id: config.gateway_id,
            network_address,
            command_topic: config.command_topic.clone(),
            command_ack_topic: config.command_ack_topic.clone(),
            gateway_status_topic: config.gateway_status_topic.clone(),
            reconnect_interval: config.broker.reconnect_interval,
            recv_timeout: std::time::Duration::from_millis(100),
            rx_window_delay: config.rx_window_delay,
        },
    );

    let persistence = tokio::spawn(persistence_task(registry.clone(), store, dirty_rx));
    let rx_task = tokio::spawn(rx_pipeline.run());
    let publish_task = tokio::spawn(publish_pipeline.run());

    // lost liveness is fatal; the supervisor restarts the process
    let watchdog_task = tokio::spawn(async move {
        let starved = watchdog.run().await;
        error!(context = %starved, "execution context wedged, aborting for supervisor restart");
        std::process::abort();
    });

    info!("gateway running");
    Ok((
        GatewayHandle {
            registry,
            dispatcher,
            stats,
        },
        GatewayTasks {
            rx: rx_task,
            publish: publish_task,
            watchdog: watchdog_task,
            persistence,
            sidecar: sidecar_task,
        },
    ))
}
