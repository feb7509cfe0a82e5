//! Sensorhub gateway node
//!
//! This binary runs a full LoRa-to-MQTT gateway:
//! - receive pipeline polling the radio and deduplicating sensor frames
//! - publish pipeline translating frames to per-device MQTT topics
//! - command path queueing broker commands for opportunistic delivery
//! - admin HTTP surface for the device list, health and manual commands

mod server;

use clap::Parser;
use sensorhub_bridge::{
    BridgeConfig, BridgeConfigBuilder, FileRegistryStore, GatewayHandle, MockRadio, MqttBroker,
};
use sensorhub_protocol::DeviceId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sensorhub-node")]
#[command(about = "LoRa sensor gateway bridging a radio network to MQTT")]
struct Args {
    /// Gateway identity as a 16-hex-digit token (derived from the host when omitted)
    #[arg(long)]
    gateway_id: Option<String>,

    /// MQTT broker hostname
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    /// MQTT username
    #[arg(long)]
    broker_user: Option<String>,

    /// MQTT password
    #[arg(long)]
    broker_password: Option<String>,

    /// Topic prefix for per-device topics
    #[arg(long, default_value = "esp-sensor-hub/")]
    topic_prefix: String,

    /// Registry persistence file
    #[arg(long, default_value = "sensor_registry.json")]
    registry_file: PathBuf,

    /// Maximum number of tracked sensors
    #[arg(long, default_value_t = 10)]
    registry_capacity: usize,

    /// Base URL of the optional persistence sidecar
    #[arg(long)]
    sidecar_url: Option<String>,

    /// Admin HTTP port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Address advertised in the gateway status announcement
    #[arg(long, default_value = "0.0.0.0")]
    advertise_address: String,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

/// Application state shared across admin handlers
pub struct AppState {
    /// Running gateway
    pub gateway: GatewayHandle,
    /// Gateway identity
    pub gateway_id: DeviceId,
    /// Process start time
    pub start_time: Instant,
    /// Whether a sidecar is configured
    pub sidecar_configured: bool,
}

/// Derive a stable gateway identity from the host name when none is given
fn derive_gateway_id() -> DeviceId {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "sensorhub".to_string());
    let mut acc: u64 = 0xcbf29ce484222325;
    for b in hostname.bytes() {
        acc ^= b as u64;
        acc = acc.wrapping_mul(0x100000001b3);
    }
    DeviceId(acc)
}

fn build_config(args: &Args) -> anyhow::Result<BridgeConfig> {
    let gateway_id = match &args.gateway_id {
        Some(hex) => hex
            .parse::<DeviceId>()
            .map_err(|e| anyhow::anyhow!("bad --gateway-id {hex:?}: {e}"))?,
        None => derive_gateway_id(),
    };

    let mut builder = BridgeConfigBuilder::new(gateway_id)
        .broker(args.broker_host.clone(), args.broker_port)
        .topic_prefix(args.topic_prefix.clone())
        .registry_capacity(args.registry_capacity)
        .registry_file(args.registry_file.clone());
    if let (Some(user), Some(pass)) = (&args.broker_user, &args.broker_password) {
        builder = builder.credentials(user.clone(), pass.clone());
    }
    if let Some(url) = &args.sidecar_url {
        builder = builder.sidecar(url.clone());
    }
    Ok(builder.build())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = build_config(&args)?;
    info!("Starting sensorhub gateway: {}", config.gateway_id);
    info!(
        "Broker: {}:{} (prefix {})",
        config.broker.host, config.broker.port, config.topic_prefix
    );
    info!(
        "Radio: {:.1} MHz, SF{}, {:.1} kHz, CR 4/{}, sync 0x{:02X}",
        config.radio.frequency_mhz,
        config.radio.spreading_factor,
        config.radio.bandwidth_khz,
        config.radio.coding_rate,
        config.radio.sync_word
    );

    // The hardware radio driver is supplied by the deployment build; the
    // stock binary wires the loopback driver for bench work.
    let (radio_driver, _radio_handle) = MockRadio::new();
    warn!("loopback radio driver active; point a hardware driver here for deployment");

    let broker = MqttBroker::new(config.broker.clone(), config.gateway_id);
    let store = Arc::new(FileRegistryStore::new(config.registry_file.clone()));

    let gateway_id = config.gateway_id;
    let sidecar_configured = config.sidecar.is_some();
    let (gateway, _tasks) = sensorhub_bridge::spawn(
        config,
        Box::new(radio_driver),
        Box::new(broker),
        store,
        args.advertise_address.clone(),
    )
    .await?;

    let state = Arc::new(AppState {
        gateway,
        gateway_id,
        start_time: Instant::now(),
        sidecar_configured,
    });

    // Admin HTTP surface
    let bind_addr = format!("0.0.0.0:{}", args.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let actual = listener.local_addr()?;
    info!("Admin surface listening on http://127.0.0.1:{}", actual.port());

    let app = server::create_router(state);
    axum::serve(listener, app).await?;

    Ok(())
}
