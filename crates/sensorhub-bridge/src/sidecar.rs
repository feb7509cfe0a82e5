//! Optional persistence sidecar
//!
//! A stateless HTTP service can mirror device, command and event writes
//! into long-term storage; readings themselves flow through the broker to
//! the time-series store and are never mirrored here. The bridge treats
//! the sidecar as strictly best-effort: writes are queued locally
//! (bounded, drop-oldest) and posted by a background worker, so a slow or
//! absent sidecar never touches the pipelines. Device ids are transmitted
//! as decimal strings because 64-bit integers get truncated by some JSON
//! consumers.

use crate::config::SidecarConfig;
use crate::error::{BridgeError, Result};
use sensorhub_protocol::DeviceId;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One mirrored write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarWrite {
    /// Target endpoint path (`/devices`, `/commands`, `/events`)
    pub endpoint: &'static str,
    /// JSON body
    pub body: Value,
}

/// Non-blocking submission handle used by the pipelines
#[derive(Clone)]
pub struct SidecarHandle {
    tx: mpsc::UnboundedSender<SidecarWrite>,
}

impl SidecarHandle {
    fn submit(&self, write: SidecarWrite) {
        // worker gone means the sidecar was disabled; drop silently
        let _ = self.tx.send(write);
    }

    /// Mirror a device registry update
    pub fn write_device(&self, device: DeviceId, name: &str, location: &str, body_extra: Value) {
        let mut body = json!({
            "device_id": device.decimal(),
            "name": name,
            "location": location,
        });
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), body_extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        self.submit(SidecarWrite {
            endpoint: "/devices",
            body,
        });
    }

    /// Mirror a queued command
    pub fn write_command(&self, device: DeviceId, command_type: u8, params: &str, status: &str) {
        self.submit(SidecarWrite {
            endpoint: "/commands",
            body: json!({
                "device_id": device.decimal(),
                "command_type": command_type,
                "params": params,
                "status": status,
            }),
        });
    }

    /// Mirror a device event
    pub fn write_event(&self, device: DeviceId, event_type: u8, severity: &str, message: &str) {
        self.submit(SidecarWrite {
            endpoint: "/events",
            body: json!({
                "device_id": device.decimal(),
                "event_type": event_type,
                "severity": severity,
                "message": message,
            }),
        });
    }
}

/// Background worker draining the write queue
pub struct SidecarClient {
    config: SidecarConfig,
    http: reqwest::Client,
    rx: mpsc::UnboundedReceiver<SidecarWrite>,
    pending: VecDeque<SidecarWrite>,
    healthy: bool,
    last_probe: Option<Instant>,
    dropped: u64,
}

impl SidecarClient {
    /// Create the worker and its submission handle
    pub fn new(config: SidecarConfig) -> (Self, SidecarHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client builds");
        (
            Self {
                config,
                http,
                rx,
                pending: VecDeque::new(),
                healthy: false,
                last_probe: None,
                dropped: 0,
            },
            SidecarHandle { tx },
        )
    }

    fn absorb(&mut self, write: SidecarWrite) {
        self.pending.push_back(write);
        while self.pending.len() > self.config.queue_capacity {
            self.pending.pop_front();
            self.dropped += 1;
            if self.dropped % 100 == 1 {
                warn!(dropped = self.dropped, "sidecar queue overflow, dropping oldest writes");
            }
        }
    }

    async fn probe_health(&mut self) {
        self.last_probe = Some(Instant::now());
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        let was_healthy = self.healthy;
        self.healthy = match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "sidecar health probe failed");
                false
            }
        };
        if self.healthy && !was_healthy {
            info!(url = %self.config.base_url, pending = self.pending.len(), "sidecar reachable");
        }
    }

    async fn post(&self, write: &SidecarWrite) -> Result<()> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            write.endpoint
        );
        let resp = self
            .http
            .post(&url)
            .json(&write.body)
            .send()
            .await
            .map_err(|e| BridgeError::Sidecar(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::Sidecar(format!(
                "{} returned {}",
                write.endpoint,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn flush(&mut self) {
        while let Some(write) = self.pending.front() {
            match self.post(write).await {
                Ok(()) => {
                    self.pending.pop_front();
                }
                Err(e) => {
                    debug!(error = %e, pending = self.pending.len(), "sidecar write failed, backing off");
                    self.healthy = false;
                    break;
                }
            }
        }
    }

    fn probe_due(&self) -> bool {
        let interval = if self.healthy {
            self.config.health_interval
        } else {
            self.config.reconnect_interval
        };
        self.last_probe.map(|t| t.elapsed() >= interval).unwrap_or(true)
    }

    /// Run until every submission handle is dropped
    pub async fn run(mut self) {
        info!(url = %self.config.base_url, "sidecar worker started");
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                write = self.rx.recv() => {
                    match write {
                        Some(write) => self.absorb(write),
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    if self.probe_due() {
                        self.probe_health().await;
                    }
                }
            }
            if self.healthy && !self.pending.is_empty() {
                self.flush().await;
            }
        }
        info!("sidecar worker stopped");
    }
}
