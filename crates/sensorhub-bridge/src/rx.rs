//! Receive pipeline
//!
//! The radio-facing half of the bridge, running on its own task at the
//! front of the data path. One iteration: poll the radio for a pending
//! frame, decode and validate it, suppress duplicates, update the device
//! registry, hand the record to the publish context, acknowledge the
//! sensor, and put the radio back into continuous receive.
//!
//! Nothing here blocks for long: the arbiter is held only across the
//! FIFO read or the ACK transmit, the record queue is offered with a
//! short deadline, and decode failures are counted and forgotten.

use crate::error::BridgeError;
use crate::queue::{DecodedRecord, RecordSender};
use crate::radio::RadioArbiter;
use crate::registry::DeviceRegistry;
use crate::stats::GatewayStats;
use crate::watchdog::WatchdogHandle;
use chrono::Utc;
use sensorhub_protocol::{
    decode_frame, encode_frame, AckPayload, DeviceId, FrameHeader, MessageType, Payload,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Interval between aggregate stats log lines
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Settings for the receive pipeline
#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    /// This gateway's identity, stamped on outgoing ACK frames
    pub gateway_id: DeviceId,
    /// Idle sleep when no frame is pending
    pub idle_sleep: Duration,
    /// Deadline for offering a record to the publish context
    pub enqueue_timeout: Duration,
}

/// The radio-facing pipeline
pub struct ReceivePipeline {
    arbiter: Arc<RadioArbiter>,
    registry: Arc<DeviceRegistry>,
    records: RecordSender,
    stats: Arc<GatewayStats>,
    watchdog: WatchdogHandle,
    settings: ReceiveSettings,
}

impl ReceivePipeline {
    /// Wire the pipeline to its collaborators
    pub fn new(
        arbiter: Arc<RadioArbiter>,
        registry: Arc<DeviceRegistry>,
        records: RecordSender,
        stats: Arc<GatewayStats>,
        watchdog: WatchdogHandle,
        settings: ReceiveSettings,
    ) -> Self {
        Self {
            arbiter,
            registry,
            records,
            stats,
            watchdog,
            settings,
        }
    }

    /// Run the pipeline until the record queue's consumer goes away
    pub async fn run(self) {
        info!("receive pipeline started");
        let mut last_stats = Instant::now();

        loop {
            self.watchdog.feed();

            if last_stats.elapsed() >= STATS_INTERVAL {
                last_stats = Instant::now();
                let snap = self.stats.snapshot();
                info!(
                    received_ok = snap.received_ok,
                    dropped = snap.dropped,
                    duplicates = snap.duplicates_filtered,
                    "receive stats"
                );
            }

            match self.poll_once().await {
                Ok(true) => {} // processed a frame, poll again immediately
                Ok(false) => tokio::time::sleep(self.settings.idle_sleep).await,
                Err(BridgeError::ChannelClosed) => {
                    info!("record queue closed, receive pipeline stopping");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, code = e.error_code(), "receive iteration failed");
                    tokio::time::sleep(self.settings.idle_sleep).await;
                }
            }
        }
    }

    /// One poll: returns whether a frame was pending
    async fn poll_once(&self) -> Result<bool, BridgeError> {
        let frame = {
            let mut radio = self.arbiter.acquire().await?;
            if !radio.data_ready().await? {
                return Ok(false);
            }
            let frame = radio.read_frame().await?;
            radio.start_receive().await?;
            frame
        };

        let Some(frame) = frame else {
            trace!("spurious radio interrupt");
            return Ok(false);
        };

        self.handle_frame(&frame.bytes, frame.rssi, frame.snr)
            .await?;
        Ok(true)
    }

    /// Validate, dedup, record and forward one received frame
    async fn handle_frame(&self, bytes: &[u8], rssi: i16, snr: i8) -> Result<(), BridgeError> {
        let (header, payload_bytes) = match decode_frame(bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(code = e.error_code(), len = bytes.len(), "dropping undecodable frame");
                GatewayStats::incr(&self.stats.dropped);
                return Ok(());
            }
        };

        let payload = match Payload::decode(&header, payload_bytes) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(
                    device = %header.device_id,
                    code = e.error_code(),
                    "dropping frame with malformed payload"
                );
                GatewayStats::incr(&self.stats.dropped);
                return Ok(());
            }
        };

        if self.registry.is_duplicate(header.device_id, header.sequence) {
            debug!(device = %header.device_id, seq = header.sequence, "duplicate frame suppressed");
            GatewayStats::incr(&self.stats.duplicates_filtered);
            // no ACK for duplicates
            return Ok(());
        }

        if let Err(e) = self
            .registry
            .observe(header.device_id, header.sequence, rssi, snr)
        {
            // registry full: the frame still flows downstream, it just
            // isn't tracked
            warn!(device = %header.device_id, error = %e, "device not tracked");
        }

        trace!(
            device = %header.device_id,
            seq = header.sequence,
            msg_type = ?header.msg_type,
            rssi,
            snr,
            "frame accepted"
        );
        GatewayStats::incr(&self.stats.received_ok);

        let record = DecodedRecord {
            header,
            payload,
            rssi,
            snr,
            received_at: Utc::now(),
        };
        match self
            .records
            .send_timeout(record, self.settings.enqueue_timeout)
            .await
        {
            Ok(()) => {}
            Err(BridgeError::RecordQueueFull) => {
                warn!(device = %header.device_id, "record queue full, frame dropped");
                GatewayStats::incr(&self.stats.dropped);
            }
            Err(e) => return Err(e),
        }

        if header.msg_type.wants_ack() {
            self.send_ack(&header, rssi, snr).await;
        }
        Ok(())
    }

    /// Acknowledge a reception; failure is logged, never fatal
    async fn send_ack(&self, header: &FrameHeader, rssi: i16, snr: i8) {
        let ack = AckPayload {
            ack_sequence: header.sequence,
            success: true,
            error_code: 0,
            rssi,
            snr,
        };
        let frame = match encode_frame(
            MessageType::Ack,
            self.settings.gateway_id,
            0,
            &ack.encode(),
        ) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ACK frame build failed");
                return;
            }
        };
        if let Err(e) = self.arbiter.transmit_frame(&frame).await {
            debug!(device = %header.device_id, seq = header.sequence, error = %e, "ACK transmit failed");
            GatewayStats::incr(&self.stats.ack_failures);
        } else {
            trace!(device = %header.device_id, seq = header.sequence, "ACK sent");
        }
    }
}
