//! Decoded-record queue between the receive and publish contexts
//!
//! A bounded multi-producer/single-consumer channel carrying fully decoded
//! frames in reception order. Overflow policy is drop-newest: the receive
//! pipeline offers a record with a short deadline and counts it as dropped
//! when the publish side cannot absorb it in time, so a stalled broker can
//! never wedge the radio path.

use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use sensorhub_protocol::{FrameHeader, Payload};
use std::time::Duration;
use tokio::sync::mpsc;

/// A validated frame with its link metadata, headed for translation
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    /// Decoded frame header
    pub header: FrameHeader,
    /// Decoded, type-checked payload
    pub payload: Payload,
    /// RSSI of the reception in dBm
    pub rssi: i16,
    /// SNR of the reception in dB
    pub snr: i8,
    /// Local wall-clock time of the reception
    pub received_at: DateTime<Utc>,
}

/// Sending half of the record queue (receive context)
#[derive(Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<DecodedRecord>,
}

/// Receiving half of the record queue (publish context)
pub struct RecordReceiver {
    rx: mpsc::Receiver<DecodedRecord>,
}

/// Create the bounded record queue
pub fn record_queue(depth: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (RecordSender { tx }, RecordReceiver { rx })
}

impl RecordSender {
    /// Offer a record, giving the consumer `timeout` to make room
    ///
    /// [`BridgeError::RecordQueueFull`] means the record was dropped;
    /// [`BridgeError::ChannelClosed`] means the publish context is gone.
    pub async fn send_timeout(&self, record: DecodedRecord, timeout: Duration) -> Result<()> {
        match self.tx.send_timeout(record, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(BridgeError::RecordQueueFull),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(BridgeError::ChannelClosed),
        }
    }
}

impl RecordReceiver {
    /// Wait up to `timeout` for the next record
    ///
    /// `Ok(None)` on timeout; [`BridgeError::ChannelClosed`] once the
    /// receive context is gone and the queue has drained.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<DecodedRecord>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => Err(BridgeError::ChannelClosed),
            Err(_) => Ok(None),
        }
    }
}
