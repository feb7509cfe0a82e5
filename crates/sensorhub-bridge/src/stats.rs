//! Shared gateway counters
//!
//! Plain atomics, written from both execution contexts and read by the
//! admin surface and the periodic stats log line.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregate counters for the bridge pipelines
#[derive(Debug, Default)]
pub struct GatewayStats {
    /// Frames received and fully validated
    pub received_ok: AtomicU64,
    /// Frames dropped (codec failure or record-queue overflow)
    pub dropped: AtomicU64,
    /// Frames suppressed by deduplication
    pub duplicates_filtered: AtomicU64,
    /// Messages published to the broker
    pub published: AtomicU64,
    /// Publish attempts that failed
    pub publish_failures: AtomicU64,
    /// Broker reconnect attempts
    pub broker_reconnects: AtomicU64,
    /// Commands accepted into the queue
    pub commands_queued: AtomicU64,
    /// Commands transmitted to a sensor
    pub commands_sent: AtomicU64,
    /// Commands dropped by expiration
    pub commands_expired: AtomicU64,
    /// ACK transmissions that failed
    pub ack_failures: AtomicU64,
}

/// Point-in-time copy of [`GatewayStats`] for snapshots and the admin API
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames received and fully validated
    pub received_ok: u64,
    /// Frames dropped
    pub dropped: u64,
    /// Frames suppressed by deduplication
    pub duplicates_filtered: u64,
    /// Messages published to the broker
    pub published: u64,
    /// Publish attempts that failed
    pub publish_failures: u64,
    /// Broker reconnect attempts
    pub broker_reconnects: u64,
    /// Commands accepted into the queue
    pub commands_queued: u64,
    /// Commands transmitted
    pub commands_sent: u64,
    /// Commands dropped by expiration
    pub commands_expired: u64,
    /// ACK transmissions that failed
    pub ack_failures: u64,
}

impl GatewayStats {
    /// Bump a counter by one
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received_ok: self.received_ok.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplicates_filtered: self.duplicates_filtered.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            broker_reconnects: self.broker_reconnects.load(Ordering::Relaxed),
            commands_queued: self.commands_queued.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_expired: self.commands_expired.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}
