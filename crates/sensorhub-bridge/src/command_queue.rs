//! Command queue and opportunistic delivery
//!
//! Sensors sleep between transmissions and only listen for a short RX
//! window right after they transmit, so commands cannot be pushed — they
//! wait here until traffic from the target proves it is awake. There is
//! deliberately no background retry clock: retries are driven exclusively
//! by observed traffic so the gateway never transmits into a closed window.
//!
//! Enqueueing the same `(target, command-type)` pair again replaces the
//! parameters and resets the retry counter rather than stacking a second
//! entry, giving most-recent-wins semantics for knob changes.

use crate::command::CommandSpec;
use crate::error::{BridgeError, Result};
use crate::radio::RadioArbiter;
use crate::stats::GatewayStats;
use bytes::Bytes;
use parking_lot::Mutex;
use sensorhub_protocol::{encode_frame, CommandPayload, DeviceId, MessageType};
use serde::Serialize;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A command waiting for its target's RX window
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    id: u64,
    /// Target device
    pub target: DeviceId,
    /// Wire command-type byte
    pub cmd_type: u8,
    /// Parameter bytes
    pub params: Bytes,
    /// Action name for snapshots
    pub action: &'static str,
    /// When the command was (last) enqueued
    pub enqueued_at: Instant,
    /// Transmission attempts made during RX windows
    pub retries: u32,
}

/// Outcome of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new entry was appended
    Queued,
    /// An existing `(target, type)` entry was refreshed
    Coalesced,
}

/// One pending command in an admin snapshot
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandSnapshot {
    /// Action name
    pub action: String,
    /// Wire command-type byte
    pub command_type: u8,
    /// Parameters as a string (ASCII decimal on the wire)
    pub params: String,
    /// Transmission attempts so far
    pub retries: u32,
    /// Seconds since (re-)enqueue
    pub age_secs: u64,
}

/// Bounded FIFO of pending commands
pub struct CommandQueue {
    entries: Mutex<Vec<QueuedCommand>>,
    next_id: AtomicU64,
    capacity: usize,
    expiration: Duration,
}

impl CommandQueue {
    /// Create a queue with the given capacity and expiration window
    pub fn new(capacity: usize, expiration: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity,
            expiration,
        }
    }

    /// Number of pending commands
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any command is pending for the given target
    pub fn has_pending_for(&self, target: DeviceId) -> bool {
        self.entries.lock().iter().any(|c| c.target == target)
    }

    /// Insert or refresh a command
    pub fn enqueue(&self, spec: &CommandSpec) -> Result<EnqueueOutcome> {
        let mut entries = self.entries.lock();

        if let Some(existing) = entries
            .iter_mut()
            .find(|c| c.target == spec.target && c.cmd_type == spec.cmd_type)
        {
            existing.params = spec.params.clone();
            existing.retries = 0;
            existing.enqueued_at = Instant::now();
            existing.action = spec.action;
            debug!(device = %spec.target, action = spec.action, "coalesced queued command");
            return Ok(EnqueueOutcome::Coalesced);
        }

        if entries.len() >= self.capacity {
            warn!(device = %spec.target, action = spec.action, "command queue full");
            return Err(BridgeError::CommandQueueFull {
                capacity: self.capacity,
            });
        }

        entries.push(QueuedCommand {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            target: spec.target,
            cmd_type: spec.cmd_type,
            params: spec.params.clone(),
            action: spec.action,
            enqueued_at: Instant::now(),
            retries: 0,
        });
        debug!(device = %spec.target, action = spec.action, depth = entries.len(), "command queued");
        Ok(EnqueueOutcome::Queued)
    }

    /// Drop entries older than the expiration window; returns how many
    pub fn expire_stale(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|c| {
            let keep = c.enqueued_at.elapsed() < self.expiration;
            if !keep {
                info!(device = %c.target, action = c.action, retries = c.retries, "command expired");
            }
            keep
        });
        before - entries.len()
    }

    /// Pending entry ids for a target (retry iteration order = FIFO)
    fn ids_for(&self, target: DeviceId) -> Vec<u64> {
        self.entries
            .lock()
            .iter()
            .filter(|c| c.target == target)
            .map(|c| c.id)
            .collect()
    }

    /// Bump the retry counter and clone the entry, if it still exists
    fn begin_attempt(&self, id: u64) -> Option<QueuedCommand> {
        let mut entries = self.entries.lock();
        let entry = entries.iter_mut().find(|c| c.id == id)?;
        entry.retries += 1;
        Some(entry.clone())
    }

    /// Remove a delivered entry
    fn remove(&self, id: u64) {
        self.entries.lock().retain(|c| c.id != id);
    }

    /// Pending commands for a target, for the admin surface
    pub fn snapshot_for(&self, target: DeviceId) -> Vec<CommandSnapshot> {
        self.entries
            .lock()
            .iter()
            .filter(|c| c.target == target)
            .map(|c| CommandSnapshot {
                action: c.action.to_string(),
                command_type: c.cmd_type,
                params: String::from_utf8_lossy(&c.params).into_owned(),
                retries: c.retries,
                age_secs: c.enqueued_at.elapsed().as_secs(),
            })
            .collect()
    }
}

/// Drives command transmission through the radio arbiter
///
/// Owns the monotonic command sequence counter; shared between the broker
/// ingress, the admin surface and the retry trigger in the publish path.
pub struct CommandDispatcher {
    queue: Arc<CommandQueue>,
    arbiter: Arc<RadioArbiter>,
    stats: Arc<GatewayStats>,
    sequence: AtomicU16,
    quiet_period: Duration,
}

impl CommandDispatcher {
    /// Wire a dispatcher to its queue and radio
    pub fn new(
        queue: Arc<CommandQueue>,
        arbiter: Arc<RadioArbiter>,
        stats: Arc<GatewayStats>,
        quiet_period: Duration,
    ) -> Self {
        Self {
            queue,
            arbiter,
            stats,
            sequence: AtomicU16::new(0),
            quiet_period,
        }
    }

    /// The shared queue (admin snapshots)
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Next command sequence number, wrapping at 2^16
    fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn build_frame(&self, cmd: &QueuedCommand) -> Result<Vec<u8>> {
        let payload = CommandPayload::new(cmd.cmd_type, cmd.params.clone())?;
        Ok(encode_frame(
            MessageType::Command,
            cmd.target,
            self.next_sequence(),
            &payload.encode(),
        )?)
    }

    /// Queue a command and eagerly attempt one transmission
    ///
    /// The eager attempt is fire-and-forget: whether or not it reaches the
    /// air, the entry stays queued until a retry during the target's RX
    /// window delivers it or it expires.
    pub async fn submit(&self, spec: &CommandSpec) -> Result<EnqueueOutcome> {
        let outcome = self.queue.enqueue(spec)?;
        GatewayStats::incr(&self.stats.commands_queued);

        let eager = QueuedCommand {
            id: 0,
            target: spec.target,
            cmd_type: spec.cmd_type,
            params: spec.params.clone(),
            action: spec.action,
            enqueued_at: Instant::now(),
            retries: 0,
        };
        match self.build_frame(&eager) {
            Ok(frame) => {
                if let Err(e) = self.arbiter.transmit_frame(&frame).await {
                    debug!(device = %spec.target, error = %e, "eager command transmit failed, will retry on traffic");
                }
            }
            Err(e) => warn!(device = %spec.target, error = %e, "command frame build failed"),
        }

        Ok(outcome)
    }

    /// Drive retries for a device known to be in its RX window
    ///
    /// Expires stale entries first, then walks the target's pending
    /// commands in FIFO order: each gets its retry counter bumped and one
    /// transmission attempt; success removes the entry, failure leaves it
    /// for the next window. A quiet period between attempts keeps the
    /// radio from seeing back-to-back transmits.
    pub async fn retry_for(&self, target: DeviceId) {
        let expired = self.queue.expire_stale();
        for _ in 0..expired {
            GatewayStats::incr(&self.stats.commands_expired);
        }

        let ids = self.queue.ids_for(target);
        if ids.is_empty() {
            return;
        }
        info!(device = %target, pending = ids.len(), "driving command retries in RX window");

        for (i, id) in ids.iter().enumerate() {
            let Some(cmd) = self.queue.begin_attempt(*id) else {
                continue;
            };
            let frame = match self.build_frame(&cmd) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(device = %target, error = %e, "dropping unbuildable command");
                    self.queue.remove(*id);
                    continue;
                }
            };
            match self.arbiter.transmit_frame(&frame).await {
                Ok(()) => {
                    info!(device = %target, action = cmd.action, retries = cmd.retries, "command delivered");
                    self.queue.remove(*id);
                    GatewayStats::incr(&self.stats.commands_sent);
                }
                Err(e) => {
                    debug!(device = %target, action = cmd.action, error = %e, "command retry failed, keeping entry");
                }
            }
            if i + 1 < ids.len() {
                tokio::time::sleep(self.quiet_period).await;
            }
        }
    }
}
