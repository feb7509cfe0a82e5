//! Device registry
//!
//! One record per known sensor, keyed by [`DeviceId`] and bounded by
//! configuration. The registry is the only mutable state shared between the
//! receive and publish contexts; every public operation takes the single
//! internal lock for a short critical section and never holds it across
//! I/O. Persistence is signalled through a dirty channel and performed by
//! whoever drains it (see [`crate::persist`]).
//!
//! # Deduplication
//!
//! Each record carries a fixed-size ring of recently seen sequence numbers.
//! `0xFFFF` marks an empty slot, which means a sensor that legitimately
//! emits sequence 0xFFFF can have its first such frame misread as a
//! duplicate while empty slots remain — sensor firmware avoids that value.
//! The ring holds the last `ring_size` accepted sequence numbers regardless
//! of ordering, so a frame older than that window is reported fresh again.

use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sensorhub_protocol::{DeviceId, SensorKind};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sentinel marking an empty dedup ring slot
pub const EMPTY_SLOT: u16 = 0xFFFF;

/// Mutable per-device state owned by the registry
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Device identity
    pub id: DeviceId,
    /// Friendly name (defaults to `sensor_<low32hex>`)
    pub name: String,
    /// Physical location string
    pub location: String,
    /// Hardware classification inferred from readings
    pub sensor_kind: SensorKind,
    /// Local wall-clock time of the last validated frame
    pub last_seen: DateTime<Utc>,
    /// RSSI of the last frame
    pub last_rssi: i16,
    /// SNR of the last frame
    pub last_snr: i8,
    /// Total validated frames from this device
    pub packet_count: u32,
    /// Sequence number of the last frame
    pub last_sequence: u16,
    /// Device-reported read interval in seconds
    pub read_interval: u16,
    /// Device-reported deep-sleep duration in seconds
    pub deep_sleep: u16,
    /// Recently seen sequence numbers
    ring: Vec<u16>,
    /// Next write position in the ring
    ring_index: usize,
}

impl DeviceRecord {
    fn new(id: DeviceId, ring_size: usize) -> Self {
        Self {
            id,
            name: id.default_name(),
            location: "unknown".to_string(),
            sensor_kind: SensorKind::Unknown,
            last_seen: Utc::now(),
            last_rssi: 0,
            last_snr: 0,
            packet_count: 0,
            last_sequence: 0,
            read_interval: 0,
            deep_sleep: 0,
            ring: vec![EMPTY_SLOT; ring_size],
            ring_index: 0,
        }
    }

    fn remember_sequence(&mut self, sequence: u16) {
        self.ring[self.ring_index] = sequence;
        self.ring_index = (self.ring_index + 1) % self.ring.len();
    }

    fn has_seen(&self, sequence: u16) -> bool {
        self.ring.contains(&sequence)
    }

    fn clear_ring(&mut self) {
        self.ring.fill(EMPTY_SLOT);
        self.ring_index = 0;
    }
}

/// One device in a registry snapshot
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceSnapshot {
    /// Uppercase hex identity token
    pub id: String,
    /// Friendly name
    pub name: String,
    /// Location string
    pub location: String,
    /// Sensor classification
    pub sensor_type: String,
    /// Last-seen timestamp (RFC 3339)
    pub last_seen: DateTime<Utc>,
    /// RSSI of the last frame
    pub last_rssi: i16,
    /// SNR of the last frame
    pub last_snr: i8,
    /// Total validated frames
    pub packet_count: u32,
    /// Sequence number of the last frame
    pub last_sequence: u16,
    /// Device-reported read interval (seconds)
    pub read_interval: u16,
    /// Device-reported deep-sleep duration (seconds)
    pub deep_sleep: u16,
}

impl From<&DeviceRecord> for DeviceSnapshot {
    fn from(rec: &DeviceRecord) -> Self {
        Self {
            id: rec.id.hex(),
            name: rec.name.clone(),
            location: rec.location.clone(),
            sensor_type: rec.sensor_kind.as_str().to_string(),
            last_seen: rec.last_seen,
            last_rssi: rec.last_rssi,
            last_snr: rec.last_snr,
            packet_count: rec.packet_count,
            last_sequence: rec.last_sequence,
            read_interval: rec.read_interval,
            deep_sleep: rec.deep_sleep,
        }
    }
}

/// Bounded, internally serialized device table
pub struct DeviceRegistry {
    devices: Mutex<HashMap<DeviceId, DeviceRecord>>,
    capacity: usize,
    ring_size: usize,
    dirty_tx: mpsc::UnboundedSender<()>,
}

impl DeviceRegistry {
    /// Create an empty registry
    ///
    /// Returns the registry and the dirty-notification receiver; the
    /// gateway drains the receiver and writes the snapshot to durable
    /// storage (best-effort).
    pub fn new(capacity: usize, ring_size: usize) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();
        (
            Self {
                devices: Mutex::new(HashMap::new()),
                capacity,
                ring_size,
                dirty_tx,
            },
            dirty_rx,
        )
    }

    fn mark_dirty(&self) {
        // receiver gone means persistence is disabled, not an error
        let _ = self.dirty_tx.send(());
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    /// Whether the registry has no devices
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a record with defaults if absent
    ///
    /// Fails with [`BridgeError::RegistryFull`] when the device is unknown
    /// and the table is at capacity; existing records are never touched by
    /// a refused add.
    pub fn ensure(&self, id: DeviceId) -> Result<()> {
        let mut devices = self.devices.lock();
        if devices.contains_key(&id) {
            return Ok(());
        }
        if devices.len() >= self.capacity {
            warn!(device = %id, capacity = self.capacity, "registry full, refusing new device");
            return Err(BridgeError::RegistryFull {
                capacity: self.capacity,
            });
        }
        let record = DeviceRecord::new(id, self.ring_size);
        info!(device = %id, name = %record.name, "registered new device");
        devices.insert(id, record);
        drop(devices);
        self.mark_dirty();
        Ok(())
    }

    /// Record a validated reception: metrics, packet count, dedup ring
    ///
    /// Auto-creates the record when absent (subject to capacity).
    pub fn observe(&self, id: DeviceId, sequence: u16, rssi: i16, snr: i8) -> Result<()> {
        self.ensure(id)?;
        let mut devices = self.devices.lock();
        // ensure() above guarantees presence
        let record = devices.get_mut(&id).expect("record ensured");
        record.last_seen = Utc::now();
        record.last_rssi = rssi;
        record.last_snr = snr;
        record.packet_count += 1;
        record.last_sequence = sequence;
        record.remember_sequence(sequence);
        Ok(())
    }

    /// Whether this sequence number was seen within the dedup window
    ///
    /// Unknown devices report `false`: a device we have never heard from
    /// cannot have duplicates.
    pub fn is_duplicate(&self, id: DeviceId, sequence: u16) -> bool {
        let devices = self.devices.lock();
        devices
            .get(&id)
            .map(|rec| rec.has_seen(sequence))
            .unwrap_or(false)
    }

    /// Reset the dedup ring for a device (device restart)
    pub fn clear_dedup(&self, id: DeviceId) {
        let mut devices = self.devices.lock();
        if let Some(record) = devices.get_mut(&id) {
            record.clear_ring();
            debug!(device = %id, "cleared dedup ring");
        }
    }

    /// Update the friendly name; no-op when unchanged or empty
    pub fn set_name(&self, id: DeviceId, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let changed = {
            let mut devices = self.devices.lock();
            match devices.get_mut(&id) {
                Some(record) if record.name != name => {
                    info!(device = %id, old = %record.name, new = %name, "device name updated");
                    record.name = name.to_string();
                    true
                }
                Some(_) => false,
                None => {
                    warn!(device = %id, "name update for unknown device");
                    false
                }
            }
        };
        if changed {
            self.mark_dirty();
        }
    }

    /// Update the location; no-op when unchanged or empty
    pub fn set_location(&self, id: DeviceId, location: &str) {
        let location = location.trim();
        if location.is_empty() {
            return;
        }
        let changed = {
            let mut devices = self.devices.lock();
            match devices.get_mut(&id) {
                Some(record) if record.location != location => {
                    info!(device = %id, old = %record.location, new = %location, "device location updated");
                    record.location = location.to_string();
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.mark_dirty();
        }
    }

    /// Update the sensor classification; no-op when unchanged
    pub fn set_sensor_kind(&self, id: DeviceId, kind: SensorKind) {
        let changed = {
            let mut devices = self.devices.lock();
            match devices.get_mut(&id) {
                Some(record) if record.sensor_kind != kind => {
                    debug!(device = %id, kind = %kind, "sensor kind classified");
                    record.sensor_kind = kind;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.mark_dirty();
        }
    }

    /// Update the device-reported configuration; no-op when unchanged
    pub fn set_config(&self, id: DeviceId, read_interval: u16, deep_sleep: u16) {
        let changed = {
            let mut devices = self.devices.lock();
            match devices.get_mut(&id) {
                Some(record)
                    if record.read_interval != read_interval || record.deep_sleep != deep_sleep =>
                {
                    record.read_interval = read_interval;
                    record.deep_sleep = deep_sleep;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.mark_dirty();
        }
    }

    /// Resolve the friendly name, auto-creating the record when absent so
    /// the translator can always emit a name
    pub fn lookup_name(&self, id: DeviceId) -> String {
        if let Some(record) = self.devices.lock().get(&id) {
            return record.name.clone();
        }
        // auto-register; when the table is full fall back to the derived name
        match self.ensure(id) {
            Ok(()) => self
                .devices
                .lock()
                .get(&id)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| id.default_name()),
            Err(_) => id.default_name(),
        }
    }

    /// Resolve the location, auto-creating the record when absent
    pub fn lookup_location(&self, id: DeviceId) -> String {
        if let Some(record) = self.devices.lock().get(&id) {
            return record.location.clone();
        }
        match self.ensure(id) {
            Ok(()) => self
                .devices
                .lock()
                .get(&id)
                .map(|r| r.location.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            Err(_) => "unknown".to_string(),
        }
    }

    /// Consistent point-in-time view of every device
    ///
    /// Built entirely inside the lock; the result owns all its data and
    /// exposes no interior references.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let devices = self.devices.lock();
        let mut out: Vec<DeviceSnapshot> = devices.values().map(DeviceSnapshot::from).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Restore a device from persisted state (startup only)
    ///
    /// Silently stops at capacity, matching load-time truncation of an
    /// over-full persisted table.
    pub(crate) fn restore(&self, id: DeviceId, name: String, location: String, rest: RestoredFields) {
        let mut devices = self.devices.lock();
        if devices.len() >= self.capacity && !devices.contains_key(&id) {
            warn!(device = %id, "persisted registry exceeds capacity, skipping device");
            return;
        }
        let mut record = DeviceRecord::new(id, self.ring_size);
        if !name.is_empty() {
            record.name = name;
        }
        if !location.is_empty() {
            record.location = location;
        }
        record.sensor_kind = rest.sensor_kind;
        if let Some(ts) = rest.last_seen {
            record.last_seen = ts;
        }
        record.packet_count = rest.packet_count;
        record.last_rssi = rest.last_rssi;
        record.last_snr = rest.last_snr;
        record.read_interval = rest.read_interval;
        record.deep_sleep = rest.deep_sleep;
        devices.insert(id, record);
    }
}

/// Non-identity fields restored from persistence
#[derive(Debug, Default)]
pub(crate) struct RestoredFields {
    pub sensor_kind: SensorKind,
    pub last_seen: Option<DateTime<Utc>>,
    pub packet_count: u32,
    pub last_rssi: i16,
    pub last_snr: i8,
    pub read_interval: u16,
    pub deep_sleep: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: DeviceId = DeviceId(0xAABBCCDDEEFF0011);

    fn registry(capacity: usize) -> DeviceRegistry {
        DeviceRegistry::new(capacity, 50).0
    }

    #[test]
    fn auto_discovery_sets_defaults() {
        let reg = registry(10);
        reg.observe(DEV, 1, -85, 9).unwrap();

        let snap = reg.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].name, "sensor_eeff0011");
        assert_eq!(snap[0].location, "unknown");
        assert_eq!(snap[0].sensor_type, "unknown");
        assert_eq!(snap[0].packet_count, 1);
        assert_eq!(snap[0].last_rssi, -85);
    }

    #[test]
    fn duplicate_detection_within_window() {
        let reg = registry(10);
        assert!(!reg.is_duplicate(DEV, 7));
        reg.observe(DEV, 7, -80, 8).unwrap();
        assert!(reg.is_duplicate(DEV, 7));
        assert!(!reg.is_duplicate(DEV, 8));
    }

    #[test]
    fn unknown_device_is_never_duplicate() {
        let reg = registry(10);
        assert!(!reg.is_duplicate(DeviceId(0xDEAD), 0));
        assert!(!reg.is_duplicate(DeviceId(0xDEAD), EMPTY_SLOT));
    }

    #[test]
    fn ring_holds_exactly_the_window() {
        let reg = registry(10);
        for seq in 0..50u16 {
            reg.observe(DEV, seq, 0, 0).unwrap();
        }
        assert!(reg.is_duplicate(DEV, 0));

        // 51st observation evicts sequence 0
        reg.observe(DEV, 50, 0, 0).unwrap();
        assert!(!reg.is_duplicate(DEV, 0));
        assert!(reg.is_duplicate(DEV, 1));
        assert!(reg.is_duplicate(DEV, 50));
    }

    #[test]
    fn clear_dedup_makes_everything_fresh() {
        let reg = registry(10);
        reg.observe(DEV, 7, 0, 0).unwrap();
        assert!(reg.is_duplicate(DEV, 7));

        reg.clear_dedup(DEV);
        assert!(!reg.is_duplicate(DEV, 7));

        // the record itself survives the reset
        assert_eq!(reg.snapshot()[0].packet_count, 1);
    }

    #[test]
    fn sentinel_sequence_reads_as_duplicate_on_fresh_ring() {
        // Documented limitation: 0xFFFF matches the empty-slot sentinel.
        let reg = registry(10);
        reg.observe(DEV, 1, 0, 0).unwrap();
        assert!(reg.is_duplicate(DEV, EMPTY_SLOT));
    }

    #[test]
    fn capacity_refuses_new_without_corrupting_existing() {
        let reg = registry(2);
        reg.observe(DeviceId(1), 10, -70, 5).unwrap();
        reg.observe(DeviceId(2), 20, -71, 6).unwrap();

        let err = reg.observe(DeviceId(3), 30, -72, 7).unwrap_err();
        assert!(matches!(err, BridgeError::RegistryFull { capacity: 2 }));

        let snap = reg.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].packet_count, 1);
        assert_eq!(snap[1].packet_count, 1);
    }

    #[test]
    fn name_update_is_idempotent_and_ignores_empty() {
        let (reg, mut dirty) = DeviceRegistry::new(10, 50);
        reg.ensure(DEV).unwrap();
        while dirty.try_recv().is_ok() {}

        reg.set_name(DEV, "garden-east");
        assert_eq!(reg.lookup_name(DEV), "garden-east");
        assert!(dirty.try_recv().is_ok());

        // unchanged and empty names do not dirty the registry
        reg.set_name(DEV, "garden-east");
        reg.set_name(DEV, "   ");
        assert!(dirty.try_recv().is_err());
    }

    #[test]
    fn config_update_tracks_changes_only() {
        let (reg, mut dirty) = DeviceRegistry::new(10, 50);
        reg.ensure(DEV).unwrap();
        while dirty.try_recv().is_ok() {}

        reg.set_config(DEV, 60, 900);
        assert!(dirty.try_recv().is_ok());
        reg.set_config(DEV, 60, 900);
        assert!(dirty.try_recv().is_err());

        let snap = reg.snapshot();
        assert_eq!(snap[0].read_interval, 60);
        assert_eq!(snap[0].deep_sleep, 900);
    }

    #[test]
    fn lookup_auto_creates() {
        let reg = registry(10);
        assert_eq!(reg.lookup_name(DEV), "sensor_eeff0011");
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup_location(DEV), "unknown");
    }

    #[test]
    fn lookup_on_full_registry_falls_back_to_derived_name() {
        let reg = registry(1);
        reg.ensure(DeviceId(1)).unwrap();
        assert_eq!(reg.lookup_name(DEV), "sensor_eeff0011");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn sequence_wraparound_tracked() {
        let reg = registry(10);
        for seq in [0xFFFEu16, 0x0000, 0x0001] {
            assert!(!reg.is_duplicate(DEV, seq), "seq {seq:#X} misread");
            reg.observe(DEV, seq, 0, 0).unwrap();
        }
        assert!(reg.is_duplicate(DEV, 0xFFFE));
        assert!(reg.is_duplicate(DEV, 0x0000));
    }

    #[test]
    fn snapshot_is_detached() {
        let reg = registry(10);
        reg.observe(DEV, 1, 0, 0).unwrap();
        let snap = reg.snapshot();
        reg.set_name(DEV, "renamed");
        assert_eq!(snap[0].name, "sensor_eeff0011");
    }
}
