//! Registry persistence
//!
//! The registry is mirrored to durable storage as one JSON document holding
//! the full device table. Writes are best-effort: a failed write is logged
//! and the in-memory table stays authoritative. The document is replaced
//! wholesale on every flush, so there is no partial-update window.
//!
//! Two document layouts are accepted on load: the current rich per-device
//! form, and the legacy minimal `{id, name, location}` form written by
//! early gateway builds. Only the rich form is ever written.

use crate::error::{BridgeError, Result};
use crate::registry::{DeviceRegistry, RestoredFields};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sensorhub_protocol::{DeviceId, SensorKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// One device in the persisted document
///
/// Everything beyond `id`/`name`/`location` defaults, which is what lets
/// the legacy minimal layout deserialize into the same struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedDevice {
    /// Uppercase hex identity token
    pub id: String,
    /// Friendly name
    pub name: String,
    /// Location string
    #[serde(default)]
    pub location: String,
    /// Sensor classification
    #[serde(default)]
    pub sensor_type: Option<String>,
    /// Last-seen timestamp
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Total validated frames
    #[serde(default)]
    pub packet_count: u32,
    /// RSSI of the last frame
    #[serde(default)]
    pub last_rssi: i16,
    /// SNR of the last frame
    #[serde(default)]
    pub last_snr: i8,
    /// Device-reported read interval (seconds)
    #[serde(default)]
    pub read_interval: u16,
    /// Device-reported deep-sleep duration (seconds)
    #[serde(default)]
    pub deep_sleep: u16,
}

/// Persisted registry document (rich form)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryDocument {
    /// Every known device
    pub devices: Vec<PersistedDevice>,
}

impl RegistryDocument {
    /// Build the document from a live registry
    pub fn from_registry(registry: &DeviceRegistry) -> Self {
        let devices = registry
            .snapshot()
            .into_iter()
            .map(|snap| PersistedDevice {
                id: snap.id,
                name: snap.name,
                location: snap.location,
                sensor_type: Some(snap.sensor_type),
                last_seen: Some(snap.last_seen),
                packet_count: snap.packet_count,
                last_rssi: snap.last_rssi,
                last_snr: snap.last_snr,
                read_interval: snap.read_interval,
                deep_sleep: snap.deep_sleep,
            })
            .collect();
        Self { devices }
    }

    /// Parse a persisted document, accepting the legacy bare-list layout
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if let Ok(doc) = serde_json::from_slice::<RegistryDocument>(bytes) {
            return Ok(doc);
        }
        // legacy form: a bare JSON array of minimal device objects
        let devices = serde_json::from_slice::<Vec<PersistedDevice>>(bytes)?;
        Ok(Self { devices })
    }

    /// Restore every parseable device into the registry
    ///
    /// Entries with an unparseable id are skipped with a warning; capacity
    /// truncation is handled by the registry itself.
    pub fn restore_into(&self, registry: &DeviceRegistry) -> usize {
        let mut restored = 0;
        for dev in &self.devices {
            let id = match DeviceId::from_str(&dev.id) {
                Ok(id) => id,
                Err(_) => {
                    warn!(id = %dev.id, "skipping persisted device with bad id");
                    continue;
                }
            };
            registry.restore(
                id,
                dev.name.clone(),
                dev.location.clone(),
                RestoredFields {
                    sensor_kind: dev
                        .sensor_type
                        .as_deref()
                        .map(SensorKind::from)
                        .unwrap_or_default(),
                    last_seen: dev.last_seen,
                    packet_count: dev.packet_count,
                    last_rssi: dev.last_rssi,
                    last_snr: dev.last_snr,
                    read_interval: dev.read_interval,
                    deep_sleep: dev.deep_sleep,
                },
            );
            restored += 1;
        }
        restored
    }
}

/// Durable storage collaborator for the registry document
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Overwrite the stored document
    async fn save(&self, doc: &RegistryDocument) -> Result<()>;

    /// Load the stored document; `None` when nothing was persisted yet
    async fn load(&self) -> Result<Option<RegistryDocument>>;
}

/// File-backed registry store
pub struct FileRegistryStore {
    path: PathBuf,
}

impl FileRegistryStore {
    /// Create a store at the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn save(&self, doc: &RegistryDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| BridgeError::Persistence(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| BridgeError::Persistence(format!("rename {}: {e}", self.path.display())))?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<RegistryDocument>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BridgeError::Persistence(format!(
                    "read {}: {e}",
                    self.path.display()
                )))
            }
        };
        RegistryDocument::parse(&bytes).map(Some)
    }
}

/// Drain the registry dirty channel, flushing the full table on each burst
///
/// Runs until the registry (and with it the dirty sender) is dropped.
/// Coalesces bursts of mutations into one write by emptying the channel
/// before flushing.
pub async fn persistence_task(
    registry: std::sync::Arc<DeviceRegistry>,
    store: std::sync::Arc<dyn RegistryStore>,
    mut dirty_rx: tokio::sync::mpsc::UnboundedReceiver<()>,
) {
    while dirty_rx.recv().await.is_some() {
        while dirty_rx.try_recv().is_ok() {}
        let doc = RegistryDocument::from_registry(&registry);
        match store.save(&doc).await {
            Ok(()) => info!(devices = doc.devices.len(), "registry persisted"),
            Err(e) => warn!(error = %e, "registry persistence failed, in-memory state remains authoritative"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(10, 50).0
    }

    #[test]
    fn document_roundtrip() {
        let reg = registry();
        reg.observe(DeviceId(0xAABB), 4, -77, 6).unwrap();
        reg.set_name(DeviceId(0xAABB), "porch");
        reg.set_location(DeviceId(0xAABB), "front porch");
        reg.set_config(DeviceId(0xAABB), 60, 900);

        let doc = RegistryDocument::from_registry(&reg);
        let json = serde_json::to_vec(&doc).unwrap();
        let parsed = RegistryDocument::parse(&json).unwrap();

        let fresh = registry();
        assert_eq!(parsed.restore_into(&fresh), 1);
        let snap = fresh.snapshot();
        assert_eq!(snap[0].name, "porch");
        assert_eq!(snap[0].location, "front porch");
        assert_eq!(snap[0].packet_count, 1);
        assert_eq!(snap[0].read_interval, 60);
    }

    #[test]
    fn legacy_minimal_layout_loads() {
        let legacy = br#"[
            {"id": "000000000000AABB", "name": "porch", "location": "front porch"},
            {"id": "000000000000CCDD", "name": "attic"}
        ]"#;
        let doc = RegistryDocument::parse(legacy).unwrap();
        assert_eq!(doc.devices.len(), 2);

        let reg = registry();
        assert_eq!(doc.restore_into(&reg), 2);
        let snap = reg.snapshot();
        assert_eq!(snap[0].name, "porch");
        assert_eq!(snap[0].packet_count, 0);
        // missing location falls back to the registry default
        assert_eq!(snap[1].name, "attic");
        assert_eq!(snap[1].location, "unknown");
    }

    #[test]
    fn bad_ids_are_skipped() {
        let doc = RegistryDocument {
            devices: vec![
                PersistedDevice {
                    id: "not-hex".into(),
                    name: "broken".into(),
                    location: String::new(),
                    sensor_type: None,
                    last_seen: None,
                    packet_count: 0,
                    last_rssi: 0,
                    last_snr: 0,
                    read_interval: 0,
                    deep_sleep: 0,
                },
                PersistedDevice {
                    id: "00000000000000FF".into(),
                    name: "good".into(),
                    location: String::new(),
                    sensor_type: None,
                    last_seen: None,
                    packet_count: 0,
                    last_rssi: 0,
                    last_snr: 0,
                    read_interval: 0,
                    deep_sleep: 0,
                },
            ],
        };
        let reg = registry();
        assert_eq!(doc.restore_into(&reg), 1);
        assert_eq!(reg.snapshot()[0].name, "good");
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistryStore::new(dir.path().join("registry.json"));

        assert!(store.load().await.unwrap().is_none());

        let reg = registry();
        reg.observe(DeviceId(0x11), 1, 0, 0).unwrap();
        let doc = RegistryDocument::from_registry(&reg);
        store.save(&doc).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.devices.len(), 1);
        assert_eq!(loaded.devices[0].id, "0000000000000011");
    }

    #[tokio::test]
    async fn persistence_task_flushes_on_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let store: std::sync::Arc<dyn RegistryStore> =
            std::sync::Arc::new(FileRegistryStore::new(dir.path().join("registry.json")));
        let (reg, dirty_rx) = DeviceRegistry::new(10, 50);
        let reg = std::sync::Arc::new(reg);

        let task = tokio::spawn(persistence_task(reg.clone(), store.clone(), dirty_rx));

        reg.observe(DeviceId(0x22), 1, 0, 0).unwrap();
        reg.set_name(DeviceId(0x22), "shed");

        // allow the drain task a few polls to flush
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if let Ok(Some(doc)) = store.load().await {
                if doc.devices.iter().any(|d| d.name == "shed") {
                    task.abort();
                    return;
                }
            }
        }
        panic!("registry was never persisted");
    }
}
