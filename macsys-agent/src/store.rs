//! Device store
//!
//! The store is the single source of truth for device properties and states.
//! Writers diff against it at write time and every accepted write is broadcast
//! as a [`StoreEvent`] (the MQTT bridge forwards them to the automation server).

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::device::{DeviceId, DeviceRecord, PropertyMap, StateValue};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Change notifications emitted by the store
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    StateChanged {
        device_id: DeviceId,
        device: String,
        key: String,
        value: StateValue,
    },
    PropertiesReplaced {
        device_id: DeviceId,
    },
    StateListChanged {
        device_id: DeviceId,
    },
    PluginPrefChanged {
        key: String,
        value: Value,
    },
}

/// What the agent needs from a device store
pub trait DeviceStore: Send + Sync {
    /// Ids of every known device, in a stable order
    fn device_ids(&self) -> Vec<DeviceId>;

    fn device(&self, id: DeviceId) -> Result<DeviceRecord, StoreError>;

    fn state(&self, id: DeviceId, key: &str) -> Result<Option<StateValue>, StoreError>;

    fn write_state(&self, id: DeviceId, key: &str, value: StateValue) -> Result<(), StoreError>;

    /// Replace the whole property map; true when the set of keys changed
    fn replace_properties(&self, id: DeviceId, properties: PropertyMap) -> Result<bool, StoreError>;

    fn announce_state_list_changed(&self, id: DeviceId) -> Result<(), StoreError>;

    fn plugin_pref(&self, key: &str) -> Option<Value>;

    fn write_plugin_pref(&self, key: &str, value: Value);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    plugin_prefs: PropertyMap,
    #[serde(default)]
    devices: Vec<DeviceRecord>,
}

/// In-process store, one mutex per device
pub struct MemoryStore {
    devices: RwLock<BTreeMap<DeviceId, Arc<Mutex<DeviceRecord>>>>,
    prefs: Mutex<PropertyMap>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            devices: RwLock::new(BTreeMap::new()),
            prefs: Mutex::new(PropertyMap::new()),
            events,
        }
    }

    pub fn with_devices(devices: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let store = Self::new();
        for record in devices {
            store.insert(record);
        }
        store
    }

    /// Add or replace a device
    pub fn insert(&self, record: DeviceRecord) {
        self.devices
            .write()
            .insert(record.id, Arc::new(Mutex::new(record)));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn set_plugin_prefs(&self, prefs: PropertyMap) {
        *self.prefs.lock() = prefs;
    }

    fn entry(&self, id: DeviceId) -> Result<Arc<Mutex<DeviceRecord>>, StoreError> {
        self.devices
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownDevice(id))
    }

    fn emit(&self, event: StoreEvent) {
        // no subscriber is fine
        let _ = self.events.send(event);
    }

    /// Load devices and plugin preferences from a JSON snapshot
    async fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let content = tokio::fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        let store = Self::with_devices(snapshot.devices);
        store.set_plugin_prefs(snapshot.plugin_prefs);
        debug!(path = %path.display(), devices = store.device_ids().len(), "snapshot loaded");
        Ok(store)
    }

    /// Seed from the configured devices, then bring back the states and
    /// plugin preferences of the last snapshot when one exists.
    ///
    /// Configuration always comes from `devices`; snapshot entries of devices
    /// no longer configured are dropped.
    pub async fn restore(devices: impl IntoIterator<Item = DeviceRecord>, path: &Path) -> Result<Self, StoreError> {
        let store = Self::with_devices(devices);
        if !tokio::fs::try_exists(path).await? {
            return Ok(store);
        }

        let snapshot = Self::load_snapshot(path).await?;
        for id in store.device_ids() {
            let (Ok(target), Ok(saved)) = (store.entry(id), snapshot.entry(id)) else {
                continue;
            };
            let states = saved.lock().states.clone();
            target.lock().states.extend(states);
        }
        store.set_plugin_prefs(snapshot.prefs.lock().clone());
        Ok(store)
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            plugin_prefs: self.prefs.lock().clone(),
            devices: self
                .devices
                .read()
                .values()
                .map(|entry| entry.lock().clone())
                .collect(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, content).await?;
        debug!(path = %path.display(), "snapshot saved");
        Ok(())
    }
}

impl DeviceStore for MemoryStore {
    fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.read().keys().copied().collect()
    }

    fn device(&self, id: DeviceId) -> Result<DeviceRecord, StoreError> {
        Ok(self.entry(id)?.lock().clone())
    }

    fn state(&self, id: DeviceId, key: &str) -> Result<Option<StateValue>, StoreError> {
        Ok(self.entry(id)?.lock().states.get(key).cloned())
    }

    fn write_state(&self, id: DeviceId, key: &str, value: StateValue) -> Result<(), StoreError> {
        let entry = self.entry(id)?;
        let device = {
            let mut record = entry.lock();
            record.states.insert(key.to_string(), value.clone());
            record.name.clone()
        };
        self.emit(StoreEvent::StateChanged {
            device_id: id,
            device,
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn replace_properties(&self, id: DeviceId, properties: PropertyMap) -> Result<bool, StoreError> {
        let entry = self.entry(id)?;
        let shape_changed = {
            let mut record = entry.lock();
            let changed = record.properties.len() != properties.len()
                || properties.keys().any(|k| !record.properties.contains_key(k));
            record.properties = properties;
            changed
        };
        self.emit(StoreEvent::PropertiesReplaced { device_id: id });
        Ok(shape_changed)
    }

    fn announce_state_list_changed(&self, id: DeviceId) -> Result<(), StoreError> {
        self.entry(id)?;
        self.emit(StoreEvent::StateListChanged { device_id: id });
        Ok(())
    }

    fn plugin_pref(&self, key: &str) -> Option<Value> {
        self.prefs.lock().get(key).cloned()
    }

    fn write_plugin_pref(&self, key: &str, value: Value) {
        self.prefs.lock().insert(key.to_string(), value.clone());
        self.emit(StoreEvent::PluginPrefChanged {
            key: key.to_string(),
            value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{keys, DeviceKind};
    use tempfile::tempdir;

    fn store() -> MemoryStore {
        MemoryStore::with_devices([
            DeviceRecord::new(DeviceId(1), "Safari", DeviceKind::Application)
                .with_property("ApplicationID", "Safari"),
            DeviceRecord::new(DeviceId(2), "Backup", DeviceKind::Volume)
                .with_property("VolumeID", "Backup"),
        ])
    }

    #[test]
    fn test_write_state_emits_event() {
        let store = store();
        let mut events = store.subscribe();
        store.write_state(DeviceId(1), keys::ON_OFF, true.into()).unwrap();

        assert_eq!(store.state(DeviceId(1), keys::ON_OFF).unwrap(), Some(StateValue::Bool(true)));
        match events.try_recv().unwrap() {
            StoreEvent::StateChanged { device, key, .. } => {
                assert_eq!(device, "Safari");
                assert_eq!(key, keys::ON_OFF);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_device() {
        let err = store().write_state(DeviceId(99), keys::ON_OFF, true.into()).unwrap_err();
        assert!(matches!(err, StoreError::UnknownDevice(DeviceId(99))));
    }

    #[test]
    fn test_replace_properties_reports_shape_change() {
        let store = store();
        let mut props = store.device(DeviceId(2)).unwrap().properties;
        props.insert("VolumeID".into(), "Archive".into());
        assert!(!store.replace_properties(DeviceId(2), props.clone()).unwrap());

        props.insert("keepAwaken".into(), true.into());
        assert!(store.replace_properties(DeviceId(2), props).unwrap());
    }

    #[tokio::test]
    async fn test_restore_brings_back_snapshot_states() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("devices.json");

        let saved = store();
        saved.write_state(DeviceId(2), keys::VOLUME_STATUS, "on".into()).unwrap();
        saved.write_plugin_pref("disksleepTime", 10.into());
        saved.save_snapshot(&path).await.unwrap();

        let configured = [
            DeviceRecord::new(DeviceId(2), "Backup", DeviceKind::Volume)
                .with_property("VolumeID", "Backup")
                .with_property("keepAwaken", true),
            DeviceRecord::new(DeviceId(3), "Mail", DeviceKind::Application),
        ];
        let restored = MemoryStore::restore(configured, &path).await.unwrap();

        assert_eq!(restored.device_ids(), vec![DeviceId(2), DeviceId(3)]);
        let backup = restored.device(DeviceId(2)).unwrap();
        assert_eq!(backup.state_text(keys::VOLUME_STATUS), Some("on"));
        assert_eq!(backup.properties["keepAwaken"], Value::from(true));
        assert!(restored.device(DeviceId(3)).unwrap().states.is_empty());
        assert_eq!(restored.plugin_pref("disksleepTime"), Some(Value::from(10)));
    }

    #[tokio::test]
    async fn test_restore_without_snapshot() {
        let dir = tempdir().unwrap();
        let restored = MemoryStore::restore(
            [DeviceRecord::new(DeviceId(1), "Safari", DeviceKind::Application)],
            &dir.path().join("absent.json"),
        )
        .await
        .unwrap();
        assert_eq!(restored.device_ids(), vec![DeviceId(1)]);
        assert_eq!(restored.plugin_pref("disksleepTime"), None);
    }
}
