//! Debounced writes into the device store
//!
//! Only values that differ from what the store holds are written. A short
//! settle pause follows every batch that wrote something so the automation
//! server is not flooded with notifications.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::device::{DeviceId, PropertyMap, StateMap, StateValue};
use crate::logging::{LogFlags, PluginLog};
use crate::store::{DeviceStore, StoreError};

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct DebouncedWriter {
    store: Arc<dyn DeviceStore>,
    log: PluginLog,
    settle: Option<Duration>,
}

impl DebouncedWriter {
    pub fn new(store: Arc<dyn DeviceStore>, log: PluginLog, settle: Option<Duration>) -> Self {
        Self { store, log, settle }
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    async fn settle(&self) {
        if let Some(delay) = self.settle {
            tokio::time::sleep(delay).await;
        }
    }

    /// Write the states that differ from the store and return them
    pub async fn apply_states(&self, id: DeviceId, proposed: StateMap) -> Result<StateMap, StoreError> {
        let record = self.store.device(id)?;
        let mut delta = StateMap::new();

        for (key, value) in proposed {
            if self.store.state(id, &key)?.as_ref() == Some(&value) {
                continue;
            }
            self.log.raw(format_args!("device '{}' state {key} set to {value}", record.name));
            self.store.write_state(id, &key, value.clone())?;
            delta.insert(key, value);
        }

        if delta.is_empty() {
            return Ok(delta);
        }

        let primary = record.touches_primary(&delta);
        let summary = delta
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.log.event(format_args!("received \"{}\" update to {summary}", record.name), primary);
        self.log.dump(
            LogFlags::STATES_DEBUG,
            |k: &String, v: &StateValue| format!("device '{}' new state {k} is {v}", record.name),
            &delta,
        );

        self.settle().await;
        Ok(delta)
    }

    /// Merge the properties that differ into the device configuration
    pub async fn apply_properties(
        &self,
        id: DeviceId,
        proposed: PropertyMap,
    ) -> Result<PropertyMap, StoreError> {
        let record = self.store.device(id)?;
        let delta: PropertyMap = proposed
            .into_iter()
            .filter(|(key, value)| record.properties.get(key) != Some(value))
            .collect();

        if delta.is_empty() {
            return Ok(delta);
        }

        let mut properties = record.properties.clone();
        for (key, value) in &delta {
            self.log.raw(format_args!("device '{}' property {key} set to {value}", record.name));
            properties.insert(key.clone(), value.clone());
        }
        self.store.replace_properties(id, properties)?;
        self.log.event(
            format_args!("device \"{}\" properties updated: {}", record.name, keys_of(&delta)),
            false,
        );

        self.settle().await;
        Ok(delta)
    }

    /// Same rule for plugin-wide preferences
    pub async fn apply_plugin_prefs(&self, proposed: PropertyMap) -> PropertyMap {
        let delta: PropertyMap = proposed
            .into_iter()
            .filter(|(key, value)| self.store.plugin_pref(key).as_ref() != Some(value))
            .collect();

        if delta.is_empty() {
            return delta;
        }

        for (key, value) in &delta {
            self.log.raw(format_args!("plugin preference {key} set to {value}"));
            self.store.write_plugin_pref(key, value.clone());
        }
        self.log.event(format_args!("plugin preferences updated: {}", keys_of(&delta)), false);

        self.settle().await;
        delta
    }
}

fn keys_of(map: &serde_json::Map<String, Value>) -> String {
    map.keys().cloned().collect::<Vec<_>>().join(", ")
}
