//! Device upgrade contract
//!
//! Devices created by older versions may miss properties introduced later or
//! state keys the server has not been told about yet.

use crate::device::config::upgrade_defaults;
use crate::device::{DeviceId, MatchPolicy, PropertyMap};
use crate::logging::PluginLog;
use crate::store::{DeviceStore, StoreError};

/// Add the missing properties from `defaults`; returns the added keys
pub fn upgrade_properties(
    store: &dyn DeviceStore,
    id: DeviceId,
    defaults: &PropertyMap,
) -> Result<Vec<String>, StoreError> {
    let mut properties = store.device(id)?.properties;
    let mut added = Vec::new();
    for (key, value) in defaults {
        if !properties.contains_key(key) {
            properties.insert(key.clone(), value.clone());
            added.push(key.clone());
        }
    }
    if !added.is_empty() {
        store.replace_properties(id, properties)?;
    }
    Ok(added)
}

/// Report required state keys the device does not carry yet.
///
/// When some are missing the state list change is announced; values are left
/// for the next sweep to fill.
pub fn upgrade_states(
    store: &dyn DeviceStore,
    id: DeviceId,
    required: &[&str],
) -> Result<Vec<String>, StoreError> {
    let record = store.device(id)?;
    let missing: Vec<String> = required
        .iter()
        .filter(|key| !record.states.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        store.announce_state_list_changed(id)?;
    }
    Ok(missing)
}

/// Bring one device up to date before its first sweep
pub fn upgrade_device(
    store: &dyn DeviceStore,
    log: &PluginLog,
    policy: &MatchPolicy,
    id: DeviceId,
) -> Result<(), StoreError> {
    let record = store.device(id)?;
    let defaults = upgrade_defaults(record.kind, &record.properties, policy);

    let added = upgrade_properties(store, id, &defaults)?;
    if !added.is_empty() {
        log.event(
            format_args!("device \"{}\" upgraded with properties {}", record.name, added.join(", ")),
            false,
        );
    }

    let missing = upgrade_states(store, id, record.kind.required_states())?;
    if !missing.is_empty() {
        log.trace(format_args!(
            "device \"{}\" state list extended with {}",
            record.name,
            missing.join(", ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{keys, DeviceKind, DeviceRecord};
    use crate::store::{MemoryStore, StoreEvent};

    #[test]
    fn test_missing_properties_added_existing_kept() {
        let store = MemoryStore::with_devices([DeviceRecord::new(DeviceId(3), "Data", DeviceKind::Volume)
            .with_property("VolumeID", "Data")
            .with_property("forceQuit", true)]);

        let mut defaults = PropertyMap::new();
        defaults.insert("forceQuit".into(), false.into());
        defaults.insert("keepAwaken".into(), false.into());

        let added = upgrade_properties(&store, DeviceId(3), &defaults).unwrap();
        assert_eq!(added, vec!["keepAwaken".to_string()]);

        let props = store.device(DeviceId(3)).unwrap().properties;
        assert_eq!(props["forceQuit"], true);
        assert_eq!(props["keepAwaken"], false);
    }

    #[test]
    fn test_missing_states_announced_without_values() {
        let store = MemoryStore::with_devices([DeviceRecord::new(DeviceId(4), "Mail", DeviceKind::Application)
            .with_state(keys::ON_OFF, false)]);
        let mut events = store.subscribe();

        let missing = upgrade_states(&store, DeviceId(4), DeviceKind::Application.required_states()).unwrap();
        assert_eq!(missing.len(), 6);
        assert!(!missing.contains(&keys::ON_OFF.to_string()));
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::StateListChanged { device_id: DeviceId(4) }
        );
        assert_eq!(store.device(DeviceId(4)).unwrap().states.len(), 1);
    }

    #[test]
    fn test_upgrade_device_derives_application_properties() {
        let store = MemoryStore::with_devices([DeviceRecord::new(DeviceId(5), "Notes", DeviceKind::Application)
            .with_property("ApplicationID", "Notes")]);

        upgrade_device(&store, &PluginLog::default(), &MatchPolicy::default(), DeviceId(5)).unwrap();

        let props = store.device(DeviceId(5)).unwrap().properties;
        assert_eq!(props["ApplicationStartPathName"], "open /Applications/Notes.app");
        assert_eq!(props["closeWindows"], false);
    }
}
