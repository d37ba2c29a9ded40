//! Device model shared by the store, the probes and the dispatcher
//!
//! The automation server describes each device with:
//! - a loosely typed property map (configuration, edited by the user)
//! - a state map (observed values, written by this agent)
//!
//! Typed views over both live in [`config`] and [`states`].

pub mod config;
pub mod states;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use config::{
    ApplicationConfig, ConfigError, DaemonConfig, DeviceConfig, HelperConfig, MatchPolicy,
    VolumeConfig,
};

/// Host state keys, as declared in the device definitions of the automation server
pub mod keys {
    pub const ON_OFF: &str = "onOffState";
    pub const PROCESS_ID: &str = "ProcessID";
    pub const PROCESS_STATUS: &str = "PStatus";
    pub const START_TIME: &str = "LStart";
    pub const CPU_PERCENT: &str = "PCpu";
    pub const MEM_PERCENT: &str = "PMem";
    pub const ELAPSED: &str = "ETime";
    pub const VOLUME_STATUS: &str = "VStatus";
    pub const VOLUME_TYPE: &str = "VolumeType";
    pub const VOLUME_SIZE: &str = "VolumeSize";
    pub const VOLUME_DEVICE: &str = "VolumeDevice";
    pub const USED_PERCENT: &str = "pcUsed";
    pub const LAST_PING: &str = "LastPing";
}

/// Device identifier assigned by the automation server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device classes handled by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Application,
    Helper,
    Daemon,
    Volume,
}

impl DeviceKind {
    /// Process-backed classes share the `ps` probes
    pub fn is_process(self) -> bool {
        !matches!(self, DeviceKind::Volume)
    }

    /// States every device of this class must expose
    pub fn required_states(self) -> &'static [&'static str] {
        if self.is_process() {
            &[
                keys::ON_OFF,
                keys::PROCESS_ID,
                keys::PROCESS_STATUS,
                keys::START_TIME,
                keys::CPU_PERCENT,
                keys::MEM_PERCENT,
                keys::ELAPSED,
            ]
        } else {
            &[
                keys::ON_OFF,
                keys::VOLUME_STATUS,
                keys::VOLUME_TYPE,
                keys::VOLUME_SIZE,
                keys::VOLUME_DEVICE,
                keys::USED_PERCENT,
                keys::LAST_PING,
            ]
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Application => "application",
            DeviceKind::Helper => "helper",
            DeviceKind::Daemon => "daemon",
            DeviceKind::Volume => "volume",
        };
        f.write_str(name)
    }
}

/// Typed value of a device state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StateValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{b}"),
            StateValue::Int(i) => write!(f, "{i}"),
            StateValue::Float(x) => write!(f, "{x}"),
            StateValue::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Float(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

/// Observed device states, keyed by host state id
pub type StateMap = BTreeMap<String, StateValue>;

/// Device configuration properties, keyed by host property id
pub type PropertyMap = serde_json::Map<String, serde_json::Value>;

/// One device as held by the device store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub configured: bool,
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default)]
    pub states: StateMap,
    /// State shown as the device headline by the server
    #[serde(default = "default_primary_state")]
    pub primary_state: String,
}

fn default_true() -> bool {
    true
}

fn default_primary_state() -> String {
    keys::ON_OFF.to_string()
}

impl DeviceRecord {
    pub fn new(id: DeviceId, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            enabled: true,
            configured: true,
            properties: PropertyMap::new(),
            states: StateMap::new(),
            primary_state: default_primary_state(),
        }
    }

    /// Builder-style property setter, mostly used when seeding stores
    pub fn with_property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn with_state(mut self, key: &str, value: impl Into<StateValue>) -> Self {
        self.states.insert(key.to_string(), value.into());
        self
    }

    /// Current on/off state, `false` when never observed
    pub fn is_on(&self) -> bool {
        self.states
            .get(keys::ON_OFF)
            .and_then(StateValue::as_bool)
            .unwrap_or(false)
    }

    pub fn state_text(&self, key: &str) -> Option<&str> {
        self.states.get(key).and_then(StateValue::as_str)
    }

    /// Polled only when the server marks the device both configured and enabled
    pub fn is_active(&self) -> bool {
        self.enabled && self.configured
    }

    pub fn primary_state(&self) -> &str {
        &self.primary_state
    }

    /// Whether a state delta changes the headline state
    pub fn touches_primary(&self, delta: &StateMap) -> bool {
        delta.contains_key(&self.primary_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_value_untagged_roundtrip() {
        let states: StateMap = serde_json::from_str(
            r#"{"onOffState": true, "ProcessID": 42, "PCpu": 1.5, "PStatus": "running"}"#,
        )
        .unwrap();
        assert_eq!(states["onOffState"], StateValue::Bool(true));
        assert_eq!(states["ProcessID"], StateValue::Int(42));
        assert_eq!(states["PCpu"], StateValue::Float(1.5));
        assert_eq!(states["PStatus"], StateValue::Text("running".into()));
    }

    #[test]
    fn test_record_defaults() {
        let record: DeviceRecord =
            serde_json::from_str(r#"{"id": 7, "name": "Safari", "kind": "application"}"#).unwrap();
        assert!(record.is_active());
        assert!(!record.is_on());
        assert_eq!(record.primary_state(), keys::ON_OFF);
    }

    #[test]
    fn test_primary_state_per_device() {
        let record: DeviceRecord = serde_json::from_str(
            r#"{"id": 2, "name": "Backup", "kind": "volume", "primary_state": "VStatus"}"#,
        )
        .unwrap();
        assert_eq!(record.primary_state(), keys::VOLUME_STATUS);

        let mut delta = StateMap::new();
        delta.insert(keys::ON_OFF.to_string(), StateValue::Bool(true));
        assert!(!record.touches_primary(&delta));
        delta.insert(keys::VOLUME_STATUS.to_string(), StateValue::from("on"));
        assert!(record.touches_primary(&delta));
    }

    #[test]
    fn test_required_states_by_class() {
        assert!(DeviceKind::Daemon.required_states().contains(&keys::ELAPSED));
        assert!(DeviceKind::Volume.required_states().contains(&keys::LAST_PING));
        assert!(!DeviceKind::Volume.required_states().contains(&keys::PROCESS_ID));
    }
}
