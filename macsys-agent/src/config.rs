//! Agent configuration
//!
//! Handles:
//! - plugin preferences (log level, polling cadence, process-match policy)
//! - MQTT broker settings
//! - the device list seeding the in-memory store
//! - cross-platform storage (`dirs`), overridable with `MACSYS_AGENT_CONFIG`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::{DeviceRecord, MatchPolicy};
use crate::logging::LogSettings;

pub const CONFIG_ENV: &str = "MACSYS_AGENT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub agent: AgentInfo,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub match_policy: MatchPolicy,
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Last known disk sleep setting in minutes
    #[serde(default)]
    pub disk_sleep_minutes: i64,
    /// JSON snapshot of the device store, restored at start and written at shutdown
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInfo {
    pub agent_id: String,
    pub version: String,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            agent_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Target duration of one scheduler cycle
    pub pace_secs: f64,
    pub volume_data_secs: u64,
    pub application_data_secs: u64,
    pub application_data_first_secs: u64,
    /// Keepalive period when disk sleep is disabled
    pub keepalive_fallback_secs: u64,
    pub keepalive_floor_secs: u64,
    /// Pause after a batch of writes; `None` disables it
    pub settle_ms: Option<u64>,
    pub applescript_retries: u32,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            pace_secs: 10.0,
            volume_data_secs: 60,
            application_data_secs: 60,
            application_data_first_secs: 30,
            keepalive_fallback_secs: 600,
            keepalive_floor_secs: 30,
            settle_ms: Some(200),
            applescript_retries: 3,
        }
    }
}

impl PollingSettings {
    pub fn pace(&self) -> Duration {
        Duration::from_secs_f64(self.pace_secs.max(0.0))
    }

    pub fn settle(&self) -> Option<Duration> {
        self.settle_ms.map(Duration::from_millis)
    }

    pub fn keepalive_fallback(&self) -> Duration {
        Duration::from_secs(self.keepalive_fallback_secs)
    }

    pub fn keepalive_floor(&self) -> Duration {
        Duration::from_secs(self.keepalive_floor_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u16,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 60,
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            agent: AgentInfo::default(),
            log: LogSettings::default(),
            polling: PollingSettings::default(),
            match_policy: MatchPolicy::default(),
            mqtt: MqttConfig::default(),
            disk_sleep_minutes: 0,
            snapshot_path: None,
            devices: Vec::new(),
        }
    }
}

impl PluginConfig {
    /// Load config from `MACSYS_AGENT_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path).await
    }

    /// Load config from `path`; a missing file yields the defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: PluginConfig =
            toml::from_str(&content).with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;
        self.save_to(&path).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("macsys-agent");
        path.push("config.toml");
        Ok(path)
    }

    pub fn mqtt_client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("macsys-agent-{}", self.agent.agent_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceId, DeviceKind};
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PluginConfig::default();
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.polling.pace(), Duration::from_secs(10));
        assert_eq!(config.polling.settle(), Some(Duration::from_millis(200)));
        assert_eq!(config.match_policy.helper, "{name}(?: -.+)?");
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = PluginConfig::load_from(&dir.path().join("absent.toml")).await.unwrap();
        assert!(config.devices.is_empty());
    }

    #[tokio::test]
    async fn test_parse_devices_and_partial_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
disk_sleep_minutes = 10

[polling]
pace_secs = 5.0

[[devices]]
id = 101
name = "Safari"
kind = "application"
properties = { ApplicationID = "Safari", closeWindows = true }

[[devices]]
id = 102
name = "Backup"
kind = "volume"
enabled = false
properties = { VolumeID = "Backup", keepAwaken = true }
"#,
        )
        .await
        .unwrap();

        let config = PluginConfig::load_from(&path).await.unwrap();
        assert_eq!(config.disk_sleep_minutes, 10);
        assert_eq!(config.polling.pace_secs, 5.0);
        assert_eq!(config.polling.volume_data_secs, 60);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].id, DeviceId(101));
        assert_eq!(config.devices[1].kind, DeviceKind::Volume);
        assert!(!config.devices[1].is_active());
        assert_eq!(config.devices[0].properties["closeWindows"], true);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = PluginConfig::default();
        config.log.level = 99;
        config.save_to(&path).await.unwrap();

        let loaded = PluginConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded.log.level, 99);
        assert_eq!(loaded.agent.agent_id, config.agent.agent_id);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        assert!(toml::from_str::<PluginConfig>("polling = 3").is_err());
    }
}
