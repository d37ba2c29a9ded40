//! Per-class device probes
//!
//! A [`DeviceClass`] knows how to observe one kind of device (cheap status and
//! expensive data queries) and which OS command starts or stops it. The
//! scheduler and the dispatcher only talk to the trait.

pub mod disk;
pub mod process;
pub mod volume;

use async_trait::async_trait;
use std::fmt;

use crate::context::PluginContext;
use crate::device::{ConfigError, DeviceConfig, DeviceKind, DeviceRecord, StateMap};
use crate::execution::{ErrorPolicy, RunnerError};
use crate::store::StoreError;

pub use process::{ApplicationProbe, DaemonProbe, HelperProbe};
pub use volume::VolumeProbe;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid process pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Timer readiness sampled once at the top of a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerTicks {
    pub keepalive: bool,
    pub application_data: bool,
    pub volume_data: bool,
}

/// A single OS command chosen for a device action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsCommand {
    Shell(String),
    AppleScript(String),
}

impl OsCommand {
    pub async fn run(&self, ctx: &PluginContext) -> Result<(), RunnerError> {
        match self {
            OsCommand::Shell(script) => ctx.shell().text(script).await.map(|_| ()),
            OsCommand::AppleScript(script) => {
                ctx.applescript().run(script, &ErrorPolicy::Report).await.map(|_| ())
            }
        }
    }
}

impl fmt::Display for OsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsCommand::Shell(script) => write!(f, "shell `{script}`"),
            OsCommand::AppleScript(script) => write!(f, "applescript `{script}`"),
        }
    }
}

/// Behaviour of one device class
#[async_trait]
pub trait DeviceClass: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Credits granted when the on/off state flips
    fn transition_credit(&self) -> u32 {
        1
    }

    /// Whether the slow timer of this class elapsed this cycle
    fn data_due(&self, ticks: &TimerTicks) -> bool;

    async fn fetch_status(
        &self,
        ctx: &PluginContext,
        record: &DeviceRecord,
        ticks: &TimerTicks,
    ) -> Result<StateMap, ProbeError>;

    async fn fetch_data(&self, ctx: &PluginContext, record: &DeviceRecord) -> Result<StateMap, ProbeError>;

    /// Side action after an on/off transition was written
    async fn on_transition(
        &self,
        _ctx: &PluginContext,
        _record: &DeviceRecord,
        _delta: &StateMap,
    ) -> Result<(), ProbeError> {
        Ok(())
    }

    fn start_command(&self, record: &DeviceRecord) -> Option<OsCommand>;

    fn stop_command(&self, record: &DeviceRecord) -> Option<OsCommand>;

    fn close_windows_command(&self) -> Option<OsCommand> {
        None
    }
}

/// Build the class implementation matching a device's configuration
pub fn device_class(record: &DeviceRecord) -> Result<Box<dyn DeviceClass>, ProbeError> {
    Ok(match DeviceConfig::from_record(record)? {
        DeviceConfig::Application(config) => Box::new(ApplicationProbe::new(config)),
        DeviceConfig::Helper(config) => Box::new(HelperProbe::new(config)),
        DeviceConfig::Daemon(config) => Box::new(DaemonProbe::new(config)),
        DeviceConfig::Volume(config) => Box::new(VolumeProbe::new(config)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;

    #[test]
    fn test_class_follows_record_kind() {
        let record = DeviceRecord::new(DeviceId(1), "Backup", DeviceKind::Volume).with_property("VolumeID", "Backup");
        let class = device_class(&record).unwrap();
        assert_eq!(class.kind(), DeviceKind::Volume);
        assert_eq!(class.transition_credit(), 3);
    }

    #[test]
    fn test_unconfigured_record_fails() {
        let record = DeviceRecord::new(DeviceId(1), "Mail", DeviceKind::Application);
        assert!(matches!(device_class(&record), Err(ProbeError::Config(_))));
    }
}
