//! Volumes, observed through `/Volumes`, `diskutil` and `df`

use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use std::sync::OnceLock;

use super::{DeviceClass, OsCommand, ProbeError, TimerTicks};
use crate::context::PluginContext;
use crate::device::config::VolumeConfig;
use crate::device::states::{VolumeData, VolumeStatus};
use crate::device::{keys, DeviceKind, DeviceRecord, StateMap};
use crate::execution::{Column, ParseRule};

fn diskutil_rule() -> ParseRule {
    ParseRule::Columns(vec![Column::new(6, 32), Column::new(57, 67), Column::from(68)])
}

fn df_rule() -> &'static ParseRule {
    static RULE: OnceLock<ParseRule> = OnceLock::new();
    RULE.get_or_init(|| ParseRule::Pattern(Regex::new(r".+? [0-9]+ +([0-9]+) +([0-9]+) .+").expect("static regex")))
}

/// Used share of a volume in percent
pub fn used_percent(used: u64, available: u64) -> f64 {
    let total = used + available;
    if total == 0 {
        return 0.0;
    }
    used as f64 * 100.0 / total as f64
}

pub struct VolumeProbe {
    config: VolumeConfig,
}

impl VolumeProbe {
    pub fn new(config: VolumeConfig) -> Self {
        Self { config }
    }

    fn quoted_id(&self) -> String {
        shell_words::quote(&self.config.volume_id).into_owned()
    }

    pub async fn volume_status(&self, ctx: &PluginContext) -> Result<VolumeStatus, ProbeError> {
        let script = format!("ls -1 /Volumes | grep ^{}$", self.quoted_id());
        let listing = ctx.shell().text(&script).await?;
        Ok(VolumeStatus {
            mounted: !listing.is_empty(),
        })
    }

    pub async fn volume_data(&self, ctx: &PluginContext) -> Result<VolumeData, ProbeError> {
        let shell = ctx.shell();
        let script = format!("/usr/sbin/diskutil list | grep {}", self.quoted_id());
        let listing = shell
            .fields(
                &script,
                &diskutil_rule(),
                &[keys::VOLUME_TYPE, keys::VOLUME_SIZE, keys::VOLUME_DEVICE],
            )
            .await?;

        let device = listing[keys::VOLUME_DEVICE].clone();
        if device.is_empty() {
            return Ok(VolumeData::Missing);
        }
        let volume_type = listing[keys::VOLUME_TYPE].clone();
        let size = listing[keys::VOLUME_SIZE].clone();

        let script = format!("/bin/df | grep {}", shell_words::quote(&device));
        let usage = shell.fields(&script, df_rule(), &["Used", "Available"]).await?;
        let used = usage["Used"].parse::<u64>();
        let available = usage["Available"].parse::<u64>();

        Ok(match (used, available) {
            (Ok(used), Ok(available)) => VolumeData::Mounted {
                volume_type,
                size,
                device,
                used_percent: used_percent(used, available),
            },
            _ => VolumeData::Unmounted {
                volume_type,
                size,
                device,
            },
        })
    }

    /// Touch the sentinel file that keeps the disk spinning
    async fn spin(&self, ctx: &PluginContext, record: &DeviceRecord) -> Result<Option<String>, ProbeError> {
        if record.state_text(keys::VOLUME_STATUS) != Some("on") || !self.config.keep_awaken {
            return Ok(None);
        }
        let script = format!("touch /Volumes/{}/.spinner", self.quoted_id());
        ctx.shell().text(&script).await?;
        Ok(Some(Local::now().format("%c").to_string()))
    }
}

#[async_trait]
impl DeviceClass for VolumeProbe {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Volume
    }

    // mount state flaps more than process state
    fn transition_credit(&self) -> u32 {
        3
    }

    fn data_due(&self, ticks: &TimerTicks) -> bool {
        ticks.volume_data
    }

    async fn fetch_status(
        &self,
        ctx: &PluginContext,
        record: &DeviceRecord,
        ticks: &TimerTicks,
    ) -> Result<StateMap, ProbeError> {
        let mut states = self.volume_status(ctx).await?.into_states();
        if ticks.keepalive {
            match self.spin(ctx, record).await {
                Ok(Some(ping)) => {
                    states.insert(keys::LAST_PING.into(), ping.into());
                }
                Ok(None) => {}
                Err(err) => ctx.log.error(format_args!("keepalive of \"{}\" failed: {err}", record.name)),
            }
        }
        Ok(states)
    }

    async fn fetch_data(&self, ctx: &PluginContext, _record: &DeviceRecord) -> Result<StateMap, ProbeError> {
        Ok(self.volume_data(ctx).await?.into_states())
    }

    fn start_command(&self, record: &DeviceRecord) -> Option<OsCommand> {
        let device = record.state_text(keys::VOLUME_DEVICE).filter(|d| !d.is_empty())?;
        (record.state_text(keys::VOLUME_STATUS) == Some("notmounted"))
            .then(|| OsCommand::Shell(format!("/usr/sbin/diskutil mount {}", shell_words::quote(device))))
    }

    fn stop_command(&self, record: &DeviceRecord) -> Option<OsCommand> {
        let device = record.state_text(keys::VOLUME_DEVICE).filter(|d| !d.is_empty())?;
        let force = if self.config.force_quit { "force " } else { "" };
        Some(OsCommand::Shell(format!(
            "/usr/sbin/diskutil umount {force}{}",
            shell_words::quote(device)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::execution::shell::parse_fields;

    fn probe(force_quit: bool) -> VolumeProbe {
        VolumeProbe::new(VolumeConfig {
            volume_id: "Backup".into(),
            keep_awaken: true,
            force_quit,
        })
    }

    fn record(status: &str) -> DeviceRecord {
        DeviceRecord::new(DeviceId(2), "Backup", DeviceKind::Volume)
            .with_state(keys::VOLUME_STATUS, status)
            .with_state(keys::VOLUME_DEVICE, "disk2s1")
    }

    #[test]
    fn test_used_percent() {
        assert_eq!(used_percent(25, 75), 25.0);
        assert_eq!(used_percent(0, 0), 0.0);
    }

    #[test]
    fn test_df_line_parsing() {
        let line = b"/dev/disk2s1   976101344 244025336 732076008    25%  1234 4294967 0%   /Volumes/Backup\n";
        let fields = parse_fields(line, Some(df_rule()), &["Used", "Available"]);
        assert_eq!(fields["Used"], "244025336");
        assert_eq!(fields["Available"], "732076008");
    }

    #[test]
    fn test_diskutil_columns() {
        let line = b"   2:                  Apple_HFS Backup                  500.1 GB   disk2s2\n";
        let fields = parse_fields(
            line,
            Some(&diskutil_rule()),
            &[keys::VOLUME_TYPE, keys::VOLUME_SIZE, keys::VOLUME_DEVICE],
        );
        assert_eq!(fields[keys::VOLUME_TYPE], "Apple_HFS");
        assert_eq!(fields[keys::VOLUME_SIZE], "500.1 GB");
        assert_eq!(fields[keys::VOLUME_DEVICE], "disk2s2");
    }

    #[test]
    fn test_mount_only_when_not_mounted() {
        assert_eq!(
            probe(false).start_command(&record("notmounted")),
            Some(OsCommand::Shell("/usr/sbin/diskutil mount disk2s1".into()))
        );
        assert_eq!(probe(false).start_command(&record("off")), None);
    }

    #[test]
    fn test_unmount_force_flag() {
        assert_eq!(
            probe(true).stop_command(&record("on")),
            Some(OsCommand::Shell("/usr/sbin/diskutil umount force disk2s1".into()))
        );
        assert_eq!(
            probe(false).stop_command(&record("on")),
            Some(OsCommand::Shell("/usr/sbin/diskutil umount disk2s1".into()))
        );
    }
}
