//! Applications, helpers and daemons, observed through `ps`

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use super::{DeviceClass, OsCommand, ProbeError, TimerTicks};
use crate::context::PluginContext;
use crate::device::config::{ApplicationConfig, DaemonConfig, HelperConfig};
use crate::device::states::{parse_elapsed, parse_number, ProcessData, ProcessStatus};
use crate::device::{keys, DeviceKind, DeviceRecord, StateMap, StateValue};
use crate::execution::shell::parse_fields;
use crate::execution::{ErrorPolicy, ParseRule};

const PS_STATUS: &str = "ps -awxc -opid,state,args";

fn status_rule() -> &'static ParseRule {
    static RULE: OnceLock<ParseRule> = OnceLock::new();
    RULE.get_or_init(|| ParseRule::Pattern(Regex::new(r" *([0-9]+) +(.).+$").expect("static regex")))
}

fn data_rule() -> &'static ParseRule {
    static RULE: OnceLock<ParseRule> = OnceLock::new();
    RULE.get_or_init(|| {
        ParseRule::Pattern(Regex::new(r"(.+?)  +([0-9.,]+) +([0-9.,]+) +(.+)$").expect("static regex"))
    })
}

/// Matcher for a `ps` line whose command is `pattern`, with optional
/// process serial number arguments
pub fn process_matcher(pattern: &str) -> Result<Regex, ProbeError> {
    Regex::new(&format!(" {pattern}(?: -psn[0-9_]*)*$")).map_err(|source| ProbeError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Find the first process matching `pattern` in the process table
pub async fn process_status(ctx: &PluginContext, pattern: &str) -> Result<ProcessStatus, ProbeError> {
    let matcher = process_matcher(pattern)?;
    let table = ctx.shell().text(PS_STATUS).await?;

    let Some(line) = table.lines().find(|line| matcher.is_match(line)) else {
        return Ok(ProcessStatus::off());
    };
    let fields = parse_fields(line.as_bytes(), Some(status_rule()), &[keys::PROCESS_ID, keys::PROCESS_STATUS]);
    match fields[keys::PROCESS_ID].parse::<i64>() {
        Ok(pid) => Ok(ProcessStatus::running(pid, &fields[keys::PROCESS_STATUS])),
        Err(_) => Ok(ProcessStatus::off()),
    }
}

/// Start time, CPU, memory and elapsed time of `pid`
pub async fn process_data(ctx: &PluginContext, pid: i64) -> Result<ProcessData, ProbeError> {
    if pid <= 0 {
        return Ok(ProcessData::Gone);
    }
    let script = format!("ps -wxc -olstart,pcpu,pmem,etime -p{pid} | sed 1d");
    let fields = ctx
        .shell()
        .fields(
            &script,
            data_rule(),
            &[keys::START_TIME, keys::CPU_PERCENT, keys::MEM_PERCENT, keys::ELAPSED],
        )
        .await?;

    let started = fields[keys::START_TIME].clone();
    if started.is_empty() {
        return Ok(ProcessData::Gone);
    }
    Ok(ProcessData::Running {
        started,
        cpu_percent: parse_number(&fields[keys::CPU_PERCENT]).unwrap_or(0.0),
        mem_percent: parse_number(&fields[keys::MEM_PERCENT]).unwrap_or(0.0),
        elapsed_secs: parse_elapsed(&fields[keys::ELAPSED]).unwrap_or(0),
    })
}

fn stored_pid(record: &DeviceRecord) -> i64 {
    record
        .states
        .get(keys::PROCESS_ID)
        .and_then(StateValue::as_int)
        .unwrap_or(0)
}

/// `kill <pid>`, nothing when no process is known
fn kill_command(record: &DeviceRecord) -> Option<OsCommand> {
    let pid = stored_pid(record);
    (pid > 0).then(|| OsCommand::Shell(format!("kill {pid}")))
}

pub struct ApplicationProbe {
    config: ApplicationConfig,
}

impl ApplicationProbe {
    pub fn new(config: ApplicationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeviceClass for ApplicationProbe {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Application
    }

    fn data_due(&self, ticks: &TimerTicks) -> bool {
        ticks.application_data
    }

    async fn fetch_status(
        &self,
        ctx: &PluginContext,
        _record: &DeviceRecord,
        _ticks: &TimerTicks,
    ) -> Result<StateMap, ProbeError> {
        Ok(process_status(ctx, &self.config.process_name).await?.into_states())
    }

    async fn fetch_data(&self, ctx: &PluginContext, record: &DeviceRecord) -> Result<StateMap, ProbeError> {
        Ok(process_data(ctx, stored_pid(record)).await?.into_states())
    }

    async fn on_transition(
        &self,
        ctx: &PluginContext,
        record: &DeviceRecord,
        delta: &StateMap,
    ) -> Result<(), ProbeError> {
        let became_on = delta.get(keys::ON_OFF).and_then(StateValue::as_bool) == Some(true);
        if !(self.config.close_windows && became_on) {
            return Ok(());
        }
        ctx.log.trace(format_args!("requesting device \"{}\" action closewindows", record.name));
        ctx.applescript()
            .run(&self.config.window_close_script, &ErrorPolicy::Retry(ctx.applescript_retries))
            .await?;
        Ok(())
    }

    fn start_command(&self, _record: &DeviceRecord) -> Option<OsCommand> {
        Some(OsCommand::Shell(self.config.start_command.clone()))
    }

    fn stop_command(&self, record: &DeviceRecord) -> Option<OsCommand> {
        if self.config.force_quit {
            kill_command(record)
        } else {
            Some(OsCommand::AppleScript(self.config.stop_script.clone()))
        }
    }

    fn close_windows_command(&self) -> Option<OsCommand> {
        (!self.config.window_close_script.is_empty())
            .then(|| OsCommand::AppleScript(self.config.window_close_script.clone()))
    }
}

pub struct HelperProbe {
    config: HelperConfig,
}

impl HelperProbe {
    pub fn new(config: HelperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeviceClass for HelperProbe {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Helper
    }

    fn data_due(&self, ticks: &TimerTicks) -> bool {
        ticks.application_data
    }

    async fn fetch_status(
        &self,
        ctx: &PluginContext,
        _record: &DeviceRecord,
        _ticks: &TimerTicks,
    ) -> Result<StateMap, ProbeError> {
        Ok(process_status(ctx, &self.config.process_name).await?.into_states())
    }

    async fn fetch_data(&self, ctx: &PluginContext, record: &DeviceRecord) -> Result<StateMap, ProbeError> {
        Ok(process_data(ctx, stored_pid(record)).await?.into_states())
    }

    fn start_command(&self, _record: &DeviceRecord) -> Option<OsCommand> {
        Some(OsCommand::Shell(self.config.start_command.clone()))
    }

    // helpers have no quit script unless the user wrote one
    fn stop_command(&self, record: &DeviceRecord) -> Option<OsCommand> {
        if self.config.force_quit || self.config.stop_script.is_empty() {
            kill_command(record)
        } else {
            Some(OsCommand::AppleScript(self.config.stop_script.clone()))
        }
    }
}

pub struct DaemonProbe {
    config: DaemonConfig,
}

impl DaemonProbe {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeviceClass for DaemonProbe {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Daemon
    }

    fn data_due(&self, ticks: &TimerTicks) -> bool {
        ticks.application_data
    }

    async fn fetch_status(
        &self,
        ctx: &PluginContext,
        _record: &DeviceRecord,
        _ticks: &TimerTicks,
    ) -> Result<StateMap, ProbeError> {
        Ok(process_status(ctx, &self.config.process_name).await?.into_states())
    }

    async fn fetch_data(&self, ctx: &PluginContext, record: &DeviceRecord) -> Result<StateMap, ProbeError> {
        Ok(process_data(ctx, stored_pid(record)).await?.into_states())
    }

    fn start_command(&self, _record: &DeviceRecord) -> Option<OsCommand> {
        Some(OsCommand::Shell(self.config.start_command.clone()))
    }

    fn stop_command(&self, record: &DeviceRecord) -> Option<OsCommand> {
        if self.config.force_quit || self.config.stop_command.is_empty() {
            kill_command(record)
        } else {
            Some(OsCommand::Shell(self.config.stop_command.clone()))
        }
    }
}
