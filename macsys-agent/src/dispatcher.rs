//! Inbound device actions
//!
//! An action becomes at most one OS command. The dispatcher never writes
//! device state: the next sweep observes the result.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::PluginContext;
use crate::device::DeviceId;
use crate::probe::{device_class, OsCommand, ProbeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAction {
    Toggle,
    TurnOn,
    TurnOff,
    RequestStatus,
    CloseWindows,
}

impl DeviceAction {
    /// Resolve a toggle against the current on/off state
    pub fn resolve(self, is_on: bool) -> Self {
        match self {
            DeviceAction::Toggle if is_on => DeviceAction::TurnOff,
            DeviceAction::Toggle => DeviceAction::TurnOn,
            other => other,
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceAction::Toggle => "Toggle",
            DeviceAction::TurnOn => "TurnOn",
            DeviceAction::TurnOff => "TurnOff",
            DeviceAction::RequestStatus => "RequestStatus",
            DeviceAction::CloseWindows => "CloseWindows",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Device already in the requested state
    AlreadyInState,
    StatusRequested,
    /// The device class had no command for this action
    NothingToRun,
    Executed(OsCommand),
}

#[derive(Clone)]
pub struct Dispatcher {
    ctx: PluginContext,
}

impl Dispatcher {
    pub fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, id: DeviceId, action: DeviceAction) -> Result<DispatchOutcome, ProbeError> {
        let ctx = &self.ctx;
        let record = ctx.store.device(id)?;
        ctx.log.trace(format_args!("requesting device \"{}\" action {action}", record.name));

        let is_on = record.is_on();
        let action = action.resolve(is_on);
        match action {
            DeviceAction::TurnOn if is_on => {
                ctx.log.event(format_args!("device \"{}\" is already on", record.name), true);
                return Ok(DispatchOutcome::AlreadyInState);
            }
            DeviceAction::TurnOff if !is_on => {
                ctx.log.event(format_args!("device \"{}\" is already off", record.name), true);
                return Ok(DispatchOutcome::AlreadyInState);
            }
            DeviceAction::RequestStatus => {
                ctx.ledger.credit(id, 1);
                return Ok(DispatchOutcome::StatusRequested);
            }
            _ => {}
        }

        let class = device_class(&record)?;
        let command = match action {
            DeviceAction::TurnOn => class.start_command(&record),
            DeviceAction::TurnOff => class.stop_command(&record),
            DeviceAction::CloseWindows => class.close_windows_command(),
            DeviceAction::Toggle | DeviceAction::RequestStatus => None,
        };
        let Some(command) = command else {
            ctx.log.trace(format_args!("device \"{}\" has nothing to run for {action}", record.name));
            return Ok(DispatchOutcome::NothingToRun);
        };

        ctx.log.event(format_args!("sent device \"{}\" action {action}", record.name), true);
        command.run(ctx).await?;
        Ok(DispatchOutcome::Executed(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_resolution() {
        assert_eq!(DeviceAction::Toggle.resolve(true), DeviceAction::TurnOff);
        assert_eq!(DeviceAction::Toggle.resolve(false), DeviceAction::TurnOn);
        assert_eq!(DeviceAction::TurnOn.resolve(true), DeviceAction::TurnOn);
    }

    #[test]
    fn test_action_wire_names() {
        let action: DeviceAction = serde_json::from_str("\"request_status\"").unwrap();
        assert_eq!(action, DeviceAction::RequestStatus);
        assert_eq!(serde_json::to_string(&DeviceAction::CloseWindows).unwrap(), "\"close_windows\"");
    }
}
