//! macOS System agent
//!
//! Polls processes and volumes, mirrors their state into a device store and
//! turns inbound on/off actions into shell commands or AppleScripts:
//! - [`scheduler`]: timers, sweeps and the update ledger
//! - [`probe`]: per-class observation and commands
//! - [`dispatcher`]: inbound actions
//! - [`bridge`]: MQTT link to the automation server

pub mod bridge;
pub mod config;
pub mod context;
pub mod device;
pub mod dispatcher;
pub mod execution;
pub mod ledger;
pub mod logging;
pub mod probe;
pub mod scheduler;
pub mod store;
pub mod timer;
pub mod upgrade;
pub mod writer;

pub use context::PluginContext;
pub use device::{DeviceId, DeviceKind, DeviceRecord, StateValue};
pub use dispatcher::{DeviceAction, DispatchOutcome, Dispatcher};
pub use scheduler::Scheduler;
pub use store::{DeviceStore, MemoryStore};
