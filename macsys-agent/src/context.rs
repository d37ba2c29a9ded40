//! Everything the scheduler and the dispatcher share

use std::sync::Arc;
use std::time::Duration;

use crate::device::MatchPolicy;
use crate::execution::{AppleScript, CommandRunner, RetryLedger, ShellScript};
use crate::ledger::UpdateLedger;
use crate::logging::PluginLog;
use crate::store::DeviceStore;
use crate::writer::DebouncedWriter;

/// Explicit plugin state, passed by reference to every component
#[derive(Clone)]
pub struct PluginContext {
    pub store: Arc<dyn DeviceStore>,
    pub runner: Arc<dyn CommandRunner>,
    pub ledger: UpdateLedger,
    pub log: PluginLog,
    pub writer: DebouncedWriter,
    pub retries: RetryLedger,
    pub policy: MatchPolicy,
    /// Failures tolerated before a retried AppleScript escalates
    pub applescript_retries: u32,
}

impl PluginContext {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        runner: Arc<dyn CommandRunner>,
        log: PluginLog,
        settle: Option<Duration>,
    ) -> Self {
        let writer = DebouncedWriter::new(Arc::clone(&store), log.clone(), settle);
        Self {
            store,
            runner,
            ledger: UpdateLedger::new(),
            log,
            writer,
            retries: RetryLedger::new(),
            policy: MatchPolicy::default(),
            applescript_retries: 3,
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_applescript_retries(mut self, retries: u32) -> Self {
        self.applescript_retries = retries;
        self
    }

    pub fn shell(&self) -> ShellScript<'_> {
        ShellScript::new(self.runner.as_ref(), &self.log)
    }

    pub fn applescript(&self) -> AppleScript<'_> {
        AppleScript::new(self.runner.as_ref(), &self.log, &self.retries)
    }
}
