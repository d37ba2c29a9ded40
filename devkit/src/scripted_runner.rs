/*!
Scripted command runner

Answers shell and AppleScript calls from rules registered by the test. The
most recently registered matching rule wins, so a test can change the
"operating system" between two sweeps. Every call is recorded.
*/

use async_trait::async_trait;
use macsys_agent::execution::{CommandRunner, RawOutput, RunnerError};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Shell,
    AppleScript,
}

#[derive(Debug, Clone)]
struct Rule {
    channel: Channel,
    needle: String,
    output: RawOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub channel: Channel,
    pub script: String,
}

#[derive(Clone, Default)]
pub struct ScriptedRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, channel: Channel, needle: &str, output: RawOutput) -> &Self {
        self.rules.lock().push(Rule {
            channel,
            needle: needle.to_string(),
            output,
        });
        self
    }

    /// Shell scripts containing `needle` print `stdout`
    pub fn on_shell(&self, needle: &str, stdout: &str) -> &Self {
        self.push(Channel::Shell, needle, RawOutput::from_stdout(stdout))
    }

    /// Shell scripts containing `needle` fail with `stderr`
    pub fn on_shell_error(&self, needle: &str, stderr: &str) -> &Self {
        self.push(Channel::Shell, needle, RawOutput::from_stderr(stderr))
    }

    pub fn on_osascript(&self, needle: &str, stdout: &str) -> &Self {
        self.push(Channel::AppleScript, needle, RawOutput::from_stdout(stdout))
    }

    pub fn on_osascript_error(&self, needle: &str, stderr: &str) -> &Self {
        self.push(Channel::AppleScript, needle, RawOutput::from_stderr(stderr))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn scripts(&self, channel: Channel) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.channel == channel)
            .map(|call| call.script.clone())
            .collect()
    }

    /// Number of recorded calls whose script contains `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.script.contains(needle)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn answer(&self, channel: Channel, script: &str) -> RawOutput {
        self.calls.lock().push(RecordedCall {
            channel,
            script: script.to_string(),
        });
        self.rules
            .lock()
            .iter()
            .rev()
            .find(|rule| rule.channel == channel && script.contains(&rule.needle))
            .map(|rule| rule.output.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run_shell(&self, script: &str) -> Result<RawOutput, RunnerError> {
        Ok(self.answer(Channel::Shell, script))
    }

    async fn run_osascript(&self, script: &str) -> Result<RawOutput, RunnerError> {
        Ok(self.answer(Channel::AppleScript, script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_rule_wins() {
        let runner = ScriptedRunner::new();
        runner.on_shell("ps -awxc", "old\n");
        runner.on_shell("ps -awxc", "new\n");

        let output = runner.run_shell("ps -awxc -opid,state,args").await.unwrap();
        assert_eq!(output.stdout_text(), "new\n");
    }

    #[tokio::test]
    async fn test_unmatched_call_is_silent_and_recorded() {
        let runner = ScriptedRunner::new();
        let output = runner.run_osascript("tell application \"Mail\" to quit").await.unwrap();
        assert!(output.stdout.is_empty());
        assert!(output.stderr.is_empty());
        assert_eq!(runner.scripts(Channel::AppleScript).len(), 1);
        assert_eq!(runner.count("Mail"), 1);
    }
}
