//! AppleScript invocation with error classification
//!
//! Error handling policies:
//! - `Report`: any error fails the call
//! - `Ignore(pattern)`: errors matching the pattern are warnings, the call continues
//! - `Retry(n)`: consecutive failures of the same script are counted and only the
//!   n-th one fails the call

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::{CommandRunner, RunnerError};
use crate::logging::PluginLog;

/// Lines produced by old scripting additions, never significant
fn scripting_additions_filter() -> &'static Regex {
    static FILTER: OnceLock<Regex> = OnceLock::new();
    FILTER.get_or_init(|| Regex::new(r".Library.ScriptingAdditions.").expect("static regex"))
}

/// What to do when a script writes to stderr
#[derive(Debug, Clone)]
pub enum ErrorPolicy {
    Report,
    Ignore(Regex),
    Retry(u32),
}

#[derive(Debug, Clone, Default)]
struct RetryEntry {
    failures: u32,
    last_error: String,
}

/// Consecutive-failure counters keyed by script identity (its first line)
#[derive(Debug, Clone, Default)]
pub struct RetryLedger {
    entries: Arc<Mutex<HashMap<String, RetryEntry>>>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure, returning the new consecutive count
    fn record_failure(&self, script: &str, error: &str) -> u32 {
        let mut entries = self.entries.lock();
        let entry = entries.entry(script.to_string()).or_default();
        entry.failures += 1;
        entry.last_error = error.to_string();
        entry.failures
    }

    /// Reset the counter, returning the previous count and error
    fn record_success(&self, script: &str) -> Option<(u32, String)> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(script)?;
        let previous = (entry.failures, std::mem::take(&mut entry.last_error));
        entry.failures = 0;
        Some(previous)
    }

    pub fn failures(&self, script: &str) -> u32 {
        self.entries.lock().get(script).map_or(0, |e| e.failures)
    }
}

/// AppleScript calls with the agent's logging and retry conventions
pub struct AppleScript<'a> {
    runner: &'a dyn CommandRunner,
    log: &'a PluginLog,
    retries: &'a RetryLedger,
}

impl<'a> AppleScript<'a> {
    pub fn new(runner: &'a dyn CommandRunner, log: &'a PluginLog, retries: &'a RetryLedger) -> Self {
        Self { runner, log, retries }
    }

    /// Run `script` and return its output with the trailing newline removed
    pub async fn run(&self, script: &str, policy: &ErrorPolicy) -> Result<String, RunnerError> {
        let name = script.lines().next().unwrap_or_default().trim().to_string();
        self.log.trace_pair(
            format_args!("going to call applescript {name}"),
            format_args!("going to call applescript {script}"),
        );

        let output = self.runner.run_osascript(script).await?;
        let error = self.significant_error(&name, &output.stderr);

        let stdout = match error {
            Some(error) => {
                self.handle_error(&name, error, policy)?;
                String::new()
            }
            None => {
                self.handle_success(&name, policy);
                output.stdout_text()
            }
        };

        let value = stdout.strip_suffix('\n').unwrap_or(&stdout).to_string();
        self.log.trace_pair(
            format_args!("returned from applescript {name}"),
            format_args!("returned from applescript: {value}"),
        );
        Ok(value)
    }

    fn significant_error(&self, name: &str, stderr: &str) -> Option<String> {
        let stderr = stderr.trim_end();
        if stderr.is_empty() {
            return None;
        }

        let (filtered, kept): (Vec<&str>, Vec<&str>) = stderr
            .lines()
            .partition(|line| scripting_additions_filter().is_match(line));
        if !filtered.is_empty() {
            self.log.trace_pair(
                format_args!("warning: applescript {name} error filtered as not significant"),
                format_args!(
                    "warning: applescript {name} following error filtered: {}",
                    filtered.join("\n")
                ),
            );
        }

        let kept = kept.join("\n");
        (!kept.trim().is_empty()).then_some(kept)
    }

    fn handle_error(&self, name: &str, error: String, policy: &ErrorPolicy) -> Result<(), RunnerError> {
        match policy {
            ErrorPolicy::Report => {
                self.log.error(format_args!("applescript {name} failed because {error}"));
                Err(RunnerError::AppleScript {
                    script: name.to_string(),
                    stderr: error,
                })
            }
            ErrorPolicy::Ignore(pattern) => {
                if pattern.is_match(&error) {
                    self.log.event(format_args!("warning on applescript {name} : {error}"), false);
                } else {
                    self.log.error(format_args!("applescript {name} failed because {error}"));
                }
                Ok(())
            }
            ErrorPolicy::Retry(threshold) => {
                let failures = self.retries.record_failure(name, &error);
                if failures >= *threshold {
                    self.log.error(format_args!(
                        "applescript {name} failed after {failures} retry because {error}"
                    ));
                    return Err(RunnerError::RetriesExhausted {
                        script: name.to_string(),
                        attempts: failures,
                        stderr: error,
                    });
                }
                self.log.trace(format_args!("applescript {name} failed {failures} time"));
                Ok(())
            }
        }
    }

    fn handle_success(&self, name: &str, policy: &ErrorPolicy) {
        let ErrorPolicy::Retry(threshold) = policy else {
            return;
        };
        if let Some((failures, last_error)) = self.retries.record_success(name) {
            if failures > 0 && failures < *threshold {
                self.log.event(
                    format_args!("warning on applescript {name} : {last_error}"),
                    false,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::RawOutput;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Answers osascript calls from a queue
    struct QueuedRunner {
        answers: Mutex<VecDeque<RawOutput>>,
    }

    impl QueuedRunner {
        fn new(answers: Vec<RawOutput>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for QueuedRunner {
        async fn run_shell(&self, _script: &str) -> Result<RawOutput, RunnerError> {
            Ok(RawOutput::default())
        }

        async fn run_osascript(&self, _script: &str) -> Result<RawOutput, RunnerError> {
            Ok(self.answers.lock().pop_front().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_output_trailing_newline_removed() {
        let runner = QueuedRunner::new(vec![RawOutput::from_stdout("hello\n")]);
        let (log, retries) = (PluginLog::default(), RetryLedger::new());
        let script = AppleScript::new(&runner, &log, &retries);
        assert_eq!(script.run("return \"hello\"", &ErrorPolicy::Report).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_scripting_additions_noise_is_filtered() {
        let noise = "osascript: /Library/ScriptingAdditions/Old.osax cannot be used\n";
        let runner = QueuedRunner::new(vec![RawOutput {
            stdout: b"ok\n".to_vec(),
            stderr: noise.to_string(),
            exit_code: Some(0),
        }]);
        let (log, retries) = (PluginLog::default(), RetryLedger::new());
        let script = AppleScript::new(&runner, &log, &retries);
        assert_eq!(script.run("quit", &ErrorPolicy::Report).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_report_policy_fails() {
        let runner = QueuedRunner::new(vec![RawOutput::from_stderr("execution error: boom (-1728)\n")]);
        let (log, retries) = (PluginLog::default(), RetryLedger::new());
        let script = AppleScript::new(&runner, &log, &retries);
        let err = script.run("tell application \"X\" to quit", &ErrorPolicy::Report).await.unwrap_err();
        assert!(matches!(err, RunnerError::AppleScript { .. }));
    }

    #[tokio::test]
    async fn test_ignore_policy_continues_with_empty_value() {
        let runner = QueuedRunner::new(vec![RawOutput::from_stderr("application isn't running\n")]);
        let (log, retries) = (PluginLog::default(), RetryLedger::new());
        let script = AppleScript::new(&runner, &log, &retries);
        let policy = ErrorPolicy::Ignore(Regex::new("isn't running").unwrap());
        assert_eq!(script.run("quit", &policy).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_retry_policy_escalates_at_threshold_and_resets() {
        let runner = QueuedRunner::new(vec![
            RawOutput::from_stderr("timeout\n"),
            RawOutput::from_stderr("timeout\n"),
            RawOutput::from_stdout("done\n"),
            RawOutput::from_stderr("timeout\n"),
            RawOutput::from_stderr("timeout\n"),
            RawOutput::from_stderr("timeout\n"),
        ]);
        let (log, retries) = (PluginLog::default(), RetryLedger::new());
        let script = AppleScript::new(&runner, &log, &retries);
        let policy = ErrorPolicy::Retry(3);
        let body = "tell application \"Mail\" to close every window\nend";

        assert_eq!(script.run(body, &policy).await.unwrap(), "");
        assert_eq!(script.run(body, &policy).await.unwrap(), "");
        assert_eq!(retries.failures("tell application \"Mail\" to close every window"), 2);

        assert_eq!(script.run(body, &policy).await.unwrap(), "done");
        assert_eq!(retries.failures("tell application \"Mail\" to close every window"), 0);

        assert!(script.run(body, &policy).await.is_ok());
        assert!(script.run(body, &policy).await.is_ok());
        let err = script.run(body, &policy).await.unwrap_err();
        assert!(matches!(err, RunnerError::RetriesExhausted { attempts: 3, .. }));
    }
}
