//! Shell script invocation and output parsing

use regex::Regex;
use std::collections::BTreeMap;

use super::{CommandRunner, RunnerError};
use crate::logging::PluginLog;

/// Named fields extracted from a command output
pub type FieldMap = BTreeMap<String, String>;

/// Fixed-width byte range of a column, `end = None` meaning "to the end"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub start: usize,
    pub end: Option<usize>,
}

impl Column {
    pub const fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub const fn from(start: usize) -> Self {
        Self { start, end: None }
    }
}

/// How to split a command output into fields
#[derive(Debug, Clone)]
pub enum ParseRule {
    /// Split on a fixed string
    Delimiter(String),
    /// Cut fixed-width columns
    Columns(Vec<Column>),
    /// First line matching the pattern at its start; one capture group per field
    Pattern(Regex),
}

/// Result of a shell call, depending on whether field names were given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Text(String),
    Fields(FieldMap),
}

/// Split `stdout` into the requested fields.
///
/// Never fails: anything missing or unparseable becomes an empty string so
/// callers always see the same map shape.
pub fn parse_fields(stdout: &[u8], rule: Option<&ParseRule>, keys: &[&str]) -> FieldMap {
    let mut fields: FieldMap = keys.iter().map(|k| (k.to_string(), String::new())).collect();
    let text = String::from_utf8_lossy(stdout);

    match rule {
        None => {
            if let Some(first) = keys.first() {
                fields.insert(first.to_string(), text.trim().to_string());
            }
        }
        Some(ParseRule::Delimiter(delimiter)) => {
            for (key, value) in keys.iter().zip(text.split(delimiter.as_str())) {
                fields.insert(key.to_string(), value.trim().to_string());
            }
        }
        Some(ParseRule::Columns(columns)) => {
            for (key, column) in keys.iter().zip(columns) {
                let end = column.end.unwrap_or(stdout.len()).min(stdout.len());
                let start = column.start.min(end);
                let value = String::from_utf8_lossy(&stdout[start..end]);
                fields.insert(key.to_string(), value.trim().to_string());
            }
        }
        Some(ParseRule::Pattern(pattern)) => {
            let captures = text.lines().find_map(|line| {
                pattern
                    .captures(line)
                    .filter(|caps| caps.get(0).is_some_and(|m| m.start() == 0))
            });
            if let Some(caps) = captures {
                for (key, group) in keys.iter().zip(caps.iter().skip(1)) {
                    let value = group.map(|m| m.as_str().trim()).unwrap_or_default();
                    fields.insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    fields
}

/// Shell calls with the agent's logging and failure conventions
pub struct ShellScript<'a> {
    runner: &'a dyn CommandRunner,
    log: &'a PluginLog,
}

impl<'a> ShellScript<'a> {
    pub fn new(runner: &'a dyn CommandRunner, log: &'a PluginLog) -> Self {
        Self { runner, log }
    }

    /// Run `script` and parse its output.
    ///
    /// Without keys the trimmed text is returned. Any stderr output is a failure.
    pub async fn run(
        &self,
        script: &str,
        rule: Option<&ParseRule>,
        keys: &[&str],
    ) -> Result<CommandOutput, RunnerError> {
        let short = script.split('|').next().unwrap_or(script).trim();
        self.log.trace_pair(
            format_args!("going to call shell {short}..."),
            format_args!("going to call shell {script}"),
        );

        let output = self.runner.run_shell(script).await?;
        if !output.stderr.trim().is_empty() {
            let stderr = output.stderr.trim().to_string();
            self.log.error(format_args!("shell script failed because {stderr}"));
            return Err(RunnerError::Shell {
                script: short.to_string(),
                stderr,
            });
        }

        let result = if keys.is_empty() {
            CommandOutput::Text(output.stdout_text().trim().to_string())
        } else {
            CommandOutput::Fields(parse_fields(&output.stdout, rule, keys))
        };

        self.log.trace_pair(
            format_args!("returned from shell {short}..."),
            format_args!("returned from shell: {result:?}"),
        );
        Ok(result)
    }

    pub async fn text(&self, script: &str) -> Result<String, RunnerError> {
        match self.run(script, None, &[]).await? {
            CommandOutput::Text(text) => Ok(text),
            CommandOutput::Fields(_) => Ok(String::new()),
        }
    }

    pub async fn fields(
        &self,
        script: &str,
        rule: &ParseRule,
        keys: &[&str],
    ) -> Result<FieldMap, RunnerError> {
        match self.run(script, Some(rule), keys).await? {
            CommandOutput::Fields(fields) => Ok(fields),
            CommandOutput::Text(_) => Ok(parse_fields(&[], Some(rule), keys)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rule_uses_first_key() {
        let fields = parse_fields(b"  42\n", None, &["Value", "Other"]);
        assert_eq!(fields["Value"], "42");
        assert_eq!(fields["Other"], "");
    }

    #[test]
    fn test_delimiter_fills_missing_fields() {
        let rule = ParseRule::Delimiter("||".into());
        let fields = parse_fields(b"a || b", Some(&rule), &["A", "B", "C"]);
        assert_eq!(fields["A"], "a");
        assert_eq!(fields["B"], "b");
        assert_eq!(fields["C"], "");
    }

    #[test]
    fn test_columns_cut_bytes() {
        let rule = ParseRule::Columns(vec![Column::new(0, 4), Column::new(5, 9), Column::from(10)]);
        let fields = parse_fields(b"abcd efgh tail end\n", Some(&rule), &["X", "Y", "Z"]);
        assert_eq!(fields["X"], "abcd");
        assert_eq!(fields["Y"], "efgh");
        assert_eq!(fields["Z"], "tail end");
    }

    #[test]
    fn test_columns_beyond_output_are_empty() {
        let rule = ParseRule::Columns(vec![Column::new(0, 3), Column::new(50, 60)]);
        let fields = parse_fields(b"ab", Some(&rule), &["X", "Y"]);
        assert_eq!(fields["X"], "ab");
        assert_eq!(fields["Y"], "");
    }

    #[test]
    fn test_pattern_anchors_at_line_start() {
        let rule = ParseRule::Pattern(Regex::new(r" *([0-9]+) +(.).+$").unwrap());
        let fields = parse_fields(b"  812 S    Safari\n", Some(&rule), &["ProcessID", "PStatus"]);
        assert_eq!(fields["ProcessID"], "812");
        assert_eq!(fields["PStatus"], "S");
    }

    #[test]
    fn test_pattern_mismatch_gives_empty_fields() {
        let rule = ParseRule::Pattern(Regex::new(r"([0-9]+) ([0-9]+)").unwrap());
        let fields = parse_fields(b"no numbers here", Some(&rule), &["A", "B"]);
        assert_eq!(fields["A"], "");
        assert_eq!(fields["B"], "");
    }
}
