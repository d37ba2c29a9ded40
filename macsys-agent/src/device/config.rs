//! Typed device configuration
//!
//! Handles:
//! - parsing the server's property map into one record per device class
//! - deriving commands and process patterns from the user-facing properties
//! - default values used when upgrading devices created by older versions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DeviceKind, DeviceRecord, PropertyMap};

/// Errors raised while reading a device configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("device {name} has an invalid {kind} configuration: {source}")]
    Invalid {
        name: String,
        kind: DeviceKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid process pattern for device {name}: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Process-name regex templates, one per process class.
///
/// `{name}` receives the escaped application id and `{args}` the escaped daemon
/// start argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    pub application: String,
    pub helper: String,
    pub daemon: String,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            application: "{name}".to_string(),
            helper: "{name}(?: -.+)?".to_string(),
            daemon: "{name} +{args}".to_string(),
        }
    }
}

impl MatchPolicy {
    pub fn process_name(&self, kind: DeviceKind, name: &str, args: &str) -> String {
        let template = match kind {
            DeviceKind::Application | DeviceKind::Volume => &self.application,
            DeviceKind::Helper => &self.helper,
            DeviceKind::Daemon => &self.daemon,
        };
        template
            .replace("{name}", &regex::escape(name))
            .replace("{args}", &regex::escape(args))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    #[serde(rename = "ApplicationProcessName")]
    pub process_name: String,
    #[serde(rename = "ApplicationStartPathName")]
    pub start_command: String,
    #[serde(rename = "ApplicationStopPathName")]
    pub stop_script: String,
    #[serde(rename = "windowcloseScript", default)]
    pub window_close_script: String,
    #[serde(rename = "closeWindows", default)]
    pub close_windows: bool,
    #[serde(rename = "forceQuit", default)]
    pub force_quit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelperConfig {
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    #[serde(rename = "ApplicationProcessName")]
    pub process_name: String,
    #[serde(rename = "ApplicationStartPathName")]
    pub start_command: String,
    #[serde(rename = "ApplicationStopPathName", default)]
    pub stop_script: String,
    #[serde(rename = "forceQuit", default)]
    pub force_quit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(rename = "ApplicationID")]
    pub application_id: String,
    #[serde(rename = "ApplicationProcessName")]
    pub process_name: String,
    #[serde(rename = "ApplicationStartPathName")]
    pub start_command: String,
    #[serde(rename = "ApplicationStopPathName", default)]
    pub stop_command: String,
    #[serde(rename = "forceQuit", default)]
    pub force_quit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeConfig {
    #[serde(rename = "VolumeID")]
    pub volume_id: String,
    #[serde(rename = "keepAwaken", default)]
    pub keep_awaken: bool,
    #[serde(rename = "forceQuit", default)]
    pub force_quit: bool,
}

/// Configuration of a device, one variant per class
#[derive(Debug, Clone)]
pub enum DeviceConfig {
    Application(ApplicationConfig),
    Helper(HelperConfig),
    Daemon(DaemonConfig),
    Volume(VolumeConfig),
}

impl DeviceConfig {
    pub fn from_record(record: &DeviceRecord) -> Result<Self, ConfigError> {
        let value = Value::Object(record.properties.clone());
        let parsed = match record.kind {
            DeviceKind::Application => serde_json::from_value(value).map(DeviceConfig::Application),
            DeviceKind::Helper => serde_json::from_value(value).map(DeviceConfig::Helper),
            DeviceKind::Daemon => serde_json::from_value(value).map(DeviceConfig::Daemon),
            DeviceKind::Volume => serde_json::from_value(value).map(DeviceConfig::Volume),
        };
        parsed.map_err(|source| ConfigError::Invalid {
            name: record.name.clone(),
            kind: record.kind,
            source,
        })
    }
}

/// Quote a value as an AppleScript string literal
pub fn applescript_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn text<'a>(props: &'a PropertyMap, key: &str) -> &'a str {
    props.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn flag(props: &PropertyMap, key: &str) -> bool {
    props.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn set(props: &mut PropertyMap, key: &str, value: impl Into<Value>) {
    props.insert(key.to_string(), value.into());
}

/// Derive the command and pattern properties from the user-facing ones.
///
/// Same rules the device configuration dialog applies when a device is saved.
pub fn normalize_properties(kind: DeviceKind, props: &mut PropertyMap, policy: &MatchPolicy) {
    match kind {
        DeviceKind::Application | DeviceKind::Helper => {
            let mut app_id = text(props, "ApplicationID").to_string();
            if let Some(stripped) = app_id.strip_suffix(".app") {
                app_id = stripped.to_string();
            }
            set(props, "ApplicationID", app_id.clone());

            if !flag(props, "nameSpecial") {
                set(props, "directoryPath", "/Applications");
            }
            let directory = text(props, "directoryPath").trim_end_matches('/').to_string();
            set(props, "directoryPath", directory.clone());

            let path = format!("{directory}/{app_id}.app");
            set(props, "ApplicationStartPathName", format!("open {}", shell_words::quote(&path)));
            set(props, "ApplicationPathName", path);

            if kind == DeviceKind::Application {
                let target = applescript_string(&app_id);
                set(props, "ApplicationStopPathName", format!("tell application {target} to quit"));
                if !flag(props, "processSpecial") {
                    set(props, "ApplicationProcessName", policy.process_name(kind, &app_id, ""));
                }
                if !flag(props, "windowcloseSpecial") {
                    set(
                        props,
                        "windowcloseScript",
                        format!("tell application {target} to close every window"),
                    );
                }
            } else {
                set(props, "ApplicationProcessName", policy.process_name(kind, &app_id, ""));
            }
        }
        DeviceKind::Daemon => {
            let app_id = text(props, "ApplicationID").to_string();
            let path = text(props, "ApplicationPathName").to_string();
            let start_arg = text(props, "ApplicationStartArgument").trim().to_string();
            let stop_arg = text(props, "ApplicationStopArgument").trim().to_string();

            set(props, "ApplicationProcessName", policy.process_name(kind, &app_id, &start_arg));
            set(props, "ApplicationStartPathName", join_command(&path, &start_arg));

            if stop_arg.is_empty() {
                set(props, "forceQuit", true);
                set(props, "ApplicationStopPathName", "");
            } else {
                set(props, "forceQuit", false);
                set(props, "ApplicationStopPathName", join_command(&path, &stop_arg));
            }
        }
        DeviceKind::Volume => {
            let volume = text(props, "VolumeID").trim_end_matches('/').to_string();
            set(props, "VolumeID", volume);
        }
    }
}

fn join_command(path: &str, args: &str) -> String {
    let quoted = shell_words::quote(path);
    if args.is_empty() {
        quoted.into_owned()
    } else {
        format!("{quoted} {args}")
    }
}

/// Properties a device must carry, with the values to use when absent
pub fn upgrade_defaults(kind: DeviceKind, props: &PropertyMap, policy: &MatchPolicy) -> PropertyMap {
    let mut defaults = PropertyMap::new();
    set(&mut defaults, "forceQuit", false);
    match kind {
        DeviceKind::Application => {
            set(&mut defaults, "closeWindows", false);
            set(&mut defaults, "processSpecial", false);
            set(&mut defaults, "windowcloseSpecial", false);
        }
        DeviceKind::Volume => {
            set(&mut defaults, "keepAwaken", false);
        }
        DeviceKind::Helper | DeviceKind::Daemon => {}
    }

    let mut derived = props.clone();
    for (key, value) in &defaults {
        derived.entry(key.clone()).or_insert_with(|| value.clone());
    }
    normalize_properties(kind, &mut derived, policy);
    for (key, value) in derived {
        defaults.entry(key).or_insert(value);
    }
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use serde_json::json;

    fn props(value: Value) -> PropertyMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_application_derivation() {
        let mut p = props(json!({"ApplicationID": "Safari.app"}));
        normalize_properties(DeviceKind::Application, &mut p, &MatchPolicy::default());

        assert_eq!(p["ApplicationID"], "Safari");
        assert_eq!(p["ApplicationPathName"], "/Applications/Safari.app");
        assert_eq!(p["ApplicationStartPathName"], "open /Applications/Safari.app");
        assert_eq!(p["ApplicationStopPathName"], "tell application \"Safari\" to quit");
        assert_eq!(p["ApplicationProcessName"], "Safari");
        assert_eq!(p["windowcloseScript"], "tell application \"Safari\" to close every window");
    }

    #[test]
    fn test_application_custom_directory_and_quoting() {
        let mut p = props(json!({
            "ApplicationID": "My App",
            "nameSpecial": true,
            "directoryPath": "/Users/me/Apps/",
            "processSpecial": true,
            "ApplicationProcessName": "MyAppHelper"
        }));
        normalize_properties(DeviceKind::Application, &mut p, &MatchPolicy::default());

        assert_eq!(p["ApplicationStartPathName"], "open '/Users/me/Apps/My App.app'");
        assert_eq!(p["ApplicationProcessName"], "MyAppHelper");
    }

    #[test]
    fn test_helper_uses_optional_arguments_pattern() {
        let mut p = props(json!({"ApplicationID": "Dropbox"}));
        normalize_properties(DeviceKind::Helper, &mut p, &MatchPolicy::default());
        assert_eq!(p["ApplicationProcessName"], "Dropbox(?: -.+)?");
    }

    #[test]
    fn test_daemon_without_stop_argument_forces_kill() {
        let mut p = props(json!({
            "ApplicationID": "mongod",
            "ApplicationPathName": "/usr/local/bin/mongod",
            "ApplicationStartArgument": "--fork",
            "ApplicationStopArgument": ""
        }));
        normalize_properties(DeviceKind::Daemon, &mut p, &MatchPolicy::default());

        assert_eq!(p["ApplicationProcessName"], "mongod +\\-\\-fork");
        assert_eq!(p["ApplicationStartPathName"], "/usr/local/bin/mongod --fork");
        assert_eq!(p["forceQuit"], true);
    }

    #[test]
    fn test_daemon_with_stop_argument() {
        let mut p = props(json!({
            "ApplicationID": "httpd",
            "ApplicationPathName": "/usr/sbin/apachectl",
            "ApplicationStartArgument": "start",
            "ApplicationStopArgument": "stop"
        }));
        normalize_properties(DeviceKind::Daemon, &mut p, &MatchPolicy::default());

        assert_eq!(p["forceQuit"], false);
        assert_eq!(p["ApplicationStopPathName"], "/usr/sbin/apachectl stop");
    }

    #[test]
    fn test_policy_escapes_names() {
        let policy = MatchPolicy::default();
        assert_eq!(policy.process_name(DeviceKind::Application, "C++ IDE", ""), "C\\+\\+ IDE");
    }

    #[test]
    fn test_typed_config_from_record() {
        let mut record = DeviceRecord::new(DeviceId(1), "Safari", DeviceKind::Application)
            .with_property("ApplicationID", "Safari");
        normalize_properties(record.kind, &mut record.properties, &MatchPolicy::default());

        match DeviceConfig::from_record(&record).unwrap() {
            DeviceConfig::Application(cfg) => {
                assert_eq!(cfg.application_id, "Safari");
                assert!(!cfg.close_windows);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn test_missing_property_is_reported() {
        let record = DeviceRecord::new(DeviceId(2), "Backup", DeviceKind::Volume);
        let err = DeviceConfig::from_record(&record).unwrap_err();
        assert!(err.to_string().contains("Backup"));
    }

    #[test]
    fn test_upgrade_defaults_cover_derived_properties() {
        let p = props(json!({"ApplicationID": "Mail", "ApplicationPathName": "/Applications/Mail.app"}));
        let defaults = upgrade_defaults(DeviceKind::Application, &p, &MatchPolicy::default());

        assert_eq!(defaults["closeWindows"], false);
        assert_eq!(defaults["ApplicationProcessName"], "Mail");
        assert_eq!(defaults["directoryPath"], "/Applications");
        assert_eq!(defaults["ApplicationStopPathName"], "tell application \"Mail\" to quit");
    }
}
