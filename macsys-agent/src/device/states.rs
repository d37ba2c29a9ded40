//! Typed state records produced by the probes
//!
//! Each record converts into a [`StateMap`] so the debounced writer can diff it
//! against the live store.

use super::{keys, StateMap, StateValue};

/// Label reported in `PStatus` for a `ps` state code
pub fn process_state_label(code: &str) -> String {
    match code {
        "I" => "idle".to_string(),
        "R" | "S" => "running".to_string(),
        "T" => "stopped".to_string(),
        "U" => "uninterruptible".to_string(),
        "Z" => "zombie".to_string(),
        "" => "waiting".to_string(),
        other => format!("unknown code - {other}"),
    }
}

/// Parse a `ps` elapsed time (`[[dd-]hh:]mm:ss`) into seconds
pub fn parse_elapsed(text: &str) -> Option<i64> {
    let text = text.trim();
    let (days, clock) = match text.split_once('-') {
        Some((d, rest)) => (d.parse::<i64>().ok()?, rest),
        None => (0, text),
    };
    let parts: Vec<i64> = clock
        .split(':')
        .map(|p| p.parse::<i64>())
        .collect::<Result<_, _>>()
        .ok()?;
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };
    Some(((days * 24 + hours) * 60 + minutes) * 60 + seconds)
}

/// Parse a `ps`/`df` number, accepting a decimal comma
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().replace(',', ".").parse().ok()
}

/// Cheap on/off facts about a process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: i64,
    pub status: String,
}

impl ProcessStatus {
    pub fn off() -> Self {
        Self {
            running: false,
            pid: 0,
            status: "off".to_string(),
        }
    }

    pub fn running(pid: i64, code: &str) -> Self {
        Self {
            running: true,
            pid,
            status: process_state_label(code),
        }
    }

    pub fn into_states(self) -> StateMap {
        let mut states = StateMap::new();
        states.insert(keys::ON_OFF.into(), self.running.into());
        states.insert(keys::PROCESS_ID.into(), self.pid.into());
        states.insert(keys::PROCESS_STATUS.into(), self.status.into());
        states
    }
}

/// Expensive facts about a process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessData {
    Running {
        started: String,
        cpu_percent: f64,
        mem_percent: f64,
        elapsed_secs: i64,
    },
    /// The process vanished between the status and the data query
    Gone,
}

impl ProcessData {
    pub fn into_states(self) -> StateMap {
        match self {
            ProcessData::Running {
                started,
                cpu_percent,
                mem_percent,
                elapsed_secs,
            } => {
                let mut states = StateMap::new();
                states.insert(keys::START_TIME.into(), started.into());
                states.insert(keys::CPU_PERCENT.into(), cpu_percent.into());
                states.insert(keys::MEM_PERCENT.into(), mem_percent.into());
                states.insert(keys::ELAPSED.into(), elapsed_secs.into());
                states
            }
            ProcessData::Gone => {
                let mut states = ProcessStatus::off().into_states();
                states.insert(keys::START_TIME.into(), StateValue::from(""));
                states.insert(keys::ELAPSED.into(), 0i64.into());
                states.insert(keys::CPU_PERCENT.into(), 0.0f64.into());
                states.insert(keys::MEM_PERCENT.into(), 0.0f64.into());
                states
            }
        }
    }
}

/// Cheap mounted/unmounted facts about a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStatus {
    pub mounted: bool,
}

impl VolumeStatus {
    /// `VStatus` is only asserted when mounted; unmounted details come from the data query
    pub fn into_states(self) -> StateMap {
        let mut states = StateMap::new();
        states.insert(keys::ON_OFF.into(), self.mounted.into());
        if self.mounted {
            states.insert(keys::VOLUME_STATUS.into(), "on".into());
        }
        states
    }
}

/// Expensive facts about a volume
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeData {
    /// Not known to `diskutil` at all
    Missing,
    /// Known to `diskutil` but absent from `df`
    Unmounted {
        volume_type: String,
        size: String,
        device: String,
    },
    Mounted {
        volume_type: String,
        size: String,
        device: String,
        used_percent: f64,
    },
}

impl VolumeData {
    pub fn into_states(self) -> StateMap {
        let mut states = StateMap::new();
        match self {
            VolumeData::Missing => {
                states.insert(keys::ON_OFF.into(), false.into());
                states.insert(keys::VOLUME_STATUS.into(), "off".into());
            }
            VolumeData::Unmounted {
                volume_type,
                size,
                device,
            } => {
                states.insert(keys::VOLUME_TYPE.into(), volume_type.into());
                states.insert(keys::VOLUME_SIZE.into(), size.into());
                states.insert(keys::VOLUME_DEVICE.into(), device.into());
                states.insert(keys::ON_OFF.into(), false.into());
                states.insert(keys::VOLUME_STATUS.into(), "notmounted".into());
            }
            VolumeData::Mounted {
                volume_type,
                size,
                device,
                used_percent,
            } => {
                states.insert(keys::VOLUME_TYPE.into(), volume_type.into());
                states.insert(keys::VOLUME_SIZE.into(), size.into());
                states.insert(keys::VOLUME_DEVICE.into(), device.into());
                states.insert(keys::USED_PERCENT.into(), used_percent.into());
                states.insert(keys::ON_OFF.into(), true.into());
                states.insert(keys::VOLUME_STATUS.into(), "on".into());
            }
        }
        states
    }
}
