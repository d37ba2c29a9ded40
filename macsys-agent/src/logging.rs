//! Logging facade
//!
//! The automation server lets users pick what the plugin logs with one numeric
//! level or, when the level is the sentinel [`CUSTOM_LEVEL`], with individual
//! check boxes. Every channel is gated here and then emitted through `tracing`:
//! - trace / raw trace -> `debug!` / `trace!` (raw wins when both are enabled)
//! - error             -> `error!` (never gated)
//! - headline events   -> `info!`, tagged primary or secondary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use tracing_subscriber::EnvFilter;

/// Level value meaning "use the individual flags"
pub const CUSTOM_LEVEL: u32 = 99;

/// Bit set of enabled log channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogFlags(u8);

impl LogFlags {
    pub const NONE: Self = Self(0);
    pub const MAIN_EVENTS: Self = Self(1);
    pub const SECONDARY_EVENTS: Self = Self(2);
    pub const DEBUG: Self = Self(4);
    pub const RAW_DEBUG: Self = Self(8);
    pub const STATES_DEBUG: Self = Self(16);
    pub const DEBUGS: Self = Self(4 | 8 | 16);

    pub fn from_bits_truncate(bits: u32) -> Self {
        Self((bits & 0x1f) as u8)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for LogFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Log preferences as stored in the plugin configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: u32,
    pub main_events: bool,
    pub secondary_events: bool,
    pub debug: bool,
    pub raw_debug: bool,
    pub state_debug: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: 1,
            main_events: true,
            secondary_events: false,
            debug: false,
            raw_debug: false,
            state_debug: false,
        }
    }
}

impl LogSettings {
    /// Compute the effective flags.
    ///
    /// A numeric level also rewrites the individual flags so the dialog shows
    /// what the level means.
    pub fn resolve(&mut self) -> LogFlags {
        let individual = [
            (self.main_events, LogFlags::MAIN_EVENTS),
            (self.secondary_events, LogFlags::SECONDARY_EVENTS),
            (self.debug, LogFlags::DEBUG),
            (self.raw_debug, LogFlags::RAW_DEBUG),
            (self.state_debug, LogFlags::STATES_DEBUG),
        ];

        if self.level == CUSTOM_LEVEL {
            return individual
                .iter()
                .filter(|(enabled, _)| *enabled)
                .fold(LogFlags::NONE, |acc, (_, flag)| acc | *flag);
        }

        let flags = LogFlags::from_bits_truncate(self.level);
        self.main_events = flags.contains(LogFlags::MAIN_EVENTS);
        self.secondary_events = flags.contains(LogFlags::SECONDARY_EVENTS);
        self.debug = flags.contains(LogFlags::DEBUG);
        self.raw_debug = flags.contains(LogFlags::RAW_DEBUG);
        self.state_debug = flags.contains(LogFlags::STATES_DEBUG);
        flags
    }
}

/// Which trace variant a gated call ends up emitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceChannel {
    Short,
    Raw,
}

/// Shared, runtime-adjustable log facade
#[derive(Debug, Clone, Default)]
pub struct PluginLog {
    flags: Arc<AtomicU8>,
}

impl PluginLog {
    pub fn new(flags: LogFlags) -> Self {
        Self {
            flags: Arc::new(AtomicU8::new(flags.bits())),
        }
    }

    pub fn from_settings(settings: &mut LogSettings) -> Self {
        Self::new(settings.resolve())
    }

    pub fn flags(&self) -> LogFlags {
        LogFlags(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_flags(&self, flags: LogFlags) {
        self.flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn enabled(&self, flag: LogFlags) -> bool {
        self.flags().intersects(flag)
    }

    /// True when any debug channel is on
    pub fn debug_enabled(&self) -> bool {
        self.enabled(LogFlags::DEBUGS)
    }

    pub fn trace_channel(&self, has_short: bool, has_raw: bool) -> Option<TraceChannel> {
        let flags = self.flags();
        if has_raw && flags.contains(LogFlags::RAW_DEBUG) {
            Some(TraceChannel::Raw)
        } else if has_short && flags.contains(LogFlags::DEBUG) {
            Some(TraceChannel::Short)
        } else {
            None
        }
    }

    pub fn shows_event(&self, primary: bool) -> bool {
        let flags = self.flags();
        flags.contains(LogFlags::SECONDARY_EVENTS)
            || (primary && flags.contains(LogFlags::MAIN_EVENTS))
    }

    pub fn trace(&self, message: impl fmt::Display) {
        if self.trace_channel(true, false).is_some() {
            debug!("{message}");
        }
    }

    pub fn raw(&self, message: impl fmt::Display) {
        if self.trace_channel(false, true).is_some() {
            trace!("{message}");
        }
    }

    /// Short and verbose versions of the same trace; only one is emitted
    pub fn trace_pair(&self, short: impl fmt::Display, raw: impl fmt::Display) {
        match self.trace_channel(true, true) {
            Some(TraceChannel::Raw) => trace!("{raw}"),
            Some(TraceChannel::Short) => debug!("{short}"),
            None => {}
        }
    }

    pub fn error(&self, message: impl fmt::Display) {
        error!("{message}");
    }

    pub fn event(&self, message: impl fmt::Display, primary: bool) {
        if self.shows_event(primary) {
            info!(primary, "{message}");
        }
    }

    /// Log a key/value listing when `level` is enabled
    pub fn dump<'a, K, V, I>(&self, level: LogFlags, format: impl Fn(&K, &V) -> String, entries: I)
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        K: 'a,
        V: 'a,
    {
        if !self.enabled(level) {
            return;
        }
        let as_debug = level.intersects(LogFlags::DEBUGS);
        for (key, value) in entries {
            let line = format(key, value);
            if as_debug {
                debug!("{line}");
            } else {
                info!("{line}");
            }
        }
    }
}

/// Install the global tracing subscriber (`RUST_LOG` refines the default filter)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,macsys_agent=trace"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
