//! Polling scheduler
//!
//! One cycle samples the timers once, refreshes the disk sleep setting when
//! the keepalive timer elapsed, sweeps every active device and then sleeps
//! what is left of the pace. A failing device never aborts the sweep.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::PollingSettings;
use crate::context::PluginContext;
use crate::device::{keys, DeviceId, PropertyMap, StateValue};
use crate::logging::LogFlags;
use crate::probe::disk::{self, DISK_SLEEP_PREF};
use crate::probe::{device_class, ProbeError, TimerTicks};
use crate::timer::{TimerArena, TimerError, TimerId};
use crate::upgrade::upgrade_device;

/// Shortest pause between two cycles
pub const MIN_SLEEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sweeping,
    Sleeping,
    Stopped,
}

/// Time to sleep so that a cycle which started `elapsed` ago lasts `pace`.
///
/// Rounded to 10 ms; anything under a second becomes [`MIN_SLEEP`].
pub fn next_sleep(pace: Duration, elapsed: Duration) -> Duration {
    let remainder = pace.saturating_sub(elapsed);
    let rounded = Duration::from_millis(((remainder.as_millis() + 5) / 10 * 10) as u64);
    if rounded < Duration::from_secs(1) {
        MIN_SLEEP
    } else {
        rounded
    }
}

pub struct Scheduler {
    ctx: PluginContext,
    settings: PollingSettings,
    timers: TimerArena,
    keepalive: TimerId,
    application_data: TimerId,
    volume_data: TimerId,
    disk_sleep: i64,
    phase: watch::Sender<Phase>,
}

impl Scheduler {
    /// Create the scheduler and arm its timers; needs a tokio runtime
    pub fn new(ctx: PluginContext, settings: PollingSettings) -> Result<Self, TimerError> {
        let disk_sleep = ctx
            .store
            .plugin_pref(DISK_SLEEP_PREF)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let mut timers = TimerArena::new();
        let keepalive = timers.start(
            "Next disk spin",
            disk::keepalive_period(disk_sleep, settings.keepalive_fallback(), settings.keepalive_floor()),
            None,
        )?;
        let volume_data = timers.start(
            "Read volume data",
            Duration::from_secs(settings.volume_data_secs),
            None,
        )?;
        let application_data = timers.start(
            "Read application data",
            Duration::from_secs(settings.application_data_secs),
            Some(Duration::from_secs(settings.application_data_first_secs)),
        )?;

        let (phase, _) = watch::channel(Phase::Idle);
        Ok(Self {
            ctx,
            settings,
            timers,
            keepalive,
            application_data,
            volume_data,
            disk_sleep,
            phase,
        })
    }

    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Last known disk sleep setting in minutes
    pub fn disk_sleep_minutes(&self) -> i64 {
        self.disk_sleep
    }

    pub fn keepalive_period(&self) -> Duration {
        self.timers
            .get(self.keepalive)
            .map(|timer| timer.period())
            .unwrap_or_else(|_| self.settings.keepalive_fallback())
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    /// Run the upgrade contract on every device
    pub fn prepare_devices(&self) {
        for id in self.ctx.store.device_ids() {
            if let Err(err) = upgrade_device(self.ctx.store.as_ref(), &self.ctx.log, &self.ctx.policy, id) {
                self.ctx.log.error(format_args!("cannot upgrade device {id}: {err}"));
            }
        }
    }

    /// Consume every timer's readiness once
    pub fn sample_ticks(&self) -> TimerTicks {
        TimerTicks {
            keepalive: self.timers.is_ready(self.keepalive),
            application_data: self.timers.is_ready(self.application_data),
            volume_data: self.timers.is_ready(self.volume_data),
        }
    }

    /// Re-read the disk sleep setting and follow it with the keepalive timer
    pub async fn refresh_disk_sleep(&mut self) {
        let minutes = disk::disk_sleep_minutes(&self.ctx).await;
        let mut proposed = PropertyMap::new();
        proposed.insert(DISK_SLEEP_PREF.to_string(), Value::from(minutes));

        let delta = self.ctx.writer.apply_plugin_prefs(proposed).await;
        self.disk_sleep = minutes;
        if delta.is_empty() {
            return;
        }

        let period = disk::keepalive_period(
            minutes,
            self.settings.keepalive_fallback(),
            self.settings.keepalive_floor(),
        );
        match self.timers.get_mut(self.keepalive).and_then(|t| t.change_interval(period)) {
            Ok(()) => self.ctx.log.trace(format_args!(
                "disk sleep is {minutes} min, keepalive every {}s",
                period.as_secs()
            )),
            Err(err) => self.ctx.log.error(format_args!("cannot reprogram keepalive: {err}")),
        }
    }

    pub async fn sweep_device(&self, id: DeviceId, ticks: &TimerTicks) -> Result<(), ProbeError> {
        let ctx = &self.ctx;
        let record = ctx.store.device(id)?;
        if !record.is_active() {
            return Ok(());
        }
        let class = device_class(&record)?;

        let status = class.fetch_status(ctx, &record, ticks).await?;
        let delta = ctx.writer.apply_states(id, status).await?;

        if delta.contains_key(keys::ON_OFF) {
            ctx.ledger.credit(id, class.transition_credit());
            if let Err(err) = class.on_transition(ctx, &record, &delta).await {
                ctx.log.error(format_args!("device \"{}\" transition action failed: {err}", record.name));
            }
        }

        if class.data_due(ticks) || ctx.ledger.consume(id) {
            let record = ctx.store.device(id)?;
            let data = class.fetch_data(ctx, &record).await?;
            ctx.writer.apply_states(id, data).await?;
        }
        Ok(())
    }

    pub async fn sweep(&self, ticks: &TimerTicks) {
        for id in self.ctx.store.device_ids() {
            if let Err(err) = self.sweep_device(id, ticks).await {
                self.ctx.log.error(format_args!("update of device {id} failed: {err}"));
            }
        }
    }

    /// One sweep; returns the pause to take before the next one
    pub async fn run_cycle(&mut self) -> Duration {
        let wake = Instant::now();
        self.set_phase(Phase::Sweeping);

        let ticks = self.sample_ticks();
        if ticks.keepalive {
            self.refresh_disk_sleep().await;
        }
        self.sweep(&ticks).await;

        next_sleep(self.settings.pace(), wake.elapsed())
    }

    /// Loop until `stop` is cancelled
    pub async fn run(&mut self, stop: CancellationToken) {
        self.ctx.log.trace("scheduler started");
        self.prepare_devices();

        while !stop.is_cancelled() {
            let pause = self.run_cycle().await;
            self.set_phase(Phase::Sleeping);
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = time::sleep(pause) => {}
            }
            self.set_phase(Phase::Idle);
        }

        self.shutdown();
    }

    /// Cancel timers and dump the final device states
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
        for id in self.ctx.store.device_ids() {
            if let Ok(record) = self.ctx.store.device(id) {
                self.ctx.log.dump(
                    LogFlags::STATES_DEBUG,
                    |k: &String, v: &StateValue| format!("device \"{}\" state {k} is {v}", record.name),
                    &record.states,
                );
            }
        }
        self.set_phase(Phase::Stopped);
        self.ctx.log.trace("scheduler stopped");
    }
}
