//! Disk sleep setting and the keepalive cadence derived from it

use std::time::Duration;

use crate::context::PluginContext;

const DISK_SLEEP_QUERY: &str = "pmset -g | grep disksleep | sed -e s/[a-z]//g | sed -e 's/ //g'";

/// Plugin preference holding the last known setting, in minutes
pub const DISK_SLEEP_PREF: &str = "disksleepTime";

pub const FALLBACK_PERIOD: Duration = Duration::from_secs(600);

/// Current disk sleep setting in minutes; 0 when disabled or unreadable
pub async fn disk_sleep_minutes(ctx: &PluginContext) -> i64 {
    match ctx.shell().text(DISK_SLEEP_QUERY).await {
        Ok(text) => text.trim().parse().unwrap_or(0),
        Err(err) => {
            ctx.log.error(format_args!("cannot read disk sleep setting: {err}"));
            0
        }
    }
}

/// Keepalive period for a disk sleep setting: one minute before the disk
/// would sleep, `fallback` when sleep is disabled or out of range. Never
/// below `floor`.
pub fn keepalive_period(minutes: i64, fallback: Duration, floor: Duration) -> Duration {
    let seconds = u64::try_from(minutes)
        .ok()
        .filter(|&m| m > 0)
        .and_then(|m| (m - 1).checked_mul(60));
    match seconds {
        Some(seconds) => Duration::from_secs(seconds).max(floor),
        None => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: Duration = Duration::from_secs(30);

    #[test]
    fn test_period_one_minute_early() {
        assert_eq!(keepalive_period(10, FALLBACK_PERIOD, FLOOR), Duration::from_secs(540));
    }

    #[test]
    fn test_disabled_uses_fallback() {
        assert_eq!(keepalive_period(0, FALLBACK_PERIOD, FLOOR), FALLBACK_PERIOD);
        assert_eq!(keepalive_period(-3, FALLBACK_PERIOD, FLOOR), FALLBACK_PERIOD);
    }

    #[test]
    fn test_oversized_setting_uses_fallback() {
        assert_eq!(keepalive_period(i64::MAX / 10, FALLBACK_PERIOD, FLOOR), FALLBACK_PERIOD);
        assert_eq!(keepalive_period(i64::MAX, FALLBACK_PERIOD, FLOOR), FALLBACK_PERIOD);
    }

    #[test]
    fn test_one_minute_setting_is_floored() {
        assert_eq!(keepalive_period(1, FALLBACK_PERIOD, FLOOR), FLOOR);
    }
}
