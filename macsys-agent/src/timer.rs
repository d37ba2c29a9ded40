//! Interval timers backing the scheduler cadence
//!
//! Each timer is a spawned task that only raises an atomic flag when its period
//! elapses; the scheduler polls the flag once per cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Timer errors
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("timer {0} needs a period greater than zero")]
    ZeroPeriod(String),
    #[error("unknown timer handle {0}")]
    UnknownTimer(usize),
}

/// Named countdown with an optional distinct first period.
///
/// Ready is raised at construction, so the first cycle always sees it.
pub struct IntervalTimer {
    name: String,
    period: Duration,
    ready: Arc<AtomicBool>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl IntervalTimer {
    /// Create and arm a timer. A zero first period counts as none.
    /// Must be called from within a tokio runtime.
    pub fn start(
        name: impl Into<String>,
        period: Duration,
        first_period: Option<Duration>,
    ) -> Result<Self, TimerError> {
        let name = name.into();
        if period.is_zero() {
            return Err(TimerError::ZeroPeriod(name));
        }

        let mut timer = Self {
            name,
            period,
            ready: Arc::new(AtomicBool::new(true)),
            token: CancellationToken::new(),
            handle: None,
        };
        timer.arm(first_period.filter(|first| !first.is_zero()).unwrap_or(period));
        Ok(timer)
    }

    fn arm(&mut self, first: Duration) {
        self.token.cancel();
        self.token = CancellationToken::new();

        let cancel = self.token.clone();
        let ready = Arc::clone(&self.ready);
        let period = self.period;
        let name = self.name.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut deadline = Instant::now() + first;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        trace!(timer = %name, "timer cancelled");
                        return;
                    }
                    _ = time::sleep_until(deadline) => {
                        ready.store(true, Ordering::SeqCst);
                        trace!(timer = %name, "timer elapsed");
                        deadline += period;
                    }
                }
            }
        }));
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Test-and-clear of the ready flag
    pub fn is_ready(&self) -> bool {
        self.ready.swap(false, Ordering::SeqCst)
    }

    /// Re-arm with a new period counted from now; the ready flag is left as is
    pub fn change_interval(&mut self, period: Duration) -> Result<(), TimerError> {
        if period.is_zero() {
            return Err(TimerError::ZeroPeriod(self.name.clone()));
        }
        self.period = period;
        self.arm(period);
        Ok(())
    }

    /// Re-arm from now and make the next [`is_ready`](Self::is_ready) return true
    pub fn force_elapsed(&mut self) {
        self.arm(self.period);
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&mut self) {
        self.token.cancel();
        self.handle = None;
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished()) && !self.token.is_cancelled()
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Handle to a timer held by a [`TimerArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

/// Owner of every timer of a scheduler run
#[derive(Default)]
pub struct TimerArena {
    timers: Vec<IntervalTimer>,
}

impl TimerArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        first_period: Option<Duration>,
    ) -> Result<TimerId, TimerError> {
        let timer = IntervalTimer::start(name, period, first_period)?;
        self.timers.push(timer);
        Ok(TimerId(self.timers.len() - 1))
    }

    pub fn get(&self, id: TimerId) -> Result<&IntervalTimer, TimerError> {
        self.timers.get(id.0).ok_or(TimerError::UnknownTimer(id.0))
    }

    pub fn get_mut(&mut self, id: TimerId) -> Result<&mut IntervalTimer, TimerError> {
        self.timers.get_mut(id.0).ok_or(TimerError::UnknownTimer(id.0))
    }

    /// Test-and-clear; an unknown handle is never ready
    pub fn is_ready(&self, id: TimerId) -> bool {
        self.get(id).is_ok_and(IntervalTimer::is_ready)
    }

    pub fn cancel_all(&mut self) {
        for timer in &mut self.timers {
            timer.cancel();
        }
        trace!(count = self.timers.len(), "all timers cancelled");
    }
}

impl Drop for TimerArena {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_at_construction_then_cleared() {
        let timer = IntervalTimer::start("data", secs(10.0), None).unwrap();
        assert!(timer.is_ready());
        assert!(!timer.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_period_then_recurring() {
        let timer = IntervalTimer::start("data", secs(60.0), Some(secs(30.0))).unwrap();
        assert!(timer.is_ready());

        time::sleep(secs(29.5)).await;
        assert!(!timer.is_ready());
        time::sleep(secs(1.0)).await;
        assert!(timer.is_ready());

        time::sleep(secs(59.0)).await;
        assert!(!timer.is_ready());
        time::sleep(secs(1.0)).await;
        assert!(timer.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_first_period_uses_period() {
        let timer = IntervalTimer::start("data", secs(60.0), Some(Duration::ZERO)).unwrap();
        assert!(timer.is_ready());

        tokio::task::yield_now().await;
        time::sleep(secs(0.001)).await;
        assert!(!timer.is_ready());

        time::sleep(secs(60.0)).await;
        assert!(timer.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_consumed_once_per_expiry() {
        let timer = IntervalTimer::start("spin", secs(5.0), None).unwrap();
        timer.is_ready();
        time::sleep(secs(12.0)).await;
        // two expiries elapsed, one flag
        assert!(timer.is_ready());
        assert!(!timer.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_interval_restarts_countdown() {
        let mut timer = IntervalTimer::start("spin", secs(10.0), None).unwrap();
        timer.is_ready();

        time::sleep(secs(8.0)).await;
        timer.change_interval(secs(5.0)).unwrap();
        assert!(!timer.is_ready());

        time::sleep(secs(3.0)).await;
        assert!(!timer.is_ready(), "old deadline must not fire");
        time::sleep(secs(2.5)).await;
        assert!(timer.is_ready());
        assert_eq!(timer.period(), secs(5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_elapsed_sets_ready_and_rearms() {
        let mut timer = IntervalTimer::start("volume", secs(10.0), None).unwrap();
        timer.is_ready();
        time::sleep(secs(6.0)).await;

        timer.force_elapsed();
        assert!(timer.is_ready());

        time::sleep(secs(6.0)).await;
        assert!(!timer.is_ready());
        time::sleep(secs(4.5)).await;
        assert!(timer.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_rejected() {
        assert!(matches!(
            IntervalTimer::start("bad", Duration::ZERO, None),
            Err(TimerError::ZeroPeriod(_))
        ));
        let mut timer = IntervalTimer::start("ok", secs(1.0), None).unwrap();
        assert!(timer.change_interval(Duration::ZERO).is_err());
        assert_eq!(timer.period(), secs(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_arena_cancel_all_stops_expiries() {
        let mut arena = TimerArena::new();
        let a = arena.start("a", secs(1.0), None).unwrap();
        let b = arena.start("b", secs(2.0), None).unwrap();
        assert!(arena.is_ready(a));
        assert!(arena.is_ready(b));

        arena.cancel_all();
        assert!(!arena.get(a).unwrap().is_armed());
        time::sleep(secs(5.0)).await;
        assert!(!arena.is_ready(a));
        assert!(!arena.is_ready(b));
    }
}
