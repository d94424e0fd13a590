//! Per-side speaking-time budgets and the single countdown clock.
//!
//! `Clock` is pure bookkeeping; `ClockHandle` is the spawned task that calls
//! back once per second while a run is live.

use std::time::Duration;

use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::phase::Side;

/// Default budget per side: 17 minutes.
pub const DEFAULT_BUDGET_SECS: u32 = 17 * 60;

/// Interval between clock ticks.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Remaining speaking time for one side, floored at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    remaining: u32,
}

impl TimeBudget {
    pub fn new(secs: u32) -> Self {
        Self { remaining: secs }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn decrement(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }
}

/// The two independent side budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    a: TimeBudget,
    b: TimeBudget,
}

impl Budgets {
    pub fn new(secs: u32) -> Self {
        Self {
            a: TimeBudget::new(secs),
            b: TimeBudget::new(secs),
        }
    }

    pub fn get(&self, side: Side) -> TimeBudget {
        match side {
            Side::A => self.a,
            Side::B => self.b,
        }
    }

    fn get_mut(&mut self, side: Side) -> &mut TimeBudget {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }
}

impl Default for Budgets {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_SECS)
    }
}

/// Result of asking the clock to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStart {
    /// A new run began; ticks must carry this run id.
    Started { run: u64 },
    /// A clock is already running; nothing changed.
    AlreadyRunning,
    /// The side has no time left.
    Exhausted,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub side: Side,
    pub remaining: u32,
    /// Set on the one tick that drove the budget to zero.
    pub expired: bool,
}

/// At most one side's countdown is live at any time.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    running: Option<(Side, u64)>,
    last_run: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running_side(&self) -> Option<Side> {
        self.running.map(|(side, _)| side)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Begin counting down `side`. A no-op while any clock is running.
    pub fn start(&mut self, side: Side, budgets: &Budgets) -> ClockStart {
        if self.running.is_some() {
            return ClockStart::AlreadyRunning;
        }
        if budgets.get(side).is_exhausted() {
            return ClockStart::Exhausted;
        }
        self.last_run += 1;
        self.running = Some((side, self.last_run));
        debug!(side = side.display_name(), run = self.last_run, "Clock started");
        ClockStart::Started { run: self.last_run }
    }

    /// Halt the countdown, keeping the remaining time. Idempotent.
    pub fn pause(&mut self) -> bool {
        let was_running = self.running.take().is_some();
        if was_running {
            debug!("Clock paused");
        }
        was_running
    }

    /// Apply one elapsed second to the run identified by `run`.
    ///
    /// Returns `None` when that run is no longer live, so a stale tick task
    /// can never touch a budget.
    pub fn tick(&mut self, run: u64, budgets: &mut Budgets) -> Option<Tick> {
        let (side, live_run) = self.running?;
        if live_run != run {
            return None;
        }

        let remaining = budgets.get_mut(side).decrement();
        let expired = remaining == 0;
        if expired {
            self.running = None;
            info!(side = side.display_name(), "Time expired");
        }
        Some(Tick {
            side,
            remaining,
            expired,
        })
    }
}

/// Format seconds as `MM:SS`.
pub fn format_time(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Whether the tick task keeps going after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Owned handle to a running tick task.
///
/// `cancel` consumes the handle, so a task is cancelled at most once.
/// Dropping the handle cancels the task as well.
#[derive(Debug)]
pub struct ClockHandle {
    cancel: CancellationToken,
}

impl ClockHandle {
    /// Spawn a task that calls `on_tick` every `period`, first after one full period.
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> TickControl + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if on_tick() == TickControl::Stop {
                            break;
                        }
                    }
                }
            }
        });
        Self { cancel }
    }

    pub fn cancel(self) {
        self.cancel.cancel();
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(1020), "17:00");
        assert_eq!(format_time(1015), "16:55");
        assert_eq!(format_time(65), "01:05");
        assert_eq!(format_time(0), "00:00");
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let mut budgets = Budgets::new(100);
        let mut clock = Clock::new();

        let ClockStart::Started { run } = clock.start(Side::A, &budgets) else {
            panic!("clock should start");
        };
        assert_eq!(clock.start(Side::A, &budgets), ClockStart::AlreadyRunning);
        assert_eq!(clock.start(Side::B, &budgets), ClockStart::AlreadyRunning);
        assert_eq!(clock.running_side(), Some(Side::A));

        clock.tick(run, &mut budgets);
        assert_eq!(budgets.get(Side::A).remaining(), 99);
        assert_eq!(budgets.get(Side::B).remaining(), 100);
    }

    #[test]
    fn test_pause_preserves_remaining_and_is_idempotent() {
        let mut budgets = Budgets::new(10);
        let mut clock = Clock::new();
        let ClockStart::Started { run } = clock.start(Side::B, &budgets) else {
            panic!("clock should start");
        };
        clock.tick(run, &mut budgets);

        assert!(clock.pause());
        assert!(!clock.pause());
        assert_eq!(clock.tick(run, &mut budgets), None);
        assert_eq!(budgets.get(Side::B).remaining(), 9);
    }

    #[test]
    fn test_stale_run_cannot_tick() {
        let mut budgets = Budgets::new(10);
        let mut clock = Clock::new();
        let ClockStart::Started { run: old } = clock.start(Side::A, &budgets) else {
            panic!("clock should start");
        };
        clock.pause();
        let ClockStart::Started { run: new } = clock.start(Side::A, &budgets) else {
            panic!("clock should restart");
        };

        assert_ne!(old, new);
        assert_eq!(clock.tick(old, &mut budgets), None);
        assert!(clock.tick(new, &mut budgets).is_some());
        assert_eq!(budgets.get(Side::A).remaining(), 9);
    }

    #[test]
    fn test_expiry_halts_exactly_once() {
        let mut budgets = Budgets::new(2);
        let mut clock = Clock::new();
        let ClockStart::Started { run } = clock.start(Side::A, &budgets) else {
            panic!("clock should start");
        };

        let first = clock.tick(run, &mut budgets).unwrap();
        assert!(!first.expired);
        let second = clock.tick(run, &mut budgets).unwrap();
        assert!(second.expired);
        assert_eq!(second.remaining, 0);
        assert!(!clock.is_running());

        assert_eq!(clock.tick(run, &mut budgets), None);
        assert_eq!(clock.start(Side::A, &budgets), ClockStart::Exhausted);
        assert_eq!(budgets.get(Side::A).remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_ticks_once_per_period() {
        let count = Arc::new(Mutex::new(0u32));
        let counter = count.clone();
        let handle = ClockHandle::spawn(TICK_PERIOD, move || {
            *counter.lock().unwrap() += 1;
            TickControl::Continue
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(*count.lock().unwrap(), 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*count.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_stops_itself() {
        let count = Arc::new(Mutex::new(0u32));
        let counter = count.clone();
        let handle = ClockHandle::spawn(TICK_PERIOD, move || {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n == 2 { TickControl::Stop } else { TickControl::Continue }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*count.lock().unwrap(), 2);
        handle.cancel();
    }
}
