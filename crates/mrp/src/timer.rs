//! Per-instance protocol timers.
//!
//! Timers only hold deadlines; the event loop asks the registry for the
//! earliest deadline, sleeps until then and calls back into the owning
//! instance, so expiries of one instance are always delivered one at a time.

use std::time::{Duration, Instant};

/// Named timers of a ring instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    RingTest,
    RingTopology,
    LinkUp,
    LinkDown,
    ClearFdb,
    RingWatcher,
}

impl TimerKind {
    /// All timers, in the order ties between equal deadlines are resolved.
    pub const ALL: [TimerKind; 6] = [
        TimerKind::RingTest,
        TimerKind::RingTopology,
        TimerKind::LinkUp,
        TimerKind::LinkDown,
        TimerKind::ClearFdb,
        TimerKind::RingWatcher,
    ];
}

/// Outcome of one timer expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Regular tick; `remaining` is the number of ticks left before the
    /// timer is exhausted.
    Tick { remaining: u32 },
    /// The repeat count or miss budget ran out.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repeat {
    /// Fires once, then stops.
    Once,
    /// Fires `remaining` more ticks, then one exhausted expiry, then stops.
    Burst { remaining: u32 },
    /// Counts ticks since the last `feed`; exhausted when `missed` reaches
    /// `budget`, then keeps running with a fresh count.
    Watchdog { missed: u32, budget: u32 },
}

/// A single timer
#[derive(Debug, Clone)]
pub struct Timer {
    period: Duration,
    deadline: Option<Instant>,
    repeat: Repeat,
}

impl Timer {
    fn with_repeat(repeat: Repeat) -> Self {
        Self {
            period: Duration::ZERO,
            deadline: None,
            repeat,
        }
    }

    pub fn once() -> Self {
        Self::with_repeat(Repeat::Once)
    }

    pub fn burst() -> Self {
        Self::with_repeat(Repeat::Burst { remaining: 0 })
    }

    pub fn watchdog() -> Self {
        Self::with_repeat(Repeat::Watchdog {
            missed: 0,
            budget: 1,
        })
    }

    /// Arm the timer to first fire `interval` from `now`.
    pub fn start(&mut self, now: Instant, interval: Duration) {
        self.period = interval;
        self.deadline = Some(now + interval);
        if let Repeat::Watchdog { missed, .. } = &mut self.repeat {
            *missed = 0;
        }
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Restart with a new period, keeping the repeat configuration.
    pub fn reconfigure(&mut self, now: Instant, interval: Duration) {
        self.start(now, interval);
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Set the burst length or the watchdog budget.
    pub fn set_repeat_count(&mut self, count: u32) {
        self.repeat = match self.repeat {
            Repeat::Once => Repeat::Once,
            Repeat::Burst { .. } => Repeat::Burst { remaining: count },
            Repeat::Watchdog { missed, .. } => Repeat::Watchdog {
                missed,
                budget: count.max(1),
            },
        };
    }

    /// Reset the watchdog's miss count.
    pub fn feed(&mut self) {
        if let Repeat::Watchdog { missed, .. } = &mut self.repeat {
            *missed = 0;
        }
    }

    /// Consecutive ticks without a `feed` (watchdog timers only).
    pub fn missed(&self) -> u32 {
        match self.repeat {
            Repeat::Watchdog { missed, .. } => missed,
            _ => 0,
        }
    }

    pub fn budget(&self) -> u32 {
        match self.repeat {
            Repeat::Watchdog { budget, .. } => budget,
            Repeat::Burst { remaining } => remaining,
            Repeat::Once => 1,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }

    /// Consume one expiry if the timer is due.
    pub fn fire(&mut self, now: Instant) -> Option<Expiry> {
        let deadline = self.deadline?;
        if deadline > now {
            return None;
        }

        // late wakeups do not produce a backlog of expiries
        let mut next = deadline + self.period;
        if next <= now {
            next = now + self.period;
        }

        match &mut self.repeat {
            Repeat::Once => {
                self.deadline = None;
                Some(Expiry::Exhausted)
            }
            Repeat::Burst { remaining } => {
                if *remaining == 0 {
                    self.deadline = None;
                    Some(Expiry::Exhausted)
                } else {
                    *remaining -= 1;
                    self.deadline = Some(next);
                    Some(Expiry::Tick {
                        remaining: *remaining,
                    })
                }
            }
            Repeat::Watchdog { missed, budget } => {
                self.deadline = Some(next);
                *missed += 1;
                if *missed >= *budget {
                    *missed = 0;
                    Some(Expiry::Exhausted)
                } else {
                    Some(Expiry::Tick {
                        remaining: *budget - *missed,
                    })
                }
            }
        }
    }
}

/// The timers owned by one ring instance
#[derive(Debug, Clone)]
pub struct TimerSet {
    ring_test: Timer,
    ring_topology: Timer,
    link_up: Timer,
    link_down: Timer,
    clear_fdb: Timer,
    ring_watcher: Timer,
}

impl Default for TimerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSet {
    pub fn new() -> Self {
        Self {
            ring_test: Timer::watchdog(),
            ring_topology: Timer::burst(),
            link_up: Timer::burst(),
            link_down: Timer::burst(),
            clear_fdb: Timer::once(),
            ring_watcher: Timer::watchdog(),
        }
    }

    pub fn get(&self, kind: TimerKind) -> &Timer {
        match kind {
            TimerKind::RingTest => &self.ring_test,
            TimerKind::RingTopology => &self.ring_topology,
            TimerKind::LinkUp => &self.link_up,
            TimerKind::LinkDown => &self.link_down,
            TimerKind::ClearFdb => &self.clear_fdb,
            TimerKind::RingWatcher => &self.ring_watcher,
        }
    }

    pub fn get_mut(&mut self, kind: TimerKind) -> &mut Timer {
        match kind {
            TimerKind::RingTest => &mut self.ring_test,
            TimerKind::RingTopology => &mut self.ring_topology,
            TimerKind::LinkUp => &mut self.link_up,
            TimerKind::LinkDown => &mut self.link_down,
            TimerKind::ClearFdb => &mut self.clear_fdb,
            TimerKind::RingWatcher => &mut self.ring_watcher,
        }
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.get(kind).is_running()
    }

    pub fn stop(&mut self, kind: TimerKind) {
        self.get_mut(kind).stop();
    }

    pub fn stop_all(&mut self) {
        for kind in TimerKind::ALL {
            self.stop(kind);
        }
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        TimerKind::ALL
            .iter()
            .filter_map(|kind| self.get(*kind).deadline())
            .min()
    }

    /// Fire the earliest due timer, if any.
    pub fn fire_next(&mut self, now: Instant) -> Option<(TimerKind, Expiry)> {
        let kind = TimerKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).is_due(now))
            .min_by_key(|kind| self.get(*kind).deadline())?;

        self.get_mut(kind).fire(now).map(|expiry| (kind, expiry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_once_fires_a_single_time() {
        let t0 = Instant::now();
        let mut timer = Timer::once();
        timer.start(t0, 10 * MS);

        assert_eq!(timer.fire(t0 + 5 * MS), None);
        assert_eq!(timer.fire(t0 + 10 * MS), Some(Expiry::Exhausted));
        assert!(!timer.is_running());
        assert_eq!(timer.fire(t0 + 50 * MS), None);
    }

    #[test]
    fn test_burst_counts_down_then_stops() {
        let t0 = Instant::now();
        let mut timer = Timer::burst();
        timer.set_repeat_count(2);
        timer.start(t0, 10 * MS);

        assert_eq!(timer.fire(t0 + 10 * MS), Some(Expiry::Tick { remaining: 1 }));
        assert_eq!(timer.fire(t0 + 20 * MS), Some(Expiry::Tick { remaining: 0 }));
        assert_eq!(timer.fire(t0 + 30 * MS), Some(Expiry::Exhausted));
        assert!(!timer.is_running());
    }

    #[test]
    fn test_watchdog_exhausts_without_feed() {
        let t0 = Instant::now();
        let mut timer = Timer::watchdog();
        timer.set_repeat_count(3);
        timer.start(t0, 10 * MS);

        assert_eq!(timer.fire(t0 + 10 * MS), Some(Expiry::Tick { remaining: 2 }));
        assert_eq!(timer.fire(t0 + 20 * MS), Some(Expiry::Tick { remaining: 1 }));
        assert_eq!(timer.fire(t0 + 30 * MS), Some(Expiry::Exhausted));
        // keeps running with a fresh count
        assert!(timer.is_running());
        assert_eq!(timer.missed(), 0);
    }

    #[test]
    fn test_watchdog_feed_resets_count() {
        let t0 = Instant::now();
        let mut timer = Timer::watchdog();
        timer.set_repeat_count(2);
        timer.start(t0, 10 * MS);

        for i in 1..10 {
            assert!(matches!(timer.fire(t0 + i * 10 * MS), Some(Expiry::Tick { .. })));
            timer.feed();
        }
    }

    #[test]
    fn test_reconfigure_changes_period() {
        let t0 = Instant::now();
        let mut timer = Timer::watchdog();
        timer.start(t0, 10 * MS);
        timer.reconfigure(t0 + 3 * MS, 50 * MS);

        assert_eq!(timer.period(), 50 * MS);
        assert_eq!(timer.deadline(), Some(t0 + 53 * MS));
        assert_eq!(timer.fire(t0 + 13 * MS), None);
    }

    #[test]
    fn test_late_wakeup_does_not_backlog() {
        let t0 = Instant::now();
        let mut timer = Timer::watchdog();
        timer.set_repeat_count(100);
        timer.start(t0, 10 * MS);

        assert!(timer.fire(t0 + 95 * MS).is_some());
        assert_eq!(timer.fire(t0 + 96 * MS), None);
    }

    #[test]
    fn test_set_fires_earliest_first() {
        let t0 = Instant::now();
        let mut timers = TimerSet::new();
        timers.get_mut(TimerKind::ClearFdb).start(t0, 30 * MS);
        timers.get_mut(TimerKind::RingTest).set_repeat_count(5);
        timers.get_mut(TimerKind::RingTest).start(t0, 10 * MS);

        assert_eq!(timers.next_deadline(), Some(t0 + 10 * MS));
        assert_eq!(timers.fire_next(t0 + 5 * MS), None);

        let now = t0 + 40 * MS;
        assert_eq!(
            timers.fire_next(now),
            Some((TimerKind::RingTest, Expiry::Tick { remaining: 4 }))
        );
        assert_eq!(
            timers.fire_next(now),
            Some((TimerKind::ClearFdb, Expiry::Exhausted))
        );
        assert_eq!(timers.fire_next(now), None);

        timers.stop_all();
        assert_eq!(timers.next_deadline(), None);
    }
}
