//! Wall-clock reads and cancelable deadline timers.
//!
//! Timers here never spawn threads. They only remember a deadline; the
//! engine loop asks for the earliest one, sleeps until it, then polls
//! `take_due` on the engine thread so every callback runs in sequence with
//! event handlers.

use chrono::{DateTime, Duration, Utc};
#[cfg(test)]
use std::sync::{Arc, Mutex};

pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock shared between a test and the tracker it drives.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, value: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = value;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

/// Schedule-replaces-previous timer.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<DateTime<Utc>>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: DateTime<Utc>) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Returns true once per arming when the deadline has passed.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Fixed-period timer.
#[derive(Debug, Clone)]
pub struct Interval {
    period: Duration,
    next: Option<DateTime<Utc>>,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.next = Some(now + self.period);
    }

    pub fn cancel(&mut self) {
        self.next = None;
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.next
    }

    /// Fires at most once per call; re-arms relative to `now` so a stalled
    /// loop does not fire a burst of catch-up ticks.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.next {
            Some(next) if now >= next => {
                self.next = Some(now + self.period);
                true
            }
            _ => false,
        }
    }
}

pub fn earliest(
    left: Option<DateTime<Utc>>,
    right: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left.min(right)),
        (left, None) => left,
        (None, right) => right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T10:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn debounce_reschedule_replaces_deadline() {
        let mut debounce = Debounce::new(Duration::milliseconds(1000));
        debounce.schedule(t0());
        debounce.schedule(t0() + Duration::milliseconds(600));

        assert!(!debounce.take_due(t0() + Duration::milliseconds(1000)));
        assert!(debounce.take_due(t0() + Duration::milliseconds(1600)));
        assert!(!debounce.take_due(t0() + Duration::milliseconds(5000)));
    }

    #[test]
    fn debounce_cancel_clears_pending() {
        let mut debounce = Debounce::new(Duration::milliseconds(1000));
        debounce.schedule(t0());
        assert!(debounce.cancel());
        assert!(!debounce.is_pending());
        assert!(!debounce.take_due(t0() + Duration::hours(1)));
    }

    #[test]
    fn interval_rearms_after_firing() {
        let mut interval = Interval::new(Duration::hours(1));
        interval.start(t0());

        assert!(!interval.take_due(t0() + Duration::minutes(59)));
        assert!(interval.take_due(t0() + Duration::hours(3)));
        assert_eq!(interval.deadline(), Some(t0() + Duration::hours(4)));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(t0());
        let shared = clock.clone();
        clock.advance(Duration::seconds(5));
        assert_eq!(shared.now(), t0() + Duration::seconds(5));
    }

    #[test]
    fn earliest_picks_minimum() {
        let later = t0() + Duration::seconds(1);
        assert_eq!(earliest(Some(later), Some(t0())), Some(t0()));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(None, None), None);
    }
}
