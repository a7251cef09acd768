//! Edit coalescing: quiescence debounce, then alignment to the next frame.
//!
//! The scheduler is a plain value driven by the caller's clock. It owns no
//! timers; the event loop sleeps until [`UpdateScheduler::next_deadline`]
//! and calls [`UpdateScheduler::poll`].

use std::time::{Duration, Instant};

use log::debug;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(275);
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Display refresh ticks at `epoch + n * interval`.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    epoch: Instant,
    interval: Duration,
}

impl FrameClock {
    pub fn new(epoch: Instant, interval: Duration) -> Self {
        Self { epoch, interval }
    }

    /// First tick strictly after `at`.
    pub fn next_tick(&self, at: Instant) -> Instant {
        let interval_ns = self.interval.as_nanos() as u64;
        if interval_ns == 0 {
            return at;
        }
        let elapsed_ns = at.saturating_duration_since(self.epoch).as_nanos() as u64;
        let n = elapsed_ns / interval_ns + 1;
        self.epoch + Duration::from_nanos(n.saturating_mul(interval_ns))
    }
}

enum State<T> {
    Idle,
    Debouncing { deadline: Instant, payload: T },
    AwaitingFrame { frame_at: Instant, payload: T },
}

/// Last-edit-wins scheduler carrying the payload of the newest edit.
pub struct UpdateScheduler<T> {
    debounce: Duration,
    clock: FrameClock,
    state: State<T>,
}

impl<T> UpdateScheduler<T> {
    pub fn new(debounce: Duration, clock: FrameClock) -> Self {
        Self {
            debounce,
            clock,
            state: State::Idle,
        }
    }

    /// Record an edit. Cancels any pending debounce or frame callback.
    pub fn schedule(&mut self, now: Instant, payload: T) {
        match self.state {
            State::Idle => {}
            State::Debouncing { .. } => debug!("scheduler: debounce restarted"),
            State::AwaitingFrame { .. } => debug!("scheduler: pending frame cancelled"),
        }
        self.state = State::Debouncing {
            deadline: now + self.debounce,
            payload,
        };
    }

    /// Returns the payload once the debounce has elapsed and the following
    /// frame tick has been reached.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Debouncing { deadline, payload } if now >= deadline => {
                let frame_at = self.clock.next_tick(deadline);
                if now >= frame_at {
                    return Some(payload);
                }
                self.state = State::AwaitingFrame { frame_at, payload };
                None
            }
            State::AwaitingFrame { frame_at, payload } if now >= frame_at => Some(payload),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// When the caller should poll next.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            State::Idle => None,
            State::Debouncing { deadline, .. } => Some(deadline),
            State::AwaitingFrame { frame_at, .. } => Some(frame_at),
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    pub fn cancel(&mut self) {
        self.state = State::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn scheduler(t0: Instant) -> UpdateScheduler<String> {
        UpdateScheduler::new(DEFAULT_DEBOUNCE, FrameClock::new(t0, DEFAULT_FRAME_INTERVAL))
    }

    /// Poll every millisecond from `from` to `to`, collecting deliveries.
    fn run_clock(s: &mut UpdateScheduler<String>, from: Instant, to: Instant) -> Vec<(Instant, String)> {
        let mut out = Vec::new();
        let mut now = from;
        while now <= to {
            if let Some(p) = s.poll(now) {
                out.push((now, p));
            }
            now += ms(1);
        }
        out
    }

    #[test]
    fn frame_clock_next_tick() {
        let t0 = Instant::now();
        let clock = FrameClock::new(t0, ms(16));
        assert_eq!(clock.next_tick(t0), t0 + ms(16));
        assert_eq!(clock.next_tick(t0 + ms(5)), t0 + ms(16));
        assert_eq!(clock.next_tick(t0 + ms(16)), t0 + ms(32));
        assert_eq!(clock.next_tick(t0 + ms(275)), t0 + ms(288));
    }

    #[test]
    fn burst_delivers_last_payload_once() {
        let t0 = Instant::now();
        let mut s = scheduler(t0);
        let mut now = t0;
        for i in 0..20 {
            s.schedule(now, format!("text {i}"));
            assert!(s.poll(now).is_none());
            now += ms(50);
        }
        let last_edit = now - ms(50);
        let delivered = run_clock(&mut s, now, now + ms(2000));
        assert_eq!(delivered.len(), 1);
        let (at, payload) = &delivered[0];
        assert_eq!(payload, "text 19");
        assert!(*at >= last_edit + DEFAULT_DEBOUNCE);
        assert!(*at <= last_edit + DEFAULT_DEBOUNCE + DEFAULT_FRAME_INTERVAL);
        assert!(!s.is_pending());
    }

    #[test]
    fn waits_for_frame_after_debounce() {
        let t0 = Instant::now();
        let mut s = scheduler(t0);
        s.schedule(t0, "a".into());
        assert_eq!(s.next_deadline(), Some(t0 + ms(275)));
        assert!(s.poll(t0 + ms(275)).is_none());
        assert_eq!(s.next_deadline(), Some(t0 + ms(288)));
        assert!(s.poll(t0 + ms(287)).is_none());
        assert_eq!(s.poll(t0 + ms(288)).as_deref(), Some("a"));
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn edit_cancels_pending_frame() {
        let t0 = Instant::now();
        let mut s = scheduler(t0);
        s.schedule(t0, "old".into());
        assert!(s.poll(t0 + ms(280)).is_none());
        s.schedule(t0 + ms(281), "new".into());
        // The old frame tick passes without delivering anything.
        assert!(s.poll(t0 + ms(288)).is_none());
        let delivered = run_clock(&mut s, t0 + ms(289), t0 + ms(1000));
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1, "new");
    }

    #[test]
    fn late_poll_delivers_immediately() {
        let t0 = Instant::now();
        let mut s = scheduler(t0);
        s.schedule(t0, "x".into());
        assert_eq!(s.poll(t0 + ms(5000)).as_deref(), Some("x"));
    }

    #[test]
    fn cancel_clears_state() {
        let t0 = Instant::now();
        let mut s = scheduler(t0);
        s.schedule(t0, "x".into());
        s.cancel();
        assert!(!s.is_pending());
        assert!(s.poll(t0 + ms(5000)).is_none());
    }
}
