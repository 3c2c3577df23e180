//! Frame scheduling for the simulation loop.
//!
//! A [`FrameScheduler`] hands out [`FrameToken`]s for continuations that
//! should fire after a delay and lets the caller cancel them again. The
//! scheduler never calls back into the simulation itself; the host loop asks
//! it which token is due and forwards that token to whoever scheduled it.
//! This keeps the simulation's state machine testable without a display.
//!
//! - [`PacedScheduler`] waits out the delay, then holds the continuation
//!   until the next display refresh (the host reports refreshes through
//!   [`PacedScheduler::on_refresh`]).
//! - [`ManualScheduler`] records requests and fires them only when told to.

use std::cell::Cell;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameToken(u64);

impl FrameToken {
    pub fn id(self) -> u64 {
        self.0
    }
}

pub trait FrameScheduler {
    fn schedule_next(&mut self, delay: Duration) -> FrameToken;

    /// Cancels a continuation. Unknown or already fired tokens are ignored.
    fn cancel(&mut self, token: FrameToken);
}

impl<S: FrameScheduler + ?Sized> FrameScheduler for Box<S> {
    fn schedule_next(&mut self, delay: Duration) -> FrameToken {
        (**self).schedule_next(delay)
    }

    fn cancel(&mut self, token: FrameToken) {
        (**self).cancel(token)
    }
}

/// Source of "now" for the paced scheduler.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when advanced explicitly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Cell::new(Instant::now()),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    /// A continuation is waiting for its delay to elapse.
    Waiting(Instant),
    /// The delay has elapsed; the host should request a display refresh and
    /// call [`PacedScheduler::on_refresh`] when it happens.
    RefreshNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    AwaitingRefresh,
}

#[derive(Debug, Clone, Copy)]
struct PendingFrame {
    token: FrameToken,
    deadline: Instant,
    phase: Phase,
}

/// Timer-then-refresh scheduler. At most one continuation is pending; a new
/// request replaces any earlier one.
pub struct PacedScheduler<C: Clock = SystemClock> {
    clock: C,
    next_id: u64,
    pending: Option<PendingFrame>,
}

impl PacedScheduler<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for PacedScheduler<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> PacedScheduler<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            next_id: 0,
            pending: None,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Deadline of a continuation still inside its delay.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .filter(|pending| pending.phase == Phase::Waiting)
            .map(|pending| pending.deadline)
    }

    pub fn poll(&mut self, now: Instant) -> PollOutcome {
        let Some(pending) = self.pending.as_mut() else {
            return PollOutcome::Idle;
        };
        match pending.phase {
            Phase::AwaitingRefresh => PollOutcome::RefreshNeeded,
            Phase::Waiting if now >= pending.deadline => {
                pending.phase = Phase::AwaitingRefresh;
                PollOutcome::RefreshNeeded
            }
            Phase::Waiting => PollOutcome::Waiting(pending.deadline),
        }
    }

    /// Reports a display refresh. Returns the token that is now due, if the
    /// pending continuation has finished its delay.
    pub fn on_refresh(&mut self) -> Option<FrameToken> {
        let now = self.clock.now();
        match self.poll(now) {
            PollOutcome::RefreshNeeded => self.pending.take().map(|pending| pending.token),
            PollOutcome::Idle | PollOutcome::Waiting(_) => None,
        }
    }
}

impl<C: Clock> FrameScheduler for PacedScheduler<C> {
    fn schedule_next(&mut self, delay: Duration) -> FrameToken {
        let token = FrameToken(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.pending = Some(PendingFrame {
            token,
            deadline: self.clock.now() + delay,
            phase: Phase::Waiting,
        });
        token
    }

    fn cancel(&mut self, token: FrameToken) {
        if self.pending.map(|pending| pending.token) == Some(token) {
            self.pending = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledFrame {
    pub token: FrameToken,
    pub delay: Duration,
}

/// Scheduler that fires continuations only on request, in request order.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    pending: Vec<ScheduledFrame>,
    cancelled: usize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[ScheduledFrame] {
        &self.pending
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled
    }

    pub fn fire_next(&mut self) -> Option<FrameToken> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0).token)
        }
    }
}

impl FrameScheduler for ManualScheduler {
    fn schedule_next(&mut self, delay: Duration) -> FrameToken {
        let token = FrameToken(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.pending.push(ScheduledFrame { token, delay });
        token
    }

    fn cancel(&mut self, token: FrameToken) {
        let before = self.pending.len();
        self.pending.retain(|frame| frame.token != token);
        if self.pending.len() != before {
            self.cancelled += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paced_waits_for_delay_then_refresh() {
        let clock = ManualClock::new();
        let mut scheduler = PacedScheduler::with_clock(&clock);
        let token = scheduler.schedule_next(Duration::from_millis(200));

        let deadline = scheduler.next_deadline().expect("deadline");
        assert_eq!(scheduler.poll(clock.now()), PollOutcome::Waiting(deadline));
        assert_eq!(scheduler.on_refresh(), None, "refresh before delay is ignored");

        clock.advance(Duration::from_millis(200));
        assert_eq!(scheduler.poll(clock.now()), PollOutcome::RefreshNeeded);
        assert_eq!(scheduler.next_deadline(), None);
        assert_eq!(scheduler.on_refresh(), Some(token));
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.poll(clock.now()), PollOutcome::Idle);
    }

    #[test]
    fn paced_cancel_clears_matching_token_only() {
        let clock = ManualClock::new();
        let mut scheduler = PacedScheduler::with_clock(&clock);
        let first = scheduler.schedule_next(Duration::ZERO);
        let second = scheduler.schedule_next(Duration::ZERO);
        assert_ne!(first, second);

        scheduler.cancel(first);
        assert!(!scheduler.is_idle(), "stale token must not cancel newer request");
        scheduler.cancel(second);
        assert!(scheduler.is_idle());
        scheduler.cancel(second);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn paced_zero_delay_is_due_on_next_refresh() {
        let clock = ManualClock::new();
        let mut scheduler = PacedScheduler::with_clock(&clock);
        let token = scheduler.schedule_next(Duration::ZERO);
        assert_eq!(scheduler.on_refresh(), Some(token));
    }

    #[test]
    fn manual_fires_in_request_order() {
        let mut scheduler = ManualScheduler::new();
        let a = scheduler.schedule_next(Duration::from_millis(10));
        let b = scheduler.schedule_next(Duration::from_millis(20));
        assert_eq!(scheduler.pending().len(), 2);
        assert_eq!(scheduler.pending()[1].delay, Duration::from_millis(20));
        assert_eq!(scheduler.fire_next(), Some(a));
        assert_eq!(scheduler.fire_next(), Some(b));
        assert_eq!(scheduler.fire_next(), None);
    }

    #[test]
    fn manual_cancel_counts_only_real_removals() {
        let mut scheduler = ManualScheduler::new();
        let token = scheduler.schedule_next(Duration::from_millis(5));
        scheduler.cancel(token);
        scheduler.cancel(token);
        assert_eq!(scheduler.cancelled(), 1);
        assert!(scheduler.pending().is_empty());
    }
}
