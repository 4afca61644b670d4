//! Phase timeouts
//!
//! One cancellable timer per guarded phase. Arming a phase cancels whatever
//! was armed for it before. Each timer gets a fresh [`TimerId`]; a firing is
//! honoured only while that id is still the armed one, so a timer that was
//! cancelled after its expiry was already queued cannot act.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Connect,
    ServiceDiscovery,
    CharacteristicDiscovery,
    Save,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Connect => f.write_str("connect"),
            Phase::ServiceDiscovery => f.write_str("service discovery"),
            Phase::CharacteristicDiscovery => f.write_str("characteristic discovery"),
            Phase::Save => f.write_str("save"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Runs timers on behalf of the state machine. An expired timer must be
/// reported back as [`crate::Event::TimerFired`].
pub trait Scheduler {
    fn schedule(&mut self, timer: TimerId, phase: Phase, after: Duration);

    fn cancel(&mut self, timer: TimerId);
}

/// Bookkeeping of which timer currently guards each phase
#[derive(Debug, Default)]
pub struct Timers {
    armed: HashMap<Phase, TimerId>,
    next: u64,
}

impl Timers {
    pub fn arm<S: Scheduler>(
        &mut self,
        scheduler: &mut S,
        phase: Phase,
        after: Duration,
    ) -> TimerId {
        self.disarm(scheduler, phase);
        self.next += 1;
        let timer = TimerId(self.next);
        scheduler.schedule(timer, phase, after);
        self.armed.insert(phase, timer);
        timer
    }

    pub fn disarm<S: Scheduler>(&mut self, scheduler: &mut S, phase: Phase) {
        if let Some(timer) = self.armed.remove(&phase) {
            scheduler.cancel(timer);
        }
    }

    pub fn disarm_all<S: Scheduler>(&mut self, scheduler: &mut S) {
        for (_, timer) in self.armed.drain() {
            scheduler.cancel(timer);
        }
    }

    /// Consume a firing. True only if `timer` is the one armed for `phase`.
    pub fn fire(&mut self, phase: Phase, timer: TimerId) -> bool {
        if self.armed.get(&phase) == Some(&timer) {
            self.armed.remove(&phase);
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self, phase: Phase) -> bool {
        self.armed.contains_key(&phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ManualScheduler;

    #[test]
    fn rearming_cancels_previous_timer() {
        let mut scheduler = ManualScheduler::default();
        let mut timers = Timers::default();

        let first = timers.arm(&mut scheduler, Phase::Connect, Duration::from_secs(15));
        let second = timers.arm(&mut scheduler, Phase::Connect, Duration::from_secs(15));

        assert_ne!(first, second);
        assert!(scheduler.is_cancelled(first));
        assert!(!timers.fire(Phase::Connect, first));
        assert!(timers.fire(Phase::Connect, second));
        // a timer fires at most once
        assert!(!timers.fire(Phase::Connect, second));
    }

    #[test]
    fn phases_are_independent() {
        let mut scheduler = ManualScheduler::default();
        let mut timers = Timers::default();

        let save = timers.arm(&mut scheduler, Phase::Save, Duration::from_secs(10));
        timers.arm(&mut scheduler, Phase::Connect, Duration::from_secs(15));
        timers.disarm(&mut scheduler, Phase::Connect);

        assert!(!timers.is_armed(Phase::Connect));
        assert!(!timers.fire(Phase::Connect, save));
        assert!(timers.fire(Phase::Save, save));
    }

    #[test]
    fn disarm_all_invalidates_everything() {
        let mut scheduler = ManualScheduler::default();
        let mut timers = Timers::default();

        let a = timers.arm(&mut scheduler, Phase::ServiceDiscovery, Duration::from_secs(10));
        let b = timers.arm(&mut scheduler, Phase::Save, Duration::from_secs(10));
        timers.disarm_all(&mut scheduler);

        assert!(scheduler.is_cancelled(a));
        assert!(scheduler.is_cancelled(b));
        assert!(!timers.fire(Phase::ServiceDiscovery, a));
        assert!(!timers.fire(Phase::Save, b));
    }
}
