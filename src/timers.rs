//! Cooperative timer slots.
//!
//! One slot per concern: arming a kind replaces whatever was pending for it,
//! so two timers for the same concern can never coexist. Every arm hands out
//! a `TimerToken` carrying a fresh generation. A due token is only consumed
//! by `take` while it is still the one held by its slot, so cancelled or
//! replaced timers stay quiet.

use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::debug;

/// Declaration order breaks ties between timers due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    DosingTick,
    DosingDeadline,
    ThankYouReturn,
    PinExpiry,
    PinErrorFlash,
    CleaningPhase,
    SamplerPour,
}

impl TimerKind {
    pub const COUNT: usize = 7;

    fn slot(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub kind: TimerKind,
    generation: u32,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    deadline: Instant,
    period: Option<Duration>,
    generation: u32,
}

#[derive(Debug, Default)]
pub struct TimerSlots {
    slots: [Option<Armed>; TimerKind::COUNT],
    generation: u32,
}

impl TimerSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, kind: TimerKind, now: Instant, after: Duration) -> TimerToken {
        self.install(kind, now + after, None)
    }

    /// Fires every `period`, first at `now + period`, until cancelled.
    pub fn arm_periodic(&mut self, kind: TimerKind, now: Instant, period: Duration) -> TimerToken {
        self.install(kind, now + period, Some(period))
    }

    fn install(&mut self, kind: TimerKind, deadline: Instant, period: Option<Duration>) -> TimerToken {
        self.generation = self.generation.wrapping_add(1);
        let replaced = self.slots[kind.slot()]
            .replace(Armed {
                deadline,
                period,
                generation: self.generation,
            })
            .is_some();
        debug!(
            "Timer {:?} armed for {}ms{}",
            kind,
            deadline.as_millis(),
            if replaced { " (replaced pending)" } else { "" }
        );
        TimerToken {
            kind,
            generation: self.generation,
        }
    }

    /// Returns true if something was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let cancelled = self.slots[kind.slot()].take().is_some();
        if cancelled {
            debug!("Timer {:?} cancelled", kind);
        }
        cancelled
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.slot()].is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|armed| armed.deadline).min()
    }

    /// Snapshot of every timer due at `now` with the instant it was due,
    /// earliest first.
    pub fn due(&self, now: Instant) -> Vec<(TimerToken, Instant), { TimerKind::COUNT }> {
        let mut due: Vec<_, { TimerKind::COUNT }> = self
            .slots
            .iter()
            .zip(ALL_KINDS)
            .filter_map(|(slot, kind)| slot.map(|armed| (kind, armed)))
            .filter(|(_, armed)| armed.deadline <= now)
            .map(|(kind, armed)| {
                (
                    TimerToken {
                        kind,
                        generation: armed.generation,
                    },
                    armed.deadline,
                )
            })
            .collect();
        due.sort_unstable_by_key(|(token, deadline)| (*deadline, token.kind));
        due
    }

    /// Consumes the expiry `due_at` of `token`. Returns false if the token was
    /// cancelled, replaced or already consumed for that instant. One-shot
    /// timers are disarmed, periodic ones move on by one period.
    pub fn take(&mut self, token: TimerToken, due_at: Instant) -> bool {
        let slot = &mut self.slots[token.kind.slot()];
        match *slot {
            Some(armed) if armed.generation == token.generation && armed.deadline == due_at => {
                *slot = armed.period.map(|period| Armed {
                    deadline: armed.deadline + period,
                    ..armed
                });
                true
            }
            _ => false,
        }
    }
}

const ALL_KINDS: [TimerKind; TimerKind::COUNT] = [
    TimerKind::DosingTick,
    TimerKind::DosingDeadline,
    TimerKind::ThankYouReturn,
    TimerKind::PinExpiry,
    TimerKind::PinErrorFlash,
    TimerKind::CleaningPhase,
    TimerKind::SamplerPour,
];
