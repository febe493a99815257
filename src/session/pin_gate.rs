//! Modal PIN challenge guarding the operator menu.
//! The gate only holds the challenge; expiry and the error flash are timed by
//! the controller's timer slots.

use crate::types::PIN_LENGTH;
use embassy_time::Instant;
use heapless::String;
use log::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinChallenge {
    entered: String<PIN_LENGTH>,
    pub attempt_failed: bool,
    pub expires_at: Instant,
}

impl PinChallenge {
    pub fn entered_len(&self) -> usize {
        self.entered.len()
    }

    pub fn can_submit(&self) -> bool {
        self.entered.len() == PIN_LENGTH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Granted,
    Rejected,
    /// Submit is disabled until exactly four digits are entered.
    Incomplete,
    /// No challenge is open.
    Closed,
}

#[derive(Debug, Default)]
pub struct PinGate {
    challenge: Option<PinChallenge>,
}

impl PinGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh challenge, replacing any open one.
    pub fn open(&mut self, expires_at: Instant) {
        if self.challenge.is_some() {
            debug!("PIN challenge reopened - previous one discarded");
        }
        self.challenge = Some(PinChallenge {
            entered: String::new(),
            attempt_failed: false,
            expires_at,
        });
        info!("PIN challenge opened");
    }

    pub fn close(&mut self) -> bool {
        self.challenge.take().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.challenge.is_some()
    }

    pub fn challenge(&self) -> Option<&PinChallenge> {
        self.challenge.as_ref()
    }

    /// Ignores anything that is not a single decimal digit, and digits past
    /// the fourth. Returns whether the digit was taken.
    pub fn append_digit(&mut self, digit: char) -> bool {
        let Some(challenge) = self.challenge.as_mut() else {
            return false;
        };
        if !digit.is_ascii_digit() || challenge.entered.len() >= PIN_LENGTH {
            return false;
        }
        let accepted = challenge.entered.push(digit).is_ok();
        if accepted {
            challenge.attempt_failed = false;
        }
        accepted
    }

    pub fn delete_digit(&mut self) -> bool {
        let Some(challenge) = self.challenge.as_mut() else {
            return false;
        };
        let removed = challenge.entered.pop().is_some();
        if removed {
            challenge.attempt_failed = false;
        }
        removed
    }

    /// On success the challenge is consumed. On failure the digits stay for correction.
    pub fn submit(&mut self, stored_pin: &str) -> PinOutcome {
        let Some(challenge) = self.challenge.as_mut() else {
            return PinOutcome::Closed;
        };
        if !challenge.can_submit() {
            return PinOutcome::Incomplete;
        }

        if challenge.entered.as_str() == stored_pin {
            self.challenge = None;
            info!("PIN accepted");
            PinOutcome::Granted
        } else {
            challenge.attempt_failed = true;
            info!("PIN rejected");
            PinOutcome::Rejected
        }
    }

    pub fn clear_error(&mut self) {
        if let Some(challenge) = self.challenge.as_mut() {
            challenge.attempt_failed = false;
        }
    }
}
