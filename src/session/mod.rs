//! Screen navigation state: the current screen plus a single back-pointer.

pub mod pin_gate;

pub use pin_gate::*;

use crate::types::{PortionSize, Screen, DOSING_PROGRESS_STEP, DOSING_TICKS};
use log::info;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct ScreenSession {
    current: Screen,
    previous: Option<Screen>,
}

impl Default for ScreenSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenSession {
    pub fn new() -> Self {
        Self {
            current: Screen::Home,
            previous: None,
        }
    }

    pub fn current(&self) -> Screen {
        self.current
    }

    pub fn previous(&self) -> Option<Screen> {
        self.previous
    }

    /// No-op when `target` is already current. Only one level is remembered,
    /// so a remembering navigation overwrites any earlier back-pointer.
    pub fn navigate(&mut self, target: Screen, remember_current_as_previous: bool) -> Screen {
        if target == self.current {
            return self.current;
        }

        if remember_current_as_previous {
            self.previous = Some(self.current);
        } else if self.previous == Some(target) {
            self.previous = None;
        }

        info!("Screen transition: {:?} -> {:?}", self.current, target);
        self.current = target;
        self.current
    }

    /// Where "back" leads from the current screen, without moving.
    pub fn back_target(&self) -> Screen {
        match self.current {
            Screen::ServiceMenu => Screen::Home,
            screen if screen.is_service() => self.previous.unwrap_or(Screen::ServiceMenu),
            _ => Screen::Home,
        }
    }

    pub fn go_back(&mut self) -> Screen {
        let target = self.back_target();
        self.previous = None;
        self.navigate(target, false)
    }

    /// Leaving the operator area forgets any service back-pointer.
    pub fn forget_previous(&mut self) {
        self.previous = None;
    }
}

/// Progress of an in-flight pour on the Dosing screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DosingRun {
    pub portion: PortionSize,
    pub volume_ml: u32,
    pub ticks: u8,
}

impl DosingRun {
    pub fn new(portion: PortionSize, volume_ml: u32) -> Self {
        Self {
            portion,
            volume_ml,
            ticks: 0,
        }
    }

    /// Returns true once the final tick has been reached.
    pub fn tick(&mut self) -> bool {
        if self.ticks < DOSING_TICKS {
            self.ticks += 1;
        }
        self.ticks >= DOSING_TICKS
    }

    pub fn progress(&self) -> u8 {
        (self.ticks * DOSING_PROGRESS_STEP).min(100)
    }

    pub fn seconds_remaining(&self) -> u8 {
        DOSING_TICKS.saturating_sub(self.ticks)
    }

    pub fn status_message(&self) -> String {
        match self.seconds_remaining() {
            0 => "Almost ready...".to_string(),
            1 => "Estimated time: 1 second".to_string(),
            n => format!("Estimated time: {} seconds", n),
        }
    }
}
