//! Operator sampler: test pours of an adjustable volume.

use crate::types::{SAMPLER_DEFAULT_ML, SAMPLER_MAX_ML, SAMPLER_MIN_ML, SAMPLER_STEP_ML};
use log::debug;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sampler {
    volume_ml: u32,
    pouring: bool,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            volume_ml: SAMPLER_DEFAULT_ML,
            pouring: false,
        }
    }
}

impl Sampler {
    pub fn volume_ml(&self) -> u32 {
        self.volume_ml
    }

    pub fn is_pouring(&self) -> bool {
        self.pouring
    }

    /// Volume is locked while a pour is running.
    pub fn increase(&mut self) -> u32 {
        if !self.pouring {
            self.volume_ml = (self.volume_ml + SAMPLER_STEP_ML).min(SAMPLER_MAX_ML);
        }
        self.volume_ml
    }

    pub fn decrease(&mut self) -> u32 {
        if !self.pouring {
            self.volume_ml = self
                .volume_ml
                .saturating_sub(SAMPLER_STEP_ML)
                .max(SAMPLER_MIN_ML);
        }
        self.volume_ml
    }

    /// Returns the poured volume, or `None` if a pour is already running.
    pub fn begin_pour(&mut self) -> Option<u32> {
        if self.pouring {
            debug!("Sampler busy - pour ignored");
            return None;
        }
        self.pouring = true;
        Some(self.volume_ml)
    }

    pub fn finish_pour(&mut self) {
        self.pouring = false;
    }
}
