//! Error types for the kiosk core.

use crate::types::{PortionSize, Screen};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum KioskError {
    #[error("Current PIN is incorrect")]
    CurrentPinIncorrect,

    #[error("PIN must be 4 digits")]
    PinFormat,

    #[error("PINs do not match")]
    PinMismatch,

    #[error("At least one portion must be enabled at all times")]
    LastPortionDisabled,

    #[error("Invalid price for {0}: prices must be zero or more")]
    InvalidPrice(PortionSize),

    #[error("Invalid volume for {0}: volume must be positive")]
    InvalidVolume(PortionSize),

    #[error("{0} portion is not available")]
    PortionUnavailable(PortionSize),

    #[error("Action not available on the {0:?} screen")]
    WrongScreen(Screen),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl KioskError {
    /// Validation and invariant errors are shown inline and never change screens.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KioskError::CurrentPinIncorrect
                | KioskError::PinFormat
                | KioskError::PinMismatch
                | KioskError::LastPortionDisabled
                | KioskError::InvalidPrice(_)
                | KioskError::InvalidVolume(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KioskError>;
