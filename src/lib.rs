pub mod cleaning;
pub mod console;
pub mod controller;
pub mod error;
pub mod pricing;
pub mod service;
pub mod session;
pub mod system;
pub mod timers;
pub mod types;

pub use controller::*;
pub use error::{KioskError, StorageError};
pub use types::*;
