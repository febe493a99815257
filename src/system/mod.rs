pub mod config;
pub mod event_log;
pub mod storage;

pub use config::*;
pub use event_log::*;
pub use storage::*;
