//! Configuration and persistence module
//!
//! Handles:
//! - User configuration (`config.toml` in the platform config dir)
//! - Timer ledger (`timers.json` in the platform data dir)

mod settings;
mod storage;

pub use settings::*;
pub use storage::*;
