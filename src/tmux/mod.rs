//! Tmux bridge module
//!
//! Everything that talks to tmux:
//! - `CommandExecutor` - Allow-listed, argv-only process execution
//! - `Target` - `session:window[.pane]` addresses
//! - `SessionDirectory` - Live session/window listing and lookup
//! - `MessageDelivery` - Two-phase text-then-Enter delivery
//! - `ContentCapture` - Defensive scrollback capture
//! - `StatusMonitor` - Per-window status reports and snapshots

mod activity;
mod capture;
mod delivery;
mod directory;
mod executor;
mod monitor;
mod target;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::*;
pub use capture::*;
pub use delivery::*;
pub use directory::*;
pub use executor::*;
pub use monitor::*;
pub use target::*;
