//! tmux-bridge - Secure bridge for driving interactive AI agents inside tmux
//!
//! Agents run as long-lived interactive processes in tmux windows. This crate
//! mediates every interaction with the tmux control plane: it runs commands
//! through an allow-listed executor, looks up sessions, types messages into
//! prompts, captures scrollback and schedules deliveries for later.
//!
//! # Modules
//!
//! - [`tmux`] - Executor, directory, delivery, capture and status monitoring
//! - [`schedule`] - Detached timers and crontab jobs
//! - [`paths`] - Traversal-safe path resolution
//! - [`config`] - Configuration and the timer ledger
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod paths;
pub mod schedule;
pub mod tmux;

pub use config::{Config, TimerLedger};
pub use error::{Error, Result};
pub use paths::PathResolver;
pub use schedule::{CronEntry, ScheduledTask, Scheduler, TaskState, TimerHandle};
pub use tmux::{
    CommandExecutor, CommandOutput, ContentCapture, ExecutionResult, MessageDelivery,
    SessionDirectory, StatusMonitor, Target,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
