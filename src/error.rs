//! Error types for tmux-bridge
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for tmux-bridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error was raised before any external process was spawned
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Input rejected before any external call is made. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid target '{input}': {reason}")]
    InvalidTarget { input: String, reason: String },

    #[error("Binary '{0}' is not in the allow-list")]
    BinaryNotAllowed(String),

    #[error("Unsafe argument at position {index}: {reason}")]
    UnsafeArgument { index: usize, reason: String },

    #[error("Path '{candidate}' escapes base directory {base:?}")]
    PathTraversal { base: PathBuf, candidate: String },

    #[error("Base directory must be absolute: {0:?}")]
    RelativeBase(PathBuf),

    #[error("Cannot send an empty message")]
    EmptyMessage,

    #[error("Line count must be positive, got {0}")]
    InvalidLineCount(usize),

    #[error("Delay out of range: {0:?}")]
    InvalidDelay(Duration),

    #[error("Invalid cron schedule '{schedule}': {reason}")]
    InvalidCronSchedule { schedule: String, reason: String },

    #[error("Unsafe cron command: {0}")]
    UnsafeCronCommand(String),
}

/// External process failures
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("{binary} is not installed or not in PATH")]
    NotInstalled { binary: String },

    #[error("Failed to spawn `{command}`: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Command `{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Tmux target '{0}' does not exist")]
    TargetNotFound(String),

    #[error("Failed to parse command output: {0}")]
    ParseError(String),

    #[error("Executor semaphore closed")]
    SemaphoreClosed,
}

/// Scheduling errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Scheduled task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Failed to cancel task {id}: {reason}")]
    CancelFailed { id: String, reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Failed to create directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;
