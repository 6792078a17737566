//! Live directory of tmux sessions and windows
//!
//! Always queries tmux; nothing is cached because sessions and windows change
//! underneath us at any time.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{CommandExecutor, Target};
use crate::error::{ExecutionError, Result};

const SESSION_FORMAT: &str = "#{session_name}:#{session_attached}";
const WINDOW_FORMAT: &str = "#{window_index}:#{window_name}:#{window_active}";

/// A tmux window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub index: u32,
    pub name: String,
    pub active: bool,
}

/// A tmux session with its windows in index order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub attached: bool,
    pub windows: Vec<Window>,
}

impl Session {
    pub fn window(&self, index: u32) -> Option<&Window> {
        self.windows.iter().find(|w| w.index == index)
    }
}

/// What `find_by_name` matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchScope {
    /// Window names only
    #[default]
    Windows,
    /// Window names and session names
    IncludeSessions,
}

/// Whether tmux stderr means "there is no server", which is an empty listing
pub fn is_no_server_error(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no server running")
        || stderr.contains("error connecting to")
        || stderr.contains("failed to connect to server")
        || stderr.contains("no sessions")
}

pub(crate) fn is_missing_target_error(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("can't find") || stderr.contains("no such")
}

/// Parse `list-sessions` output into `(name, attached)` pairs
pub fn parse_sessions(output: &str) -> Vec<(String, bool)> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match line.rsplit_once(':') {
            Some((name, attached)) if !name.is_empty() => {
                Some((name.to_string(), attached.trim() != "0"))
            }
            _ => {
                warn!("Skipping malformed list-sessions line: {:?}", line);
                None
            }
        })
        .collect()
}

/// Parse `list-windows` output. Window names may themselves contain `:`.
pub fn parse_windows(output: &str) -> Vec<Window> {
    let mut windows: Vec<Window> = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let (index, rest) = line.split_once(':')?;
            let (name, active) = rest.rsplit_once(':')?;
            match index.trim().parse::<u32>() {
                Ok(index) => Some(Window {
                    index,
                    name: name.to_string(),
                    active: active.trim() == "1",
                }),
                Err(_) => {
                    warn!("Skipping malformed list-windows line: {:?}", line);
                    None
                }
            }
        })
        .collect();
    windows.sort_by_key(|w| w.index);
    windows
}

/// Session/window lookups against the live tmux server
#[derive(Clone)]
pub struct SessionDirectory {
    executor: CommandExecutor,
}

impl SessionDirectory {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    /// All sessions and their windows. No server means no sessions.
    #[instrument(skip(self))]
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let result = self
            .executor
            .secure_tmux("list-sessions", &["-F", SESSION_FORMAT])
            .await?;

        if result.is_spawn_failure() {
            return Err(ExecutionError::NotInstalled {
                binary: self.executor.tmux_binary().to_string(),
            }
            .into());
        }
        if !result.success && is_no_server_error(&result.stderr) {
            debug!("No tmux server running");
            return Ok(Vec::new());
        }
        let result = result.into_checked()?;

        let mut sessions = Vec::new();
        for (name, attached) in parse_sessions(&result.stdout) {
            // `=` forces an exact session match instead of tmux's prefix matching
            let exact = format!("={name}");
            let windows = self
                .executor
                .secure_tmux("list-windows", &["-t", exact.as_str(), "-F", WINDOW_FORMAT])
                .await?;

            if !windows.success
                && (is_missing_target_error(&windows.stderr) || is_no_server_error(&windows.stderr))
            {
                debug!("Session {} disappeared during listing", name);
                continue;
            }
            let windows = windows.into_checked()?;

            sessions.push(Session {
                name,
                attached,
                windows: parse_windows(&windows.stdout),
            });
        }

        Ok(sessions)
    }

    /// Case-insensitive substring search, in session-then-window order
    pub async fn find_by_name(&self, pattern: &str, scope: MatchScope) -> Result<Vec<(String, u32)>> {
        let sessions = self.list_sessions().await?;
        Ok(match_windows(&sessions, pattern, scope))
    }

    /// Exact session lookup
    pub async fn find_session(&self, name: &str) -> Result<Option<Session>> {
        let sessions = self.list_sessions().await?;
        Ok(sessions.into_iter().find(|s| s.name == name))
    }

    /// Whether tmux can resolve `target` right now
    pub async fn target_exists(&self, target: &Target) -> Result<bool> {
        let rendered = target.to_string();
        let result = self
            .executor
            .secure_tmux("list-panes", &["-t", rendered.as_str()])
            .await?;

        if result.success {
            Ok(true)
        } else if is_missing_target_error(&result.stderr) || is_no_server_error(&result.stderr) {
            Ok(false)
        } else {
            result.into_checked()?;
            Ok(false)
        }
    }
}

/// Pure matching over an already fetched listing
pub fn match_windows(sessions: &[Session], pattern: &str, scope: MatchScope) -> Vec<(String, u32)> {
    let needle = pattern.to_lowercase();
    let needle = needle.as_str();
    sessions
        .iter()
        .flat_map(|session| {
            let session_hit =
                scope == MatchScope::IncludeSessions && session.name.to_lowercase().contains(needle);
            session
                .windows
                .iter()
                .filter(move |w| session_hit || w.name.to_lowercase().contains(needle))
                .map(move |w| (session.name.clone(), w.index))
        })
        .collect()
}
