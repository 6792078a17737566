//! Window role and activity classification
//!
//! Roles follow the team layout agents are started in: the project manager
//! sits in window 0, QA in window 1, developers everywhere else. A window name
//! that says otherwise wins over its index.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lines from the end of a capture inspected by [`ActivityState::detect`]
pub const ACTIVITY_TAIL_LINES: usize = 20;

/// Team role of an agent window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowRole {
    ProjectManager,
    QaEngineer,
    Developer,
}

impl WindowRole {
    /// Infer the role from a window's name, falling back to its index
    pub fn detect(name: &str, index: u32) -> Self {
        let name = name.to_lowercase();
        if name.contains("project") || name.contains("manager") || name == "pm" {
            Self::ProjectManager
        } else if name.contains("qa") || name.contains("test") {
            Self::QaEngineer
        } else if name.contains("dev") || name.contains("code") {
            Self::Developer
        } else {
            match index {
                0 => Self::ProjectManager,
                1 => Self::QaEngineer,
                _ => Self::Developer,
            }
        }
    }
}

impl fmt::Display for WindowRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectManager => write!(f, "project-manager"),
            Self::QaEngineer => write!(f, "qa-engineer"),
            Self::Developer => write!(f, "developer"),
        }
    }
}

/// What the tail of a pane suggests is happening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    WaitingForInput,
    Error,
    Unknown,
}

impl ActivityState {
    /// Error lines anywhere in the tail win; otherwise a prompt on the last
    /// non-blank line means the agent is waiting.
    pub fn detect(content: &str) -> Self {
        let tail: Vec<&str> = content
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        let tail = &tail[tail.len().saturating_sub(ACTIVITY_TAIL_LINES)..];

        if tail.iter().any(|l| is_error_line(l)) {
            return Self::Error;
        }
        match tail.last() {
            Some(last) if last.ends_with(['>', '$', '#']) => Self::WaitingForInput,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForInput => write!(f, "waiting for input"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

fn is_error_line(line: &str) -> bool {
    let line = line.trim_start().to_lowercase();
    line.starts_with("error") || line.starts_with("fatal:") || line.contains("panicked at")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_name() {
        assert_eq!(WindowRole::detect("Project-Lead", 4), WindowRole::ProjectManager);
        assert_eq!(WindowRole::detect("QA", 0), WindowRole::QaEngineer);
        assert_eq!(WindowRole::detect("integration-tests", 3), WindowRole::QaEngineer);
        assert_eq!(WindowRole::detect("Code-Review", 0), WindowRole::Developer);
    }

    #[test]
    fn test_role_from_index() {
        assert_eq!(WindowRole::detect("zsh", 0), WindowRole::ProjectManager);
        assert_eq!(WindowRole::detect("zsh", 1), WindowRole::QaEngineer);
        assert_eq!(WindowRole::detect("zsh", 7), WindowRole::Developer);
        assert_eq!(WindowRole::QaEngineer.to_string(), "qa-engineer");
    }

    #[test]
    fn test_activity_detection() {
        assert_eq!(ActivityState::detect("Some output\n> \n\n"), ActivityState::WaitingForInput);
        assert_eq!(ActivityState::detect("user@host:~$ "), ActivityState::WaitingForInput);
        assert_eq!(ActivityState::detect("Error: build broke\n> "), ActivityState::Error);
        assert_eq!(
            ActivityState::detect("thread 'main' panicked at src/lib.rs:3"),
            ActivityState::Error
        );
        assert_eq!(ActivityState::detect("compiling foo"), ActivityState::Unknown);
        assert_eq!(ActivityState::detect(""), ActivityState::Unknown);
    }

    #[test]
    fn test_only_tail_counts() {
        let mut content = String::from("error: long ago\n");
        for n in 0..ACTIVITY_TAIL_LINES {
            content.push_str(&format!("step {n}\n"));
        }
        assert_eq!(ActivityState::detect(&content), ActivityState::Unknown);
    }
}
