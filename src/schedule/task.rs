//! Scheduled task records and their state machine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::tmux::Target;

/// Lifecycle of a scheduled delivery.
///
/// `Pending → Fired` or `Pending → Cancelled`; both end states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Fired,
    Cancelled,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fired => write!(f, "fired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a task is going to fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Detached sleeping process
    Ephemeral { pid: u32 },
    /// Tagged crontab line
    Cron { schedule: String, command: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    /// Known for deliveries; `None` for arbitrary cron commands
    pub target: Option<Target>,
    /// One-shot fire time; recurring jobs have none
    pub fire_at: Option<DateTime<Utc>>,
    pub note: String,
    #[serde(flatten)]
    pub kind: TaskKind,
    pub state: TaskState,
}

impl ScheduledTask {
    pub fn new(
        id: impl Into<String>,
        target: Option<Target>,
        fire_at: Option<DateTime<Utc>>,
        note: impl Into<String>,
        kind: TaskKind,
    ) -> Self {
        Self {
            id: id.into(),
            target,
            fire_at,
            note: note.into(),
            kind,
            state: TaskState::Pending,
        }
    }

    fn transition(&mut self, to: TaskState) -> Result<(), ScheduleError> {
        if self.state != TaskState::Pending {
            return Err(ScheduleError::InvalidTransition {
                id: self.id.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Timer elapsed or cron matched
    pub fn fire(&mut self) -> Result<(), ScheduleError> {
        self.transition(TaskState::Fired)
    }

    /// Cancelled before firing
    pub fn cancel(&mut self) -> Result<(), ScheduleError> {
        self.transition(TaskState::Cancelled)
    }

    /// Mark a pending one-shot task as fired once its time has passed
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        if self.state == TaskState::Pending && self.fire_at.is_some_and(|at| at <= now) {
            self.state = TaskState::Fired;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(fire_at: Option<DateTime<Utc>>) -> ScheduledTask {
        ScheduledTask::new(
            "abc123",
            Some("proj:0".parse().unwrap()),
            fire_at,
            "check in",
            TaskKind::Ephemeral { pid: 10 },
        )
    }

    #[test]
    fn test_pending_transitions() {
        let mut fired = task(None);
        assert!(fired.is_pending());
        fired.fire().unwrap();
        assert_eq!(fired.state, TaskState::Fired);

        let mut cancelled = task(None);
        cancelled.cancel().unwrap();
        assert_eq!(cancelled.state, TaskState::Cancelled);
    }

    #[test]
    fn test_final_states_reject_transitions() {
        let mut fired = task(None);
        fired.fire().unwrap();
        assert!(matches!(
            fired.cancel(),
            Err(ScheduleError::InvalidTransition { .. })
        ));
        assert!(fired.fire().is_err());

        let mut cancelled = task(None);
        cancelled.cancel().unwrap();
        assert!(cancelled.fire().is_err());
    }

    #[test]
    fn test_refresh_fires_elapsed_tasks() {
        let now = Utc::now();
        let mut due = task(Some(now - Duration::seconds(1)));
        due.refresh(now);
        assert_eq!(due.state, TaskState::Fired);

        let mut later = task(Some(now + Duration::minutes(5)));
        later.refresh(now);
        assert!(later.is_pending());

        let mut recurring = task(None);
        recurring.refresh(now);
        assert!(recurring.is_pending());
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_value(task(None)).unwrap();
        assert_eq!(json["kind"], "ephemeral");
        assert_eq!(json["pid"], 10);
        assert_eq!(json["state"], "pending");
        assert_eq!(json["target"], "proj:0");
    }
}
