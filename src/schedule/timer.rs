//! Handles for detached timer processes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ScheduledTask, TaskKind};
use crate::tmux::Target;

/// Everything needed to find and cancel a detached timer.
///
/// The scheduler hands this back and forgets it; callers that want to cancel
/// later must keep it somewhere (the CLI keeps a JSON ledger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerHandle {
    pub id: String,
    pub pid: u32,
    pub target: Target,
    pub fire_at: DateTime<Utc>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl TimerHandle {
    pub fn new(pid: u32, target: Target, fire_at: DateTime<Utc>, note: impl Into<String>) -> Self {
        Self {
            id: new_task_id(),
            pid,
            target,
            fire_at,
            note: note.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether the fire time has passed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.fire_at <= now
    }

    /// Task view with its state derived from the clock
    pub fn to_task(&self, now: DateTime<Utc>) -> ScheduledTask {
        let mut task = ScheduledTask::new(
            self.id.clone(),
            Some(self.target.clone()),
            Some(self.fire_at),
            self.note.clone(),
            TaskKind::Ephemeral { pid: self.pid },
        );
        task.refresh(now);
        task
    }
}

/// Short random identifier for tasks and cron tags
pub fn new_task_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::TaskState;
    use chrono::Duration;

    #[test]
    fn test_task_ids_are_short_and_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_handle_to_task() {
        let now = Utc::now();
        let handle = TimerHandle::new(
            77,
            "proj:1".parse().unwrap(),
            now + Duration::minutes(15),
            "standup",
        );
        assert!(!handle.is_due(now));
        let task = handle.to_task(now);
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.kind, TaskKind::Ephemeral { pid: 77 });

        let task = handle.to_task(now + Duration::minutes(16));
        assert_eq!(task.state, TaskState::Fired);
    }
}
