//! Scheduler for time-shifted deliveries
//!
//! Ephemeral timers re-run this binary detached (`deliver` subcommand) and are
//! forgotten once spawned. Durable jobs live in the user's crontab as tagged
//! lines and survive reboots.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{
    join_table, new_task_id, parse_cron_table, remove_tagged, tag_id, validate_cron_command,
    validate_cron_schedule, CronEntry, ScheduledTask, TimerHandle,
};
use crate::error::{Result, ScheduleError, ValidationError};
use crate::tmux::{validate_argument, CommandExecutor, ExecutionResult, MessageDelivery, Target};

/// Binary used to read and write the user's crontab
pub const CRONTAB_BINARY: &str = "crontab";

/// Schedules deliveries through detached timers and crontab jobs
#[derive(Clone)]
pub struct Scheduler {
    executor: CommandExecutor,
    delivery: MessageDelivery,
    self_exe: PathBuf,
    /// Held across every crontab read-modify-write
    crontab_lock: Arc<Mutex<()>>,
}

impl Scheduler {
    /// `self_exe` is the bridge binary that timers and cron jobs re-invoke;
    /// it is added to the executor's allow-list.
    pub fn new(executor: CommandExecutor, delivery: MessageDelivery, self_exe: impl Into<PathBuf>) -> Self {
        let self_exe = self_exe.into();
        let executor = executor.allow_binary(self_exe.to_string_lossy().into_owned());
        Self {
            executor,
            delivery,
            self_exe,
            crontab_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn self_exe(&self) -> &Path {
        &self.self_exe
    }

    fn self_exe_str(&self) -> String {
        self.self_exe.to_string_lossy().into_owned()
    }

    /// Spawn a detached timer that delivers `note` to `target` after `delay`
    #[instrument(skip(self, note), fields(target = %target, delay = ?delay))]
    pub async fn schedule_in(&self, delay: Duration, target: &Target, note: &str) -> Result<TimerHandle> {
        if note.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let secs = delay.as_secs();
        let offset = i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or(ValidationError::InvalidDelay(delay))?;
        let fire_at = Utc::now()
            .checked_add_signed(offset)
            .ok_or(ValidationError::InvalidDelay(delay))?;

        let argv = deliver_argv(secs, self.delivery.settle_interval(), target, note);
        let pid = self.executor.spawn_detached(&self.self_exe_str(), &argv).await?;

        let handle = TimerHandle::new(pid, target.clone(), fire_at, note);
        info!("Timer {} (pid {}) will deliver to {} at {}", handle.id, pid, target, fire_at);
        Ok(handle)
    }

    /// Terminate a pending timer.
    ///
    /// Fails with an invalid transition once the fire time has passed, and with
    /// `TaskNotFound` when the process is already gone. The pid is only
    /// trusted until it exits; a reused pid would be signalled too.
    #[instrument(skip(self, handle), fields(id = %handle.id, pid = handle.pid))]
    pub fn cancel_timer(&self, handle: &TimerHandle) -> Result<ScheduledTask> {
        let mut task = handle.to_task(Utc::now());
        task.cancel()?;

        let pid = i32::try_from(handle.pid).map_err(|_| ScheduleError::CancelFailed {
            id: handle.id.clone(),
            reason: format!("pid {} out of range", handle.pid),
        })?;

        // The timer leads its own process group, so any tmux child goes too
        match killpg(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                info!("Cancelled timer {}", handle.id);
                Ok(task)
            }
            Err(Errno::ESRCH) => Err(ScheduleError::TaskNotFound(handle.id.clone()).into()),
            Err(e) => Err(ScheduleError::CancelFailed {
                id: handle.id.clone(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    /// Body of a detached timer: wait, then deliver
    #[instrument(skip(self, message), fields(target = %target))]
    pub async fn run_delivery(&self, delay: Duration, target: &Target, message: &str) -> Result<ExecutionResult> {
        debug!("Sleeping {:?} before delivery", delay);
        tokio::time::sleep(delay).await;
        self.delivery.send_to(target, message).await
    }

    async fn read_crontab(&self) -> Result<String> {
        let result = self.executor.execute(CRONTAB_BINARY, &["-l"]).await?;
        if !result.success && result.stderr.to_lowercase().contains("no crontab for") {
            return Ok(String::new());
        }
        Ok(result.into_checked()?.stdout)
    }

    async fn write_crontab(&self, table: &str) -> Result<()> {
        self.executor
            .execute_with_input(CRONTAB_BINARY, &["-"], table, self.executor.timeout())
            .await?
            .into_checked()?;
        Ok(())
    }

    /// Append a tagged job to the user's crontab
    #[instrument(skip(self))]
    pub async fn add_cron(&self, schedule: &str, command: &str) -> Result<CronEntry> {
        validate_cron_schedule(schedule)?;
        validate_cron_command(command)?;

        let _guard = self.crontab_lock.lock().await;
        let table = self.read_crontab().await?;
        let taken: HashSet<&str> = table.lines().filter_map(tag_id).collect();
        let id = loop {
            let id = new_task_id();
            if !taken.contains(id.as_str()) {
                break id;
            }
        };

        let line = CronEntry::render(schedule, command, &id);
        let mut lines: Vec<&str> = table.lines().collect();
        lines.push(&line);
        self.write_crontab(&join_table(&lines)).await?;

        info!("Added cron job {}", id);
        Ok(CronEntry {
            id,
            schedule: schedule.trim().to_string(),
            command: command.trim().to_string(),
            line,
        })
    }

    /// Tagged jobs currently in the crontab
    pub async fn list_cron(&self) -> Result<Vec<CronEntry>> {
        Ok(parse_cron_table(&self.read_crontab().await?))
    }

    /// Remove every line tagged with `id`, leaving all other lines untouched
    #[instrument(skip(self))]
    pub async fn remove_cron(&self, id: &str) -> Result<ScheduledTask> {
        let _guard = self.crontab_lock.lock().await;
        let table = self.read_crontab().await?;
        let entry = parse_cron_table(&table)
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ScheduleError::TaskNotFound(id.to_string()))?;

        let (kept, removed) = remove_tagged(&table, id);
        if removed > 1 {
            warn!("Cron tag {} appeared on {} lines", id, removed);
        }
        self.write_crontab(&kept).await?;

        let mut task = entry.to_task();
        task.cancel()?;
        info!("Removed cron job {}", id);
        Ok(task)
    }

    /// Crontab command that re-invokes `send` for this binary
    pub fn cron_delivery_command(&self, target: &Target, message: &str) -> Result<String> {
        if message.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        validate_argument(0, message)?;

        let exe = self.self_exe_str();
        let target = target.to_string();
        let parts = [exe.as_str(), "send", "--", target.as_str(), message];
        let command = shlex::try_join(parts)
            .map_err(|e| ValidationError::UnsafeCronCommand(e.to_string()))?;
        validate_cron_command(&command)?;
        Ok(command)
    }

    /// Recurring delivery of `message` to `target`
    pub async fn schedule_recurring_delivery(
        &self,
        schedule: &str,
        target: &Target,
        message: &str,
    ) -> Result<CronEntry> {
        let command = self.cron_delivery_command(target, message)?;
        self.add_cron(schedule, &command).await
    }
}

/// Arguments for the hidden `deliver` subcommand
fn deliver_argv(delay_secs: u64, settle: Duration, target: &Target, message: &str) -> Vec<String> {
    vec![
        "deliver".to_string(),
        "--delay-secs".to_string(),
        delay_secs.to_string(),
        "--settle-ms".to_string(),
        settle.as_millis().to_string(),
        "--".to_string(),
        target.to_string(),
        message.to_string(),
    ]
}
