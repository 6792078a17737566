//! Crontab line parsing and validation
//!
//! Managed lines look like `<schedule> <command> # TMUX-CRON-<id>`. Everything
//! else in the table is left untouched.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ScheduledTask, TaskKind};
use crate::error::ValidationError;

/// Marker placed before the id in managed crontab lines
pub const CRON_TAG_PREFIX: &str = "TMUX-CRON-";

static TAGGED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<body>.*?)\s+#\s*TMUX-CRON-(?P<id>[A-Za-z0-9]+)\s*$").unwrap()
});

static CRON_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z*,/-]+$").unwrap());

const CRON_MACROS: &[&str] = &[
    "@reboot", "@yearly", "@annually", "@monthly", "@weekly", "@daily", "@midnight", "@hourly",
];

/// A managed crontab line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronEntry {
    pub id: String,
    pub schedule: String,
    pub command: String,
    /// The raw line as it appears in the table
    pub line: String,
}

impl CronEntry {
    /// Render the crontab line for a new entry
    pub fn render(schedule: &str, command: &str, id: &str) -> String {
        format!("{} {} # {}{}", schedule.trim(), command.trim(), CRON_TAG_PREFIX, id)
    }

    pub fn to_task(&self) -> ScheduledTask {
        ScheduledTask::new(
            self.id.clone(),
            None,
            None,
            String::new(),
            TaskKind::Cron {
                schedule: self.schedule.clone(),
                command: self.command.clone(),
            },
        )
    }
}

/// Accept five cron fields or a single `@` macro
pub fn validate_cron_schedule(schedule: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidCronSchedule {
        schedule: schedule.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = schedule.trim();
    if trimmed.starts_with('@') {
        return if CRON_MACROS.contains(&trimmed) {
            Ok(())
        } else {
            Err(invalid("unknown @ macro"))
        };
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid("expected five fields"));
    }
    if let Some(field) = fields.iter().find(|f| !CRON_FIELD.is_match(f)) {
        return Err(invalid(&format!("bad field '{field}'")));
    }
    Ok(())
}

/// Reject commands that would corrupt the table or confuse tag parsing
pub fn validate_cron_command(command: &str) -> Result<(), ValidationError> {
    let unsafe_cmd = |reason: &str| ValidationError::UnsafeCronCommand(reason.to_string());

    if command.trim().is_empty() {
        return Err(unsafe_cmd("command is empty"));
    }
    if command.contains(['\n', '\r', '\0']) {
        return Err(unsafe_cmd("command spans multiple lines"));
    }
    // cron turns unescaped % into newlines
    if command.contains('%') {
        return Err(unsafe_cmd("command contains '%'"));
    }
    if command.contains(CRON_TAG_PREFIX) {
        return Err(unsafe_cmd("command contains the job tag marker"));
    }
    Ok(())
}

/// Split off the first `n` whitespace-separated fields
fn split_fields(body: &str, n: usize) -> Option<(String, String)> {
    let mut rest = body.trim_start();
    let mut fields = Vec::with_capacity(n);
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields.join(" "), rest.trim_end().to_string()))
}

/// Id of the tag on `line`, if it is a managed line
pub fn tag_id(line: &str) -> Option<&str> {
    TAGGED_LINE
        .captures(line)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str())
}

/// Parse one line; `None` for unmanaged lines
pub fn parse_cron_line(line: &str) -> Option<CronEntry> {
    if line.trim_start().starts_with('#') {
        return None;
    }
    let caps = TAGGED_LINE.captures(line)?;
    let body = caps.name("body")?.as_str();
    let id = caps.name("id")?.as_str();

    let fields = if body.trim_start().starts_with('@') { 1 } else { 5 };
    let (schedule, command) = split_fields(body, fields)?;

    Some(CronEntry {
        id: id.to_string(),
        schedule,
        command,
        line: line.to_string(),
    })
}

/// All managed entries in a crontab
pub fn parse_cron_table(table: &str) -> Vec<CronEntry> {
    table.lines().filter_map(parse_cron_line).collect()
}

/// Table without the lines tagged `id`, plus how many were dropped
pub fn remove_tagged(table: &str, id: &str) -> (String, usize) {
    let mut removed = 0;
    let kept: Vec<&str> = table
        .lines()
        .filter(|line| {
            let hit = !line.trim_start().starts_with('#') && tag_id(line) == Some(id);
            if hit {
                removed += 1;
            }
            !hit
        })
        .collect();
    (join_table(&kept), removed)
}

/// Join lines into a table; crontab wants a trailing newline
pub fn join_table(lines: &[&str]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut table = lines.join("\n");
        table.push('\n');
        table
    }
}
