//! Whole-server status reports and monitoring snapshots
//!
//! Every window is probed independently; a window that fails to answer is
//! recorded with its error and the report carries on with the rest.

use chrono::{DateTime, Local, SecondsFormat};
use futures::future::join_all;
use serde::Serialize;
use tracing::{instrument, warn};

use super::{
    ActivityState, CommandExecutor, ContentCapture, SessionDirectory, Target, WindowRole,
    DEFAULT_CAPTURE_LINES,
};
use super::directory::is_missing_target_error;
use crate::error::{ExecutionError, Result};

const WINDOW_INFO_FORMAT: &str = "#{window_name}:#{window_active}:#{window_panes}:#{window_layout}";

/// Lines of recent output shown per window in a snapshot
const SNAPSHOT_TAIL_LINES: usize = 10;

/// Details of a single window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowInfo {
    pub name: String,
    pub active: bool,
    pub panes: u32,
    pub layout: String,
    pub content: String,
    pub role: WindowRole,
    pub activity: ActivityState,
}

/// Parse `display-message` output into `(name, active, panes, layout)`.
///
/// Fields are taken from the right because window names may contain `:`.
pub fn parse_window_info(output: &str) -> Option<(String, bool, u32, String)> {
    let line = output.trim_end_matches(['\r', '\n']);
    let mut fields = line.rsplitn(4, ':');
    let layout = fields.next()?;
    let panes = fields.next()?.parse::<u32>().ok()?;
    let active = fields.next()? == "1";
    let name = fields.next()?;
    Some((name.to_string(), active, panes, layout.to_string()))
}

/// Status of one window; exactly one of `info` / `error` is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub index: u32,
    pub name: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<WindowInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub name: String,
    pub attached: bool,
    pub windows: Vec<WindowStatus>,
}

/// Point-in-time report across all sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Local>,
    pub sessions: Vec<SessionStatus>,
}

impl StatusReport {
    /// Windows whose probe failed, as `(session, index, error)`
    pub fn failures(&self) -> Vec<(&str, u32, &str)> {
        self.sessions
            .iter()
            .flat_map(|s| {
                s.windows
                    .iter()
                    .filter_map(move |w| w.error.as_deref().map(|e| (s.name.as_str(), w.index, e)))
            })
            .collect()
    }
}

/// Collects window info and status reports
#[derive(Clone)]
pub struct StatusMonitor {
    executor: CommandExecutor,
    directory: SessionDirectory,
    capture: ContentCapture,
}

impl StatusMonitor {
    pub fn new(executor: CommandExecutor, capture: ContentCapture) -> Self {
        Self {
            directory: SessionDirectory::new(executor.clone()),
            executor,
            capture,
        }
    }

    /// Name, flags, layout and recent content of one window
    #[instrument(skip(self), fields(target = %target))]
    pub async fn window_info(&self, target: &Target) -> Result<WindowInfo> {
        let window = target.window_target().to_string();
        let result = self
            .executor
            .secure_tmux("display-message", &["-t", window.as_str(), "-p", WINDOW_INFO_FORMAT])
            .await?;
        if !result.success && is_missing_target_error(&result.stderr) {
            return Err(ExecutionError::TargetNotFound(window).into());
        }
        let result = result.into_checked()?;

        let (name, active, panes, layout) = parse_window_info(&result.stdout).ok_or_else(|| {
            ExecutionError::ParseError(format!("unexpected window info: {:?}", result.stdout))
        })?;

        let content = self.capture.capture(&window, DEFAULT_CAPTURE_LINES).await;
        let role = WindowRole::detect(&name, target.window());
        let activity = ActivityState::detect(&content);

        Ok(WindowInfo {
            name,
            active,
            panes,
            layout,
            content,
            role,
            activity,
        })
    }

    async fn probe(&self, session: &str, index: u32) -> std::result::Result<WindowInfo, String> {
        let target = Target::new(session, index).map_err(|e| e.to_string())?;
        self.window_info(&target).await.map_err(|e| {
            warn!("Window {} unavailable: {}", target, e);
            e.to_string()
        })
    }

    /// Probe every window of every session
    #[instrument(skip(self))]
    pub async fn collect_status(&self) -> Result<StatusReport> {
        let sessions = self.directory.list_sessions().await?;
        let mut report = Vec::with_capacity(sessions.len());

        for session in sessions {
            let probes = session
                .windows
                .iter()
                .map(|w| self.probe(&session.name, w.index));
            let results = join_all(probes).await;

            let windows = session
                .windows
                .iter()
                .zip(results)
                .map(|(w, result)| {
                    let (info, error) = match result {
                        Ok(info) => (Some(info), None),
                        Err(e) => (None, Some(e)),
                    };
                    WindowStatus {
                        index: w.index,
                        name: w.name.clone(),
                        active: w.active,
                        info,
                        error,
                    }
                })
                .collect();

            report.push(SessionStatus {
                name: session.name.clone(),
                attached: session.attached,
                windows,
            });
        }

        Ok(StatusReport {
            timestamp: Local::now(),
            sessions: report,
        })
    }

    /// Collect and render a text snapshot
    pub async fn snapshot(&self) -> Result<String> {
        Ok(render_snapshot(&self.collect_status().await?))
    }
}

/// Plain-text rendering of a report, suitable for pasting into an agent prompt
pub fn render_snapshot(report: &StatusReport) -> String {
    let mut out = format!(
        "Tmux Monitoring Snapshot - {}\n",
        report.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
    );
    out.push_str(&"=".repeat(50));
    out.push_str("\n\n");

    for session in &report.sessions {
        let state = if session.attached { "ATTACHED" } else { "DETACHED" };
        out.push_str(&format!("Session: {} ({})\n", session.name, state));
        out.push_str(&"-".repeat(30));
        out.push('\n');

        for window in &session.windows {
            out.push_str(&format!("  Window {}: {}", window.index, window.name));
            if window.active {
                out.push_str(" (ACTIVE)");
            }
            out.push('\n');

            if let Some(info) = &window.info {
                let lines: Vec<&str> = info.content.split('\n').collect();
                let start = lines.len().saturating_sub(SNAPSHOT_TAIL_LINES);
                out.push_str("    Recent output:\n");
                for line in lines[start..].iter().filter(|l| !l.trim().is_empty()) {
                    out.push_str(&format!("    | {line}\n"));
                }
            } else if let Some(error) = &window.error {
                out.push_str(&format!("    Unavailable: {error}\n"));
            }
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::testing::{fail, ok, RecordingRunner};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_window_info() {
        assert_eq!(
            parse_window_info("agent:1:2:c3a4,200x50,0,0{100x50,0,0,1,99x50,101,0,2}\n"),
            Some((
                "agent".to_string(),
                true,
                2,
                "c3a4,200x50,0,0{100x50,0,0,1,99x50,101,0,2}".to_string()
            ))
        );
        assert_eq!(
            parse_window_info("notes: todo:0:1:b25d,80x24,0,0,3"),
            Some(("notes: todo".to_string(), false, 1, "b25d,80x24,0,0,3".to_string()))
        );
        assert_eq!(parse_window_info("garbage"), None);
        assert_eq!(parse_window_info(""), None);
    }

    #[tokio::test]
    async fn test_collect_status_isolates_failures() {
        let runner = RecordingRunner::new(|req| match req.argv[0].as_str() {
            "list-sessions" => ok("proj:1\n"),
            "list-windows" => ok("0:pm:1\n1:dev:0\n"),
            "display-message" if req.argv[2] == "proj:0" => ok("pm:1:1:abcd,80x24,0,0,0\n"),
            "display-message" => fail(1, "can't find window: 1"),
            "capture-pane" => ok("Error: build broke\n> \n"),
            _ => fail(1, "unexpected"),
        });
        let executor = CommandExecutor::with_runner(runner);
        let monitor = StatusMonitor::new(executor.clone(), ContentCapture::new(executor));

        let report = monitor.collect_status().await.unwrap();
        assert_eq!(report.sessions.len(), 1);
        let windows = &report.sessions[0].windows;
        assert_eq!(windows.len(), 2);

        let info = windows[0].info.as_ref().unwrap();
        assert_eq!(info.name, "pm");
        assert_eq!(info.panes, 1);
        assert_eq!(info.role, WindowRole::ProjectManager);
        assert_eq!(info.activity, ActivityState::Error);

        assert!(windows[1].info.is_none());
        assert_eq!(
            windows[1].error.as_deref(),
            Some("Tmux target 'proj:1' does not exist")
        );
        assert_eq!(report.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_window_info_missing_target() {
        let runner = RecordingRunner::new(|_| fail(1, "can't find window: 9"));
        let executor = CommandExecutor::with_runner(runner);
        let monitor = StatusMonitor::new(executor.clone(), ContentCapture::new(executor));

        let err = monitor
            .window_info(&Target::new("proj", 9).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Execution(ExecutionError::TargetNotFound(ref t)) if t == "proj:9"
        ));
    }

    #[test]
    fn test_render_snapshot() {
        let content = (1..=12).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let report = StatusReport {
            timestamp: Local::now(),
            sessions: vec![SessionStatus {
                name: "proj".to_string(),
                attached: false,
                windows: vec![
                    WindowStatus {
                        index: 0,
                        name: "pm".to_string(),
                        active: true,
                        info: Some(WindowInfo {
                            name: "pm".to_string(),
                            active: true,
                            panes: 1,
                            layout: "x".to_string(),
                            content: format!("{content}\n\n"),
                            role: WindowRole::ProjectManager,
                            activity: ActivityState::Unknown,
                        }),
                        error: None,
                    },
                    WindowStatus {
                        index: 1,
                        name: "dev".to_string(),
                        active: false,
                        info: None,
                        error: Some("gone".to_string()),
                    },
                ],
            }],
        };

        let text = render_snapshot(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("Tmux Monitoring Snapshot - "));
        assert_eq!(lines[1], "=".repeat(50));
        assert_eq!(lines[3], "Session: proj (DETACHED)");
        assert_eq!(lines[5], "  Window 0: pm (ACTIVE)");
        assert_eq!(lines[6], "    Recent output:");
        // Last ten entries are lines 5..=12 plus two blanks, blanks dropped
        assert_eq!(lines[7], "    | line 5");
        assert_eq!(lines[14], "    | line 12");
        assert_eq!(lines[16], "  Window 1: dev");
        assert_eq!(lines[17], "    Unavailable: gone");
    }
}
