//! Defensive pane content capture
//!
//! Capturing never fails at the API boundary:
//! - Text output is returned as-is (an empty pane is an empty string)
//! - Anything else becomes a diagnostic placeholder string
//! - Hash-based change detection for activity polling

use std::time::Duration;

use tracing::{debug, instrument, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::{CommandExecutor, CommandOutput, Target};
use crate::error::ValidationError;

/// Lines captured when the caller does not say
pub const DEFAULT_CAPTURE_LINES: usize = 50;

/// Hard cap on lines per capture
pub const DEFAULT_MAX_CAPTURE_LINES: usize = 1000;

/// Placeholder substituted for unusable capture output
pub fn placeholder(target: &str, reason: &str) -> String {
    format!("[capture unavailable for {target}: {reason}]")
}

/// Captured pane content with metadata
#[derive(Debug, Clone)]
pub struct PaneSnapshot {
    /// The captured text content (or placeholder)
    pub content: String,
    /// Content hash for change detection
    pub hash: u64,
    /// Number of lines captured
    pub line_count: usize,
}

impl PaneSnapshot {
    pub fn new(content: String) -> Self {
        let hash = xxh3_64(content.as_bytes());
        let line_count = content.lines().count();

        Self {
            content,
            hash,
            line_count,
        }
    }

    /// Check if content has changed from another capture
    pub fn has_changed(&self, other: &Self) -> bool {
        self.hash != other.hash
    }
}

/// Pane scrollback capture
#[derive(Clone)]
pub struct ContentCapture {
    executor: CommandExecutor,
    max_lines: usize,
}

impl ContentCapture {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            max_lines: DEFAULT_MAX_CAPTURE_LINES,
        }
    }

    /// Set the per-capture line cap
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    /// Capture the last `max_lines` of `target` as a tagged value
    #[instrument(skip(self))]
    pub async fn capture_output(&self, target: &str, max_lines: usize) -> CommandOutput {
        let target: Target = match target.parse() {
            Ok(target) => target,
            Err(e) => return CommandOutput::Malformed(e.to_string()),
        };

        if max_lines == 0 {
            let err = ValidationError::InvalidLineCount(max_lines);
            return CommandOutput::Malformed(err.to_string());
        }
        let lines = if max_lines > self.max_lines {
            warn!("Limiting capture to {} lines", self.max_lines);
            self.max_lines
        } else {
            max_lines
        };

        let rendered = target.to_string();
        let start = format!("-{lines}");
        let result = match self
            .executor
            .secure_tmux("capture-pane", &["-t", rendered.as_str(), "-p", "-S", start.as_str()])
            .await
        {
            Ok(result) => result,
            Err(e) => return CommandOutput::Malformed(e.to_string()),
        };

        let output = result.output();
        if let CommandOutput::Malformed(reason) = &output {
            debug!("Capture of {} unusable: {}", rendered, reason);
        }
        output
    }

    /// Capture as a plain string; unusable output becomes a placeholder
    pub async fn capture(&self, target: &str, max_lines: usize) -> String {
        match self.capture_output(target, max_lines).await {
            CommandOutput::Text(text) => text,
            CommandOutput::Malformed(reason) => placeholder(target, &reason),
        }
    }

    /// Capture into a hashed snapshot
    pub async fn capture_snapshot(&self, target: &str, max_lines: usize) -> PaneSnapshot {
        PaneSnapshot::new(self.capture(target, max_lines).await)
    }

    /// Poll until two consecutive captures are identical.
    ///
    /// Returns `false` if output was still changing when `deadline` passed.
    pub async fn wait_for_idle(
        &self,
        target: &str,
        poll: Duration,
        deadline: Duration,
    ) -> bool {
        let started = tokio::time::Instant::now();
        let mut previous = self.capture_snapshot(target, DEFAULT_CAPTURE_LINES).await;

        loop {
            if started.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
            let current = self.capture_snapshot(target, DEFAULT_CAPTURE_LINES).await;
            if !current.has_changed(&previous) {
                return true;
            }
            previous = current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::testing::{fail, ok, RecordingRunner};
    use crate::tmux::ExecutionResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn capture_with(runner: Arc<RecordingRunner>) -> ContentCapture {
        ContentCapture::new(CommandExecutor::with_runner(runner))
    }

    #[test]
    fn test_snapshot_change_detection() {
        let content1 = PaneSnapshot::new("Hello".to_string());
        let content2 = PaneSnapshot::new("Hello".to_string());
        let content3 = PaneSnapshot::new("World".to_string());

        assert_eq!(content1.line_count, 1);
        assert!(!content1.has_changed(&content2));
        assert!(content1.has_changed(&content3));
    }

    #[tokio::test]
    async fn test_capture_returns_text() {
        let runner = RecordingRunner::new(|_| ok("$ cargo test\nok\n"));
        let capture = capture_with(runner.clone());

        assert_eq!(capture.capture("proj:0", 50).await, "$ cargo test\nok\n");
        assert_eq!(
            runner.argvs()[0],
            vec!["capture-pane", "-t", "proj:0", "-p", "-S", "-50"]
        );
    }

    #[tokio::test]
    async fn test_empty_pane_is_empty_string() {
        let runner = RecordingRunner::new(|_| ok(""));
        assert_eq!(capture_with(runner).capture("proj:0", 10).await, "");
    }

    #[tokio::test]
    async fn test_malformed_output_becomes_placeholder() {
        let runner = RecordingRunner::new(|_| {
            ExecutionResult::completed("tmux", 0, vec![b'o', b'k', 0xc3, 0x28], Vec::new(), false)
        });
        let text = capture_with(runner).capture("proj:0", 10).await;
        assert!(text.starts_with("[capture unavailable for proj:0"));
        assert!(text.contains("UTF-8"));
    }

    #[tokio::test]
    async fn test_truncated_output_becomes_placeholder() {
        let runner = RecordingRunner::new(|_| {
            ExecutionResult::completed("tmux", 0, b"partial out".to_vec(), Vec::new(), true)
        });
        let capture = capture_with(runner);

        assert!(!capture.capture_output("proj:0", 10).await.is_text());
        let text = capture.capture("proj:0", 10).await;
        assert!(text.starts_with("[capture unavailable for proj:0"));
        assert!(text.contains("truncated"));
    }

    #[tokio::test]
    async fn test_failures_never_raise() {
        let runner = RecordingRunner::new(|_| fail(1, "can't find window: 7"));
        let capture = capture_with(runner);
        let text = capture.capture("proj:7", 10).await;
        assert!(text.contains("can't find window"));

        let runner = RecordingRunner::new(|_| {
            ExecutionResult::timed_out("tmux capture-pane", Duration::from_secs(5))
        });
        let text = capture_with(runner).capture("proj:0", 10).await;
        assert!(text.contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_input_never_spawns() {
        let runner = RecordingRunner::new(|_| ok("unused"));
        let capture = capture_with(runner.clone());

        assert!(capture.capture("not a target", 10).await.starts_with("[capture unavailable"));
        assert_eq!(
            capture.capture_output("proj:0", 0).await,
            CommandOutput::Malformed("Line count must be positive, got 0".to_string())
        );
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_line_count_is_clamped() {
        let runner = RecordingRunner::new(|_| ok("x\n"));
        let capture = capture_with(runner.clone()).with_max_lines(1000);

        capture.capture("proj:0", 50_000).await;
        assert_eq!(runner.argvs()[0][5], "-1000");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_idle() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let runner = RecordingRunner::new(move |_| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            // Output changes twice, then settles
            ok(&format!("tick {}", n.min(2)))
        });
        let capture = capture_with(runner);

        assert!(
            capture
                .wait_for_idle("proj:0", Duration::from_secs(1), Duration::from_secs(30))
                .await
        );
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        let always_changing = Arc::new(AtomicUsize::new(0));
        let seen = always_changing.clone();
        let runner = RecordingRunner::new(move |_| ok(&seen.fetch_add(1, Ordering::SeqCst).to_string()));
        assert!(
            !capture_with(runner)
                .wait_for_idle("proj:0", Duration::from_secs(1), Duration::from_secs(5))
                .await
        );
    }
}
