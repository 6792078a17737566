//! Two-phase message delivery to interactive prompts
//!
//! Text is typed into the pane first, then after a settle interval a separate
//! `Enter` is sent. Agent prompts are line editors that need a moment to
//! absorb a long or multi-line paste before the submit key arrives.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{CommandExecutor, ExecutionResult, Target};
use crate::error::{Result, ValidationError};
use crate::paths;

/// Lower bound for the pause between text and `Enter`
pub const MIN_SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Special keys that can be sent to tmux
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKey {
    Enter,
    Tab,
    Escape,
    Backspace,
    Up,
    Down,
    Left,
    Right,
}

impl SpecialKey {
    /// Convert to tmux key name
    pub fn to_tmux_keys(&self) -> &'static str {
        match self {
            Self::Enter => "Enter",
            Self::Tab => "Tab",
            Self::Escape => "Escape",
            Self::Backspace => "BSpace",
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }
}

/// A single keystroke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Special(SpecialKey),
    /// Control character (Ctrl+C, Ctrl+D, etc.)
    Control(char),
}

impl Key {
    /// Convert to tmux send-keys argument
    pub fn to_tmux_arg(&self) -> String {
        match self {
            Self::Special(k) => k.to_tmux_keys().to_string(),
            Self::Control(c) => format!("C-{}", c.to_ascii_lowercase()),
        }
    }
}

/// Carriage returns would submit early; fold them into newlines
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Sends messages using the text → settle → Enter protocol
///
/// Not safe for concurrent sends to the same target; wrap in
/// [`SerializedDelivery`] when several tasks share targets.
#[derive(Clone)]
pub struct MessageDelivery {
    executor: CommandExecutor,
    settle: Duration,
}

impl MessageDelivery {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            settle: MIN_SETTLE_INTERVAL,
        }
    }

    /// Set the settle interval; values under 500ms are raised to 500ms
    pub fn with_settle_interval(mut self, settle: Duration) -> Self {
        self.settle = settle.max(MIN_SETTLE_INTERVAL);
        self
    }

    pub fn settle_interval(&self) -> Duration {
        self.settle
    }

    /// Parse `target` and deliver `text`
    pub async fn send(&self, target: &str, text: &str) -> Result<ExecutionResult> {
        let target: Target = target.parse()?;
        self.send_to(&target, text).await
    }

    /// Deliver `text` to an already parsed target.
    ///
    /// Returns the phase-one result if typing failed (Enter is then never
    /// sent), otherwise the result of the Enter call.
    #[instrument(skip(self, text), fields(target = %target, len = text.len()))]
    pub async fn send_to(&self, target: &Target, text: &str) -> Result<ExecutionResult> {
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let text = normalize_newlines(text);
        let rendered = target.to_string();

        // A leading dash would be read by tmux as an option
        let typed = if text.starts_with('-') {
            self.executor
                .secure_tmux("send-keys", &["-t", rendered.as_str(), "--", text.as_str()])
                .await?
        } else {
            self.executor
                .secure_tmux("send-keys", &["-t", rendered.as_str(), text.as_str()])
                .await?
        };

        if !typed.success {
            warn!("Typing into {} failed: {}", target, typed.stderr.trim());
            return Ok(typed);
        }

        debug!("Settling {:?} before Enter", self.settle);
        tokio::time::sleep(self.settle).await;

        let submitted = self.send_key(target, Key::Special(SpecialKey::Enter)).await?;
        if submitted.success {
            info!("Delivered message to {}", target);
        } else {
            warn!("Enter to {} failed: {}", target, submitted.stderr.trim());
        }
        Ok(submitted)
    }

    /// Send a single key with no settle logic
    pub async fn send_key(&self, target: &Target, key: Key) -> Result<ExecutionResult> {
        let rendered = target.to_string();
        let key = key.to_tmux_arg();
        self.executor
            .secure_tmux("send-keys", &["-t", rendered.as_str(), key.as_str()])
            .await
    }

    /// Deliver the contents of a file that must live under `base`
    pub async fn send_file(&self, target: &Target, path: &Path, base: &Path) -> Result<ExecutionResult> {
        let path = paths::resolve(base, path)?;
        if !paths::is_path_safe(&path, base) {
            return Err(ValidationError::PathTraversal {
                base: base.to_path_buf(),
                candidate: path.display().to_string(),
            }
            .into());
        }
        let text = tokio::fs::read_to_string(&path).await?;
        self.send_to(target, text.trim_end()).await
    }
}

/// [`MessageDelivery`] with one lock per target, so concurrent sends to the
/// same pane never interleave while different panes proceed in parallel
#[derive(Clone)]
pub struct SerializedDelivery {
    inner: MessageDelivery,
    locks: Arc<Mutex<HashMap<Target, Arc<Mutex<()>>>>>,
}

impl SerializedDelivery {
    pub fn new(inner: MessageDelivery) -> Self {
        Self {
            inner,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, target: &Target) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(target.clone()).or_default().clone()
    }

    /// Drop the entry for `target` once no sender holds it
    async fn release(&self, target: &Target) {
        let mut locks = self.locks.lock().await;
        if locks.get(target).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(target);
        }
    }

    pub async fn send_to(&self, target: &Target, text: &str) -> Result<ExecutionResult> {
        let lock = self.lock_for(target).await;
        let result = {
            let _guard = lock.lock().await;
            self.inner.send_to(target, text).await
        };
        drop(lock);
        self.release(target).await;
        result
    }

    /// Targets that currently have a lock entry
    pub async fn tracked_targets(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub fn inner(&self) -> &MessageDelivery {
        &self.inner
    }
}
