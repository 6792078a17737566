//! Persistent timer ledger
//!
//! Detached timers are forgotten by the scheduler once spawned. The CLI keeps
//! their handles in `timers.json` so they can be listed and cancelled later.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, ValidationError};
use crate::paths;
use crate::schedule::TimerHandle;

use super::Config;

/// Timer handles known to this user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerLedger {
    #[serde(default)]
    pub timers: Vec<TimerHandle>,

    /// Application version that last wrote this ledger
    #[serde(default)]
    pub version: String,

    /// Path to save to (not serialized, set at load time)
    #[serde(skip)]
    ledger_path: Option<PathBuf>,
}

impl TimerLedger {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        }
    }

    /// Load the ledger from the default location
    pub fn load() -> Result<Self> {
        let path = Config::timers_file_path()?;
        Self::load_from(&path)
    }

    /// Load the ledger from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut ledger = Self::new();
            ledger.ledger_path = Some(path.to_path_buf());
            return Ok(ledger);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read timer ledger: {}", e)))?;

        let mut ledger: TimerLedger = serde_json::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to parse timer ledger: {}", e)))?;

        ledger.version = env!("CARGO_PKG_VERSION").to_string();
        ledger.ledger_path = Some(path.to_path_buf());

        Ok(ledger)
    }

    /// Save to the remembered location (or default if none)
    pub fn save(&self) -> Result<()> {
        let path = match &self.ledger_path {
            Some(p) => p.clone(),
            None => Config::timers_file_path()?,
        };
        let base = match path.parent() {
            Some(parent) => parent.to_path_buf(),
            None => Config::data_dir()?,
        };
        self.save_to(&path, &base)
    }

    /// Save to `path`, which must stay inside `base`
    pub fn save_to(&self, path: &Path, base: &Path) -> Result<()> {
        if !paths::is_path_safe(path, base) {
            return Err(ValidationError::PathTraversal {
                base: base.to_path_buf(),
                candidate: path.display().to_string(),
            }
            .into());
        }

        std::fs::create_dir_all(base).map_err(|e| {
            ConfigError::SaveFailed(format!("Failed to create ledger directory: {}", e))
        })?;

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize ledger: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write timer ledger: {}", e)))?;

        Ok(())
    }

    pub fn add(&mut self, handle: TimerHandle) {
        self.timers.push(handle);
    }

    /// Find a timer by id or unambiguous id prefix
    pub fn find(&self, id: &str) -> Option<&TimerHandle> {
        if let Some(exact) = self.timers.iter().find(|t| t.id == id) {
            return Some(exact);
        }
        let mut matches = self.timers.iter().filter(|t| t.id.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(only), None) if !id.is_empty() => Some(only),
            _ => None,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<TimerHandle> {
        let pos = self.timers.iter().position(|t| t.id == id)?;
        Some(self.timers.remove(pos))
    }

    /// Drop timers whose fire time has passed; returns how many went
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.timers.len();
        self.timers.retain(|t| !t.is_due(now));
        before - self.timers.len()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    fn handle(offset_secs: i64, note: &str) -> TimerHandle {
        TimerHandle::new(
            100,
            "proj:0".parse().unwrap(),
            Utc::now() + TimeDelta::seconds(offset_secs),
            note,
        )
    }

    #[test]
    fn test_new_ledger() {
        let ledger = TimerLedger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_find_and_remove() {
        let mut ledger = TimerLedger::new();
        let timer = handle(60, "check in");
        let id = timer.id.clone();
        ledger.add(timer);

        assert_eq!(ledger.find(&id).map(|t| t.note.as_str()), Some("check in"));
        assert!(ledger.find(&id[..6]).is_some());
        assert!(ledger.find("").is_none());
        assert!(ledger.find("zzzz").is_none());

        assert!(ledger.remove(&id).is_some());
        assert!(ledger.remove(&id).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_prune_drops_elapsed_timers() {
        let mut ledger = TimerLedger::new();
        ledger.add(handle(-30, "past"));
        ledger.add(handle(600, "future"));

        assert_eq!(ledger.prune(Utc::now()), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.timers[0].note, "future");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("timers.json");

        let mut ledger = TimerLedger::new();
        let timer = handle(300, "standup");
        ledger.add(timer.clone());
        ledger.save_to(&path, temp_dir.path()).unwrap();

        let loaded = TimerLedger::load_from(&path).unwrap();
        assert_eq!(loaded.timers, vec![timer]);
    }

    #[test]
    fn test_save_refuses_paths_outside_base() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("data");
        let escape = base.join("..").join("..").join("timers.json");

        let err = TimerLedger::new().save_to(&escape, &base).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_missing_file_is_empty_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = TimerLedger::load_from(&temp_dir.path().join("timers.json")).unwrap();
        assert!(ledger.is_empty());
    }
}
