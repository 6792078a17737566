//! User configuration settings
//!
//! Layered configuration: defaults → config file → environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{ProjectDirs, UserDirs};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};
use crate::tmux::{
    DEFAULT_MAX_CAPTURE_LINES, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT,
    MIN_SETTLE_INTERVAL,
};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// tmux binary to invoke
    pub tmux_binary: String,

    /// Named tmux server socket (`tmux -L`); default server when unset
    pub tmux_socket: Option<String>,

    /// Binaries allowed in addition to tmux, git and crontab
    pub extra_allowed_binaries: Vec<String>,

    /// Scripts directory override
    pub scripts_dir: Option<PathBuf>,

    /// Directory of bundled operator scripts (defaults to `<data dir>/scripts`)
    pub bundled_scripts_dir: Option<PathBuf>,

    /// Root for project-relative paths (defaults to `~/projects`)
    pub projects_dir: Option<PathBuf>,

    /// Program that starts an agent in a window
    pub agent_command: String,

    /// Extra arguments for `agent_command`
    pub agent_args: Vec<String>,

    /// Timeout for each external command in milliseconds
    pub command_timeout_ms: u64,

    /// Pause between typed text and Enter in milliseconds (minimum 500)
    pub settle_interval_ms: u64,

    /// Upper bound on lines returned by a capture
    pub max_capture_lines: usize,

    /// Cap on captured bytes per output stream
    pub max_output_bytes: usize,

    /// Maximum concurrent external commands
    pub max_concurrent: usize,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmux_binary: "tmux".to_string(),
            tmux_socket: None,
            extra_allowed_binaries: Vec::new(),
            scripts_dir: None,
            bundled_scripts_dir: None,
            projects_dir: None,
            agent_command: "claude".to_string(),
            agent_args: Vec::new(),
            command_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            settle_interval_ms: MIN_SETTLE_INTERVAL.as_millis() as u64,
            max_capture_lines: DEFAULT_MAX_CAPTURE_LINES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            debug: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_from(&config_path)
    }

    /// Load with `path` as the config file layer
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Layer config file if it exists
            .merge(Toml::file(path))
            // Layer environment variables (TMUX_BRIDGE_TMUX_SOCKET, etc.)
            .merge(Env::prefixed("TMUX_BRIDGE_"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        Ok(config)
    }

    /// Agent launch command as an argument vector
    pub fn agent_argv(&self) -> Vec<String> {
        std::iter::once(self.agent_command.clone())
            .chain(self.agent_args.iter().cloned())
            .collect()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Settle interval, never below the 500ms floor
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms).max(MIN_SETTLE_INTERVAL)
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Get the timer ledger path
    pub fn timers_file_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("timers.json"))
    }

    /// Get the bundled scripts directory path
    pub fn bundled_scripts_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.bundled_scripts_dir {
            Ok(dir.clone())
        } else {
            Ok(Self::data_dir()?.join("scripts"))
        }
    }

    /// Get the projects directory path
    pub fn projects_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.projects_dir {
            return Ok(dir.clone());
        }
        let dirs = UserDirs::new().ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })?;
        Ok(dirs.home_dir().join("projects"))
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = Self::project_dirs()?;

        std::fs::create_dir_all(dirs.config_dir()).map_err(|_e| {
            Error::Config(ConfigError::DirectoryCreationFailed(
                dirs.config_dir().to_path_buf(),
            ))
        })?;

        std::fs::create_dir_all(dirs.data_dir()).map_err(|_e| {
            Error::Config(ConfigError::DirectoryCreationFailed(
                dirs.data_dir().to_path_buf(),
            ))
        })?;

        // Seed a default config file if none exists so users can discover it
        let config_path = Self::config_file_path()?;
        if !config_path.exists() {
            let _ = Config::default().save_to(&config_path);
        }

        Ok(())
    }

    /// Save current configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Save current configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_e| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "tmux-bridge", "tmux-bridge").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tmux_binary, "tmux");
        assert_eq!(config.tmux_socket, None);
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.settle_interval(), Duration::from_millis(500));
        assert_eq!(config.max_capture_lines, 1000);
        assert_eq!(config.max_output_bytes, 1024 * 1024);
        assert_eq!(config.max_concurrent, 16);
        assert_eq!(config.agent_argv(), vec!["claude".to_string()]);
    }

    #[test]
    fn test_settle_interval_floor() {
        let config = Config {
            settle_interval_ms: 100,
            ..Config::default()
        };
        assert_eq!(config.settle_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("tmux_binary"));
        assert!(toml.contains("settle_interval_ms"));
    }

    #[test]
    fn test_load_from_file_layer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "tmux_socket = \"agents\"\nsettle_interval_ms = 800\nprojects_dir = \"/srv/work\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.tmux_socket.as_deref(), Some("agents"));
        assert_eq!(config.settle_interval(), Duration::from_millis(800));
        assert_eq!(config.projects_dir().unwrap(), PathBuf::from("/srv/work"));
        // Untouched fields keep their defaults
        assert_eq!(config.max_concurrent, 16);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            extra_allowed_binaries: vec!["/usr/bin/notify-send".to_string()],
            debug: true,
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.extra_allowed_binaries, config.extra_allowed_binaries);
        assert!(loaded.debug);
    }
}
