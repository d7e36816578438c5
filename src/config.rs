//! Timer settings, read from `config.json` next to the database.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::connection;
use crate::error::TrackerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Length of one tick. Each tick adds one second of tracked time.
    pub tick_millis: u64,
    /// Minimum spacing between throttled flushes of one task.
    pub flush_interval_secs: u64,
    pub persist_timeout_millis: u64,
    /// Time allowed for the final flush on shutdown.
    pub shutdown_budget_millis: u64,
    pub default_countdown_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            flush_interval_secs: 10,
            persist_timeout_millis: 2000,
            shutdown_budget_millis: 3000,
            default_countdown_secs: 25 * 60,
        }
    }
}

impl TimerConfig {
    /// Load the project config, falling back to defaults when absent.
    pub fn load() -> Result<Self, TrackerError> {
        Self::load_from(&connection::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, TrackerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|e| TrackerError::fatal(e.to_string()))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            TrackerError::validation(format!("Invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "loaded timer config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.tick_millis == 0 {
            return Err(TrackerError::validation("tick_millis must be greater than zero"));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn flush_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.flush_interval_secs as i64)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_millis)
    }

    pub fn shutdown_budget(&self) -> Duration {
        Duration::from_millis(self.shutdown_budget_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_means_defaults() {
        let dir = TempDir::new().unwrap();
        let config = TimerConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, TimerConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "flush_interval_secs": 30 }"#).unwrap();
        let config = TimerConfig::load_from(&path).unwrap();
        assert_eq!(config.flush_interval_secs, 30);
        assert_eq!(config.tick_millis, 1000);
    }

    #[test]
    fn zero_tick_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "tick_millis": 0 }"#).unwrap();
        assert!(TimerConfig::load_from(&path).is_err());
    }
}
