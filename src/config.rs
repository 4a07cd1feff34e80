//! Tracker configuration (YAML).
//!
//! Every field is optional; a missing file yields defaults. The file lives at
//! `<config_dir>/chore-tracker/config.yaml` unless `CHORE_TRACKER_CONFIG`
//! points elsewhere.

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::matrix::TieBreak;
use crate::tracker_err;
use crate::week::WeekGrid;

/// Environment variable overriding the config file path.
pub const CONFIG_ENV: &str = "CHORE_TRACKER_CONFIG";

const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Grid year. Defaults to the current year.
    pub year: Option<i32>,
    /// UTC offset used to place timestamps on the grid. Defaults to the
    /// machine's local offset.
    pub utc_offset_minutes: Option<i32>,
    pub tie_break: TieBreak,
    /// Per-call timeout for store operations.
    pub remote_timeout_ms: Option<u64>,
    /// Restore a slot when its completion write fails.
    pub rollback_on_write_failure: bool,
    /// JSON store file used by the CLI and desktop shell.
    pub data_file: Option<PathBuf>,
    /// Acting user id for the CLI.
    pub user: Option<String>,
}

/// Get platform-appropriate config root.
pub fn default_config_root() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chore-tracker")
}

/// Path of the config file, honoring `CHORE_TRACKER_CONFIG`.
pub fn default_config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => default_config_root().join("config.yaml"),
    }
}

/// Default location of the JSON store.
pub fn default_data_file() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chore-tracker")
        .join("chores.json")
}

impl TrackerConfig {
    /// Load from `path`. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| tracker_err!(ConfigInvalid, "Invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        Self::load(&default_config_path())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if let Some(minutes) = self.utc_offset_minutes {
            if self.fixed_offset_for(minutes).is_none() {
                return Err(tracker_err!(
                    ConfigInvalid,
                    "utc_offset_minutes out of range: {}",
                    minutes
                ));
            }
        }
        if self.remote_timeout_ms == Some(0) {
            return Err(tracker_err!(ConfigInvalid, "remote_timeout_ms must be positive"));
        }
        Ok(())
    }

    fn fixed_offset_for(&self, minutes: i32) -> Option<FixedOffset> {
        minutes.checked_mul(60).and_then(FixedOffset::east_opt)
    }

    /// Offset for placing timestamps on the grid.
    pub fn offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|m| self.fixed_offset_for(m))
            .unwrap_or_else(|| Local::now().offset().fix())
    }

    /// Week grid for this config, as seen at `now`.
    pub fn grid(&self, now: DateTime<Utc>) -> WeekGrid {
        let offset = self.offset();
        match self.year {
            Some(year) => WeekGrid::new(year, offset),
            None => WeekGrid::for_instant(now, offset),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms.unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS))
    }

    pub fn data_file(&self) -> PathBuf {
        self.data_file.clone().unwrap_or_else(default_data_file)
    }
}
