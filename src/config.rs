use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::tracks::ValidationError;

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Replay settings.
    pub playback: PlaybackConfig,
    /// env_logger filter used when no `-v` flag is given (e.g. "info").
    pub log_level: Option<String>,
}

/// Options of the chunked replay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Frames added to each track's window per tick.
    pub frames_per_update: i64,
    /// Maximum width of a playing window, in frames.
    pub max_localizations_per_track: i64,
    /// Share one window across all tracks instead of per-track cursors.
    pub synchronized: bool,
    /// Tick period of the replay timer in milliseconds.
    pub tick_period_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frames_per_update: 25,
            max_localizations_per_track: 1000,
            synchronized: false,
            tick_period_ms: 50,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.frames_per_update <= 0 {
            return Err(ValidationError::InvalidConfig {
                field: "frames_per_update",
                value: self.frames_per_update,
            });
        }
        if self.max_localizations_per_track <= 0 {
            return Err(ValidationError::InvalidConfig {
                field: "max_localizations_per_track",
                value: self.max_localizations_per_track,
            });
        }
        if self.tick_period_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "tick_period_ms",
                value: 0,
            });
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

impl AppConfig {
    /// Load config from `~/.config/frappe/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load from an explicit path, falling back to defaults on any error.
    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Failed to parse {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!(
                    "Failed to read {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Parse TOML text and validate the playback section.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.playback.validate()?;
        Ok(config)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.playback, PlaybackConfig::default());
        assert_eq!(config.playback.frames_per_update, 25);
        assert_eq!(config.playback.max_localizations_per_track, 1000);
        assert!(!config.playback.synchronized);
        assert_eq!(config.playback.tick_period(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_override() {
        let config = AppConfig::parse(
            "log_level = \"debug\"\n[playback]\nframes_per_update = 10\nsynchronized = true\n",
        )
        .unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.playback.frames_per_update, 10);
        assert_eq!(config.playback.max_localizations_per_track, 1000);
        assert!(config.playback.synchronized);
    }

    #[test]
    fn test_rejects_out_of_domain_values() {
        let err = AppConfig::parse("[playback]\nframes_per_update = 0\n").unwrap_err();
        assert!(err.to_string().contains("frames_per_update"));
        assert!(AppConfig::parse("[playback]\nmax_localizations_per_track = -3\n").is_err());
    }

    #[test]
    fn test_unreadable_file_falls_back() {
        let config = AppConfig::load_from(std::path::Path::new("/nonexistent/frappe.toml"));
        assert_eq!(config.playback, PlaybackConfig::default());
    }
}
