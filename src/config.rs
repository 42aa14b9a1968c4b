use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::art::ResolverSettings;

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine a config directory for this user")]
    NoConfigDir,
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted settings. Unknown or missing fields fall back to defaults so
/// older config files keep loading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How often the detector runs
    pub polling_interval_ms: u64,

    /// When false, no art lookups are made at all
    pub show_album_art: bool,

    /// Size of the art fetch pool
    pub art_workers: usize,

    pub provider_timeout_ms: u64,
    pub image_timeout_ms: u64,
    pub registration_timeout_ms: u64,

    /// Upper bound for osascript / playerctl calls
    pub detect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polling_interval_ms: 1000,
            show_album_art: true,
            art_workers: 2,
            provider_timeout_ms: 5000,
            image_timeout_ms: 10_000,
            registration_timeout_ms: 5000,
            detect_timeout_ms: 750,
        }
    }
}

impl Config {
    pub fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "nowplaying")
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Self::project_dirs()
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Loads from the per-user config dir. A missing file is created with
    /// defaults; a broken one is logged and replaced by defaults in memory.
    pub fn load() -> Self {
        let path = match Self::default_path() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[Config] {}; using defaults", e);
                return Self::default();
            }
        };

        if !path.exists() {
            let config = Self::default();
            if let Err(e) = config.save_to(&path) {
                tracing::warn!("[Config] Could not write defaults to {}: {}", path.display(), e);
            }
            return config;
        }

        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!("[Config] Loaded {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("[Config] Failed to load {}, using defaults: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        Ok(config.sanitized())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!("[Config] Saved {}", path.display());
        Ok(())
    }

    /// Clamps values into workable ranges.
    pub fn sanitized(mut self) -> Self {
        self.polling_interval_ms = self.polling_interval_ms.clamp(250, 10_000);
        self.art_workers = self.art_workers.clamp(1, 8);
        self.provider_timeout_ms = self.provider_timeout_ms.clamp(500, 30_000);
        self.image_timeout_ms = self.image_timeout_ms.clamp(500, 60_000);
        self.registration_timeout_ms = self.registration_timeout_ms.clamp(100, 30_000);
        self.detect_timeout_ms = self.detect_timeout_ms.clamp(100, 5000);
        self
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            workers: self.art_workers,
            provider_timeout: Duration::from_millis(self.provider_timeout_ms),
            image_timeout: Duration::from_millis(self.image_timeout_ms),
        }
    }
}
