//! Settings file support for the swreset CLI.
//!
//! Settings are resolved from multiple sources with the following priority
//! (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SWRESET_*)
//! 3. Local settings file (./swreset.toml)
//! 4. Global settings file (~/.config/swreset/config.toml)
//!
//! `--config PATH` replaces both files.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use swreset::MismatchPolicy;

/// Local settings file name.
pub const LOCAL_FILE: &str = "swreset.toml";

/// Connection settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
}

/// Device selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    /// Vendor name used in the profile file name.
    pub vendor: Option<String>,
    /// Model name used in the profile file name.
    pub model: Option<String>,
}

/// Directories used by a run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Device data directory.
    pub config_dir: Option<PathBuf>,
    /// Ranking statistics directory.
    pub stats_dir: Option<PathBuf>,
    /// Where run reports are written.
    pub report_dir: Option<PathBuf>,
}

/// Run behaviour.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    /// Reaction to a model mismatch in the boot output.
    pub mismatch_policy: Option<MismatchPolicy>,
    /// Reflash even when the installed version is current.
    #[serde(default)]
    pub force_reflash: bool,
}

/// Main settings structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Device selection.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Directories.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Run behaviour.
    #[serde(default)]
    pub run: RunConfig,
}

impl Config {
    /// Load settings from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_FILE)) {
            debug!("Loaded local config from {LOCAL_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load settings from a specific file (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Parse one file. Unreadable or invalid files are reported and skipped.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| warn!("Failed to parse config file {}: {}", path.display(), e))
                .ok(),
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "swreset").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }

        if other.device.vendor.is_some() {
            self.device.vendor = other.device.vendor;
        }
        if other.device.model.is_some() {
            self.device.model = other.device.model;
        }

        if other.paths.config_dir.is_some() {
            self.paths.config_dir = other.paths.config_dir;
        }
        if other.paths.stats_dir.is_some() {
            self.paths.stats_dir = other.paths.stats_dir;
        }
        if other.paths.report_dir.is_some() {
            self.paths.report_dir = other.paths.report_dir;
        }

        if other.run.mismatch_policy.is_some() {
            self.run.mismatch_policy = other.run.mismatch_policy;
        }
        if other.run.force_reflash {
            self.run.force_reflash = true;
        }
    }
}
