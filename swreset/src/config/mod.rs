//! Device data loaded before a run.
//!
//! A config directory holds the shared files and one profile per device:
//!
//! ```text
//! config/
//! ├── patterns.json
//! ├── credentials.json
//! ├── reset_commands.json
//! ├── timeouts.json
//! ├── firmware_info.json
//! └── devices/
//!     └── D-Link_DES-3200-28.json
//! ```
//!
//! The shared files are optional (a missing file means empty data or
//! defaults, with a warning). The device profile is mandatory. Everything
//! is parsed, compiled and validated here, so a run never starts with
//! configuration it cannot use.

pub mod candidates;
pub mod catalog;
pub mod device;
pub mod timeouts;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;

pub use self::{
    candidates::{Credential, Credentials, ResetCommand, ResetCommands},
    catalog::{CatalogEntry, FirmwareCatalog, FirmwareTarget, PromTarget},
    device::{CommandTemplates, DEFAULT_TFTP_IP, DeviceProfile, KeyCombination},
    timeouts::{Pacing, Timeouts},
};
use crate::error::{Error, Result};
use crate::pattern::{PatternSet, Signal};

/// Signals every pattern set must define.
pub const REQUIRED_SIGNALS: [Signal; 4] = [
    Signal::BootIndicators,
    Signal::RecoveryIndicators,
    Signal::UserPrompt,
    Signal::PrivilegedPrompt,
];

/// Everything a run reads but never changes.
#[derive(Debug, Clone)]
pub struct DeviceData {
    /// Vendor name, as used in the profile file name.
    pub vendor: String,
    /// Requested model.
    pub model: String,
    /// Device profile.
    pub profile: DeviceProfile,
    /// Compiled console patterns.
    pub patterns: PatternSet,
    /// Credentials per category.
    pub credentials: Credentials,
    /// Reset commands per category.
    pub reset_commands: ResetCommands,
    /// Operation timeouts.
    pub timeouts: Timeouts,
    /// Firmware targets.
    pub catalog: FirmwareCatalog,
}

impl DeviceData {
    /// Load and validate the data for `vendor`/`model` from `config_dir`.
    pub fn load(config_dir: &Path, vendor: &str, model: &str) -> Result<Self> {
        debug!("Loading configuration from {}", config_dir.display());

        let device_path = Self::device_path(config_dir, vendor, model);
        let device_json = read_json(&device_path)?.ok_or_else(|| Error::ConfigNotFound {
            path: device_path.clone(),
        })?;
        let profile = DeviceProfile::from_json(&device_json)?;

        let patterns_json = optional_json(&config_dir.join("patterns.json"))?
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        let patterns = PatternSet::from_json(&patterns_json)?;

        let credentials = optional_typed(&config_dir.join("credentials.json"))?;
        let reset_commands = optional_typed(&config_dir.join("reset_commands.json"))?;
        let timeouts = optional_typed(&config_dir.join("timeouts.json"))?;
        let catalog: FirmwareCatalog = optional_typed(&config_dir.join("firmware_info.json"))?;

        let data = Self::from_parts(
            vendor,
            model,
            profile,
            patterns,
            credentials,
            reset_commands,
            timeouts,
            catalog,
        )?;
        info!("Configuration for {vendor} {model} loaded and validated");
        Ok(data)
    }

    /// Assemble and validate already parsed parts.
    ///
    /// Profile boot indicators, when present, replace the shared ones.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        vendor: &str,
        model: &str,
        profile: DeviceProfile,
        mut patterns: PatternSet,
        credentials: Credentials,
        reset_commands: ResetCommands,
        timeouts: Timeouts,
        catalog: FirmwareCatalog,
    ) -> Result<Self> {
        if !profile
            .boot_indicators
            .is_empty()
        {
            patterns.override_group(Signal::BootIndicators, &profile.boot_indicators)?;
        }

        for signal in REQUIRED_SIGNALS {
            if !patterns.has(signal) {
                return Err(Error::Config(format!(
                    "patterns are missing required key: {}",
                    signal.key()
                )));
            }
        }
        catalog.validate()?;

        Ok(Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            profile,
            patterns,
            credentials,
            reset_commands,
            timeouts,
            catalog,
        })
    }

    /// Location of the profile for `vendor`/`model`.
    pub fn device_path(config_dir: &Path, vendor: &str, model: &str) -> PathBuf {
        config_dir
            .join("devices")
            .join(format!("{vendor}_{model}.json"))
    }
}

fn read_json(path: &Path) -> Result<Option<serde_json::Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value = serde_json::from_str(&content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

fn optional_json(path: &Path) -> Result<Option<serde_json::Value>> {
    let value = read_json(path)?;
    if value.is_none() {
        warn!("Configuration file not found: {}", path.display());
    }
    Ok(value)
}

fn optional_typed<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match optional_json(path)? {
        Some(value) => serde_json::from_value(value).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(T::default()),
    }
}
