//! Firmware catalog (`firmware_info.json`): target PROM and firmware
//! versions per model.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Boot PROM target for a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PromTarget {
    /// Version to reach; absent means no PROM update for the model.
    #[serde(default)]
    pub target_version: Option<String>,
    /// Image file on the TFTP server.
    #[serde(default)]
    pub filename: Option<String>,
}

/// Runtime firmware target for a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FirmwareTarget {
    /// Version to reach; absent means no firmware update for the model.
    #[serde(default)]
    pub final_version: Option<String>,
    /// Image file of the final version.
    #[serde(default)]
    pub final_filename: Option<String>,
    /// Stepping-stone version for installs too old to upgrade directly.
    #[serde(default)]
    pub intermediate_version: Option<String>,
    /// Image file of the intermediate version.
    #[serde(default)]
    pub intermediate_filename: Option<String>,
}

/// Catalog entry for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    /// PROM target, if any.
    #[serde(default)]
    pub prom: Option<PromTarget>,
    /// Firmware target, if any.
    #[serde(default)]
    pub firmware: Option<FirmwareTarget>,
}

/// Firmware catalog keyed by model name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct FirmwareCatalog {
    models: BTreeMap<String, CatalogEntry>,
}

impl FirmwareCatalog {
    /// Entry for `model`, if the catalog lists it.
    pub fn get(&self, model: &str) -> Option<&CatalogEntry> {
        self.models
            .get(model)
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, model: impl Into<String>, entry: CatalogEntry) {
        self.models
            .insert(model.into(), entry);
    }

    /// Every version must come with the file that provides it.
    pub fn validate(&self) -> Result<()> {
        for (model, entry) in &self.models {
            if let Some(prom) = &entry.prom {
                if prom.target_version.is_some() && prom.filename.is_none() {
                    return Err(Error::Config(format!(
                        "firmware_info: {model} PROM target has no filename"
                    )));
                }
            }
            if let Some(fw) = &entry.firmware {
                if fw.final_version.is_some() && fw.final_filename.is_none() {
                    return Err(Error::Config(format!(
                        "firmware_info: {model} firmware target has no final_filename"
                    )));
                }
                if fw.intermediate_version.is_some() && fw.intermediate_filename.is_none() {
                    return Err(Error::Config(format!(
                        "firmware_info: {model} intermediate version has no intermediate_filename"
                    )));
                }
            }
        }
        Ok(())
    }
}
