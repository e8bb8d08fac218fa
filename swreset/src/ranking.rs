//! Success/attempt statistics used to order candidate lists.
//!
//! Credentials, reset commands and recovery key combinations are tried in an
//! order learned from earlier runs: entries that worked before go first, and
//! among equals the ones tried less often go first. Statistics live in
//! memory and are written back per category at batch checkpoints.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Statistics category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Login/password pairs (recovery and CLI).
    Credentials,
    /// Reset commands (recovery and CLI).
    ResetCommands,
    /// Recovery-mode key combinations.
    RecoveryKeys,
}

impl Category {
    /// All categories.
    pub const ALL: [Self; 3] = [Self::Credentials, Self::ResetCommands, Self::RecoveryKeys];

    /// Category name, also the stem of its statistics file.
    pub fn name(self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::ResetCommands => "reset_commands",
            Self::RecoveryKeys => "recovery_keys",
        }
    }

    fn file_name(self) -> String {
        format!("{}_stats.json", self.name())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters for one entry. `success <= total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Attempts that succeeded.
    #[serde(default)]
    pub success: u64,
    /// All attempts.
    #[serde(default)]
    pub total: u64,
}

/// Anything with a stable identifier that can be ranked.
pub trait Ranked {
    /// Identifier used as the statistics key.
    fn id(&self) -> &str;
}

/// Process-wide ranking statistics.
#[derive(Debug, Clone, Default)]
pub struct RankingStore {
    dir: Option<PathBuf>,
    records: BTreeMap<Category, BTreeMap<String, Record>>,
}

impl RankingStore {
    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load every category from `dir`. Missing files mean empty statistics.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut records = BTreeMap::new();

        for category in Category::ALL {
            let path = dir.join(category.file_name());
            if !path.exists() {
                debug!("No statistics at {}, starting empty", path.display());
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let mut map: BTreeMap<String, Record> =
                serde_json::from_str(&content).map_err(|source| Error::Json {
                    path: path.clone(),
                    source,
                })?;
            for (id, record) in &mut map {
                if record.success > record.total {
                    warn!(
                        "{category}/{id}: success {} exceeds total {}, clamping",
                        record.success, record.total
                    );
                    record.total = record.success;
                }
            }
            records.insert(category, map);
        }

        Ok(Self {
            dir: Some(dir),
            records,
        })
    }

    /// Directory statistics are persisted to, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir
            .as_deref()
    }

    /// Counters for `id`; zero for unseen ids.
    pub fn record(&self, category: Category, id: &str) -> Record {
        self.records
            .get(&category)
            .and_then(|m| m.get(id))
            .copied()
            .unwrap_or_default()
    }

    fn known(&self, category: Category, id: &str) -> Option<Record> {
        self.records
            .get(&category)
            .and_then(|m| m.get(id))
            .copied()
    }

    /// Order `entries` for trial.
    ///
    /// Recorded entries sort by more successes first, then fewer attempts
    /// first. Entries never recorded come last, in their original order.
    pub fn rank<'a, T: Ranked>(&self, entries: &'a [T], category: Category) -> Vec<&'a T> {
        let mut ranked: Vec<&T> = entries
            .iter()
            .collect();
        ranked.sort_by_key(|entry| match self.known(category, entry.id()) {
            Some(r) => (0u8, std::cmp::Reverse(r.success), r.total),
            None => (1u8, std::cmp::Reverse(0), 0),
        });
        ranked
    }

    /// Record one attempt.
    pub fn update(&mut self, category: Category, id: &str, success: bool) {
        let record = self
            .records
            .entry(category)
            .or_default()
            .entry(id.to_string())
            .or_default();
        record.total += 1;
        if success {
            record.success += 1;
        }
        debug!(
            "{category}/{id}: {}/{} successful",
            record.success, record.total
        );
    }

    /// Write one category back to disk (a checkpoint).
    ///
    /// The whole category file is replaced through a temporary file, so a
    /// crash leaves either the old or the new statistics.
    pub fn save(&self, category: Category) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;

        let empty = BTreeMap::new();
        let map = self
            .records
            .get(&category)
            .unwrap_or(&empty);
        let content = serde_json::to_string_pretty(map).map_err(|source| Error::Json {
            path: dir.join(category.file_name()),
            source,
        })?;

        let path = dir.join(category.file_name());
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        debug!("Saved {category} statistics to {}", path.display());
        Ok(())
    }

    /// Checkpoint that logs instead of failing; a lost batch of statistics
    /// must not fail a run.
    pub fn checkpoint(&self, category: Category) {
        if let Err(e) = self.save(category) {
            warn!("Could not save {category} statistics: {e}");
        }
    }
}
