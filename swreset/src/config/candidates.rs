//! Credential and reset-command lists (`credentials.json`,
//! `reset_commands.json`).
//!
//! Both files map a category key (`recovery`, `cli`, ...) to a list of
//! entries with a ranking id.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::ranking::Ranked;

/// Login/password pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    /// Identifier used for ranking.
    pub id: String,
    /// User name; may be empty on consoles that only ask for a password.
    #[serde(default)]
    pub login: String,
    /// Password; may be empty.
    #[serde(default)]
    pub password: String,
}

impl Ranked for Credential {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A destructive reset command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResetCommand {
    /// Identifier used for ranking.
    pub id: String,
    /// Console command text.
    pub command: String,
}

impl Ranked for ResetCommand {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Entries grouped by category key.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Catalogued<T> {
    lists: BTreeMap<String, Vec<T>>,
}

impl<T> Default for Catalogued<T> {
    fn default() -> Self {
        Self {
            lists: BTreeMap::new(),
        }
    }
}

impl<T> Catalogued<T> {
    /// Entries under `key`; empty if the key is absent.
    pub fn get(&self, key: &str) -> &[T] {
        self.lists
            .get(key)
            .map_or(&[], Vec::as_slice)
    }

    /// Insert or replace the list under `key`.
    pub fn insert(&mut self, key: impl Into<String>, entries: Vec<T>) {
        self.lists
            .insert(key.into(), entries);
    }
}

/// Credentials per category.
pub type Credentials = Catalogued<Credential>;

/// Reset commands per category.
pub type ResetCommands = Catalogued<ResetCommand>;
