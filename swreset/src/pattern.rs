//! Console signal patterns.
//!
//! A [`PatternSet`] maps each logical [`Signal`] (login prompt, confirmation
//! dialog, download error, ...) to one or more expressions. Expressions are
//! regular expressions matched case-insensitively anywhere in the text
//! accumulated from the console.
//!
//! The on-disk form is the `patterns.json` object of the device data
//! directory, where every key holds either a single expression or a list:
//!
//! ```json
//! {
//!     "boot_indicators": ["Boot Procedure", "Power On Self Test"],
//!     "PRIVILEGED_PROMPT": "#\\s*$",
//!     "CONFIRM_YN": "\\(y/n\\)"
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Logical console state the handlers look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Early boot output (POST banner, boot procedure line).
    BootIndicators,
    /// The device has entered its password recovery console.
    RecoveryIndicators,
    /// The boot-loader configuration menu is shown.
    BootMenuIndicators,
    /// Unprivileged prompt; in recovery mode this is the open prompt.
    UserPrompt,
    /// Administrative CLI prompt.
    PrivilegedPrompt,
    /// Username request.
    LoginPrompt,
    /// Password request.
    PasswordPrompt,
    /// Authentication was rejected.
    LoginFailed,
    /// Yes/no confirmation dialog.
    ConfirmYn,
    /// Generic command success marker.
    SuccessGeneric,
    /// Generic command failure marker.
    ErrorGeneric,
    /// A TFTP download finished successfully.
    DownloadSuccess,
    /// A TFTP download failed.
    DownloadError,
    /// The device announced a reboot.
    Rebooting,
    /// A ping got a reply.
    PingSuccess,
    /// A ping timed out or the host is unreachable.
    PingFail,
    /// The device forces a new password before the CLI can be used.
    PasswordChange,
}

impl Signal {
    /// Every signal, in configuration-file order.
    pub const ALL: [Self; 17] = [
        Self::BootIndicators,
        Self::RecoveryIndicators,
        Self::BootMenuIndicators,
        Self::UserPrompt,
        Self::PrivilegedPrompt,
        Self::LoginPrompt,
        Self::PasswordPrompt,
        Self::LoginFailed,
        Self::ConfirmYn,
        Self::SuccessGeneric,
        Self::ErrorGeneric,
        Self::DownloadSuccess,
        Self::DownloadError,
        Self::Rebooting,
        Self::PingSuccess,
        Self::PingFail,
        Self::PasswordChange,
    ];

    /// Key of this signal in `patterns.json`.
    pub fn key(self) -> &'static str {
        match self {
            Self::BootIndicators => "boot_indicators",
            Self::RecoveryIndicators => "recovery_indicators",
            Self::BootMenuIndicators => "boot_menu_indicators",
            Self::UserPrompt => "USER_PROMPT",
            Self::PrivilegedPrompt => "PRIVILEGED_PROMPT",
            Self::LoginPrompt => "LOGIN_PROMPT",
            Self::PasswordPrompt => "PASSWORD_PROMPT",
            Self::LoginFailed => "LOGIN_FAILED_INDICATOR",
            Self::ConfirmYn => "CONFIRM_YN",
            Self::SuccessGeneric => "SUCCESS_GENERIC",
            Self::ErrorGeneric => "ERROR_GENERIC",
            Self::DownloadSuccess => "FIRMWARE_DOWNLOAD_SUCCESS",
            Self::DownloadError => "FIRMWARE_DOWNLOAD_ERROR",
            Self::Rebooting => "REBOOTING",
            Self::PingSuccess => "PING_SUCCESS",
            Self::PingFail => "PING_FAIL",
            Self::PasswordChange => "PASSWORD_CHANGE",
        }
    }

    /// Expressions used when the configuration does not mention the signal.
    fn default_expressions(self) -> &'static [&'static str] {
        match self {
            Self::PasswordChange => &["Please set a new password"],
            _ => &[],
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One or more compiled expressions for a signal.
#[derive(Debug, Clone, Default)]
pub struct PatternGroup {
    expressions: Vec<Regex>,
}

impl PatternGroup {
    /// Compile a group of expressions, case-insensitively.
    pub fn compile<S: AsRef<str>>(signal: &str, sources: &[S]) -> Result<Self> {
        let expressions = sources
            .iter()
            .map(|src| {
                RegexBuilder::new(src.as_ref())
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                    .map_err(|source| Error::Pattern {
                        signal: signal.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { expressions })
    }

    /// Whether any expression occurs in `text`. An empty group never matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.expressions
            .iter()
            .any(|re| re.is_match(text))
    }

    /// Whether the group has no expressions.
    pub fn is_empty(&self) -> bool {
        self.expressions
            .is_empty()
    }

    /// Source text of the expressions, for logging.
    pub fn sources(&self) -> Vec<&str> {
        self.expressions
            .iter()
            .map(Regex::as_str)
            .collect()
    }
}

/// Either a single expression or a list, as written in `patterns.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// Compiled patterns for every signal.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    groups: HashMap<Signal, PatternGroup>,
    empty: PatternGroup,
}

impl PatternSet {
    /// Build a pattern set from `(signal, expressions)` pairs.
    ///
    /// Signals not listed fall back to their built-in defaults, if any.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Signal, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut groups = HashMap::new();
        for (signal, sources) in pairs {
            groups.insert(signal, PatternGroup::compile(signal.key(), &sources)?);
        }
        for signal in Signal::ALL {
            if !groups.contains_key(&signal) && !signal.default_expressions().is_empty() {
                groups.insert(
                    signal,
                    PatternGroup::compile(signal.key(), signal.default_expressions())?,
                );
            }
        }
        Ok(Self {
            groups,
            empty: PatternGroup::default(),
        })
    }

    /// Parse and compile the JSON form. Unknown keys are ignored.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::Config("patterns must be a JSON object".into()))?;

        let mut pairs = Vec::new();
        for signal in Signal::ALL {
            if let Some(raw) = object.get(signal.key()) {
                let sources: OneOrMany = serde_json::from_value(raw.clone()).map_err(|e| {
                    Error::Config(format!("pattern {} must be a string or list: {e}", signal.key()))
                })?;
                pairs.push((signal, sources.into_vec()));
            }
        }
        Self::from_pairs(pairs)
    }

    /// Replace the expressions of one signal.
    pub fn override_group<S: AsRef<str>>(&mut self, signal: Signal, sources: &[S]) -> Result<()> {
        let group = PatternGroup::compile(signal.key(), sources)?;
        self.groups
            .insert(signal, group);
        Ok(())
    }

    /// Whether the configuration supplied expressions for `signal`.
    pub fn has(&self, signal: Signal) -> bool {
        self.groups
            .get(&signal)
            .is_some_and(|g| !g.is_empty())
    }

    /// Patterns for `signal`; an empty group if none are configured.
    pub fn group(&self, signal: Signal) -> &PatternGroup {
        self.groups
            .get(&signal)
            .unwrap_or(&self.empty)
    }

    /// Groups for several signals, in the given order.
    pub fn select(&self, signals: &[Signal]) -> Vec<&PatternGroup> {
        signals
            .iter()
            .map(|s| self.group(*s))
            .collect()
    }

    /// Whether `signal` occurs in `text`.
    pub fn matches(&self, signal: Signal, text: &str) -> bool {
        self.group(signal)
            .is_match(text)
    }
}
